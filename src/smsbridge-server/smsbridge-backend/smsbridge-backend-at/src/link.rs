// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Line-oriented AT transport.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, warn};

use smsbridge_core::{BoxFuture, GatewayError, GatewayResult};

/// Terminates the body of `AT+CMGS`.
pub const CTRL_Z: u8 = 0x1a;

/// Final result code closing an AT exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalResult {
    Ok,
    /// `ERROR`, `+CME ERROR: n` or `+CMS ERROR: n`.
    Error(String),
}

/// Information lines of one exchange plus its final result code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtResponse {
    pub lines: Vec<String>,
    pub result: FinalResult,
}

impl AtResponse {
    pub fn is_ok(&self) -> bool {
        self.result == FinalResult::Ok
    }

    /// Rest of the first line starting with `prefix`, trimmed.
    pub fn find(&self, prefix: &str) -> Option<&str> {
        self.lines
            .iter()
            .find_map(|l| l.strip_prefix(prefix))
            .map(str::trim)
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn error(&self) -> Option<&str> {
        match &self.result {
            FinalResult::Ok => None,
            FinalResult::Error(e) => Some(e),
        }
    }
}

pub fn classify_final(line: &str) -> Option<FinalResult> {
    let line = line.trim();
    if line == "OK" {
        Some(FinalResult::Ok)
    } else if line == "ERROR"
        || line.starts_with("+CME ERROR")
        || line.starts_with("+CMS ERROR")
    {
        Some(FinalResult::Error(line.to_string()))
    } else {
        None
    }
}

/// Splits raw serial bytes into lines and spots the `> ` send prompt.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Next complete line without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }

    /// Whether anything besides line terminators is buffered.
    pub fn has_pending(&self) -> bool {
        self.buf.iter().any(|b| !b.is_ascii_whitespace())
    }

    /// Consume a pending prompt, if the unterminated tail is one.
    pub fn take_prompt(&mut self) -> bool {
        let start = self
            .buf
            .iter()
            .position(|b| *b != b'\r' && *b != b'\n')
            .unwrap_or(self.buf.len());
        let tail = &self.buf[start..];
        if tail.starts_with(b"> ") || tail == b">" {
            self.buf.clear();
            true
        } else {
            false
        }
    }
}

/// Gathers information lines until the final result code.
///
/// Inside an `+CMGL:`/`+CMGR:` listing the line after a header is message
/// text, and a result code with more data buffered behind it is too.
#[derive(Debug)]
pub struct Collector {
    echo: String,
    lines: Vec<String>,
    listing: bool,
    body_next: bool,
}

fn is_message_header(line: &str) -> bool {
    line.starts_with("+CMGL:") || line.starts_with("+CMGR:")
}

impl Collector {
    pub fn new(echo: &str) -> Self {
        Self {
            echo: echo.trim().to_string(),
            lines: Vec::new(),
            listing: false,
            body_next: false,
        }
    }

    pub fn accept(&mut self, line: &str) -> Option<AtResponse> {
        self.accept_line(line, false)
    }

    /// `more_pending`: further data already follows `line`.
    pub fn accept_line(&mut self, line: &str, more_pending: bool) -> Option<AtResponse> {
        let line = line.trim();
        if line.is_empty() {
            // Empty message body.
            self.body_next = false;
            return None;
        }
        if is_message_header(line) {
            self.listing = true;
            self.body_next = true;
            self.lines.push(line.to_string());
            return None;
        }
        if std::mem::take(&mut self.body_next) {
            self.lines.push(line.to_string());
            return None;
        }
        if !self.echo.is_empty() && line == self.echo {
            return None;
        }
        match classify_final(line) {
            Some(_) if self.listing && more_pending => {
                self.lines.push(line.to_string());
                None
            }
            Some(result) => Some(AtResponse {
                lines: std::mem::take(&mut self.lines),
                result,
            }),
            None => {
                self.lines.push(line.to_string());
                None
            }
        }
    }
}

/// Parse a complete transcript; `None` if it never reaches a final result.
pub fn parse_transcript(raw: &str, echo: &str) -> Option<AtResponse> {
    let mut collector = Collector::new(echo);
    let lines: Vec<&str> = raw.lines().collect();
    lines.iter().enumerate().find_map(|(i, line)| {
        let more = lines[i + 1..].iter().any(|l| !l.trim().is_empty());
        collector.accept_line(line, more)
    })
}

/// One half-duplex AT channel. Callers never overlap exchanges.
pub trait AtLink: Send {
    fn open<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<()>>;

    fn is_open(&self) -> bool;

    /// Write `command` and collect the response up to its final result.
    fn command<'a>(
        &'a mut self,
        command: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, GatewayResult<AtResponse>>;

    /// Two-stage submit (`AT+CMGS`): command, wait for prompt, body + Ctrl-Z.
    fn submit<'a>(
        &'a mut self,
        command: &'a str,
        body: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, GatewayResult<AtResponse>>;

    fn close(&mut self);
}

#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub path: String,
    pub baud: u32,
    pub timeout: Duration,
    /// Quiet period after each exchange.
    pub settle: Duration,
}

/// AT link over a tokio-serial port, opened lazily.
pub struct SerialLink {
    settings: SerialSettings,
    port: Option<SerialStream>,
    framer: LineFramer,
}

impl SerialLink {
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            port: None,
            framer: LineFramer::default(),
        }
    }

    async fn ensure_open(&mut self) -> GatewayResult<()> {
        if self.port.is_some() {
            return Ok(());
        }
        let port = tokio_serial::new(&self.settings.path, self.settings.baud)
            .timeout(self.settings.timeout)
            .open_native_async()
            .map_err(|e| GatewayError::connection(format!("{}: {}", self.settings.path, e)))?;
        debug!(
            "Opened {} at {} baud",
            self.settings.path, self.settings.baud
        );
        self.port = Some(port);
        self.framer.clear();
        Ok(())
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> GatewayResult<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| GatewayError::connection("serial port not open"))?;
        port.write_all(bytes).await?;
        port.flush().await?;
        Ok(())
    }

    async fn read_more(&mut self) -> GatewayResult<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| GatewayError::connection("serial port not open"))?;
        let mut chunk = [0u8; 256];
        let n = port.read(&mut chunk).await?;
        if n == 0 {
            return Err(GatewayError::connection("serial port closed"));
        }
        self.framer.push(&chunk[..n]);
        Ok(())
    }

    async fn read_final(&mut self, echo: &str) -> GatewayResult<AtResponse> {
        let mut collector = Collector::new(echo);
        loop {
            while let Some(line) = self.framer.next_line() {
                let more = self.framer.has_pending();
                if let Some(resp) = collector.accept_line(&line, more) {
                    return Ok(resp);
                }
            }
            self.read_more().await?;
        }
    }

    async fn wait_prompt(&mut self, echo: &str) -> GatewayResult<Option<AtResponse>> {
        let mut collector = Collector::new(echo);
        loop {
            if self.framer.take_prompt() {
                return Ok(None);
            }
            while let Some(line) = self.framer.next_line() {
                if let Some(resp) = collector.accept(&line) {
                    // Final result before the prompt: the modem refused.
                    return Ok(Some(resp));
                }
                if self.framer.take_prompt() {
                    return Ok(None);
                }
            }
            self.read_more().await?;
        }
    }

    fn begin(&mut self) {
        if let Some(port) = self.port.as_ref() {
            let _ = port.clear(ClearBuffer::Input);
        }
        self.framer.clear();
    }

    async fn finish<T>(&mut self, result: GatewayResult<T>) -> GatewayResult<T> {
        match &result {
            Err(GatewayError::Connection(e)) => {
                warn!("Closing {} after I/O error: {}", self.settings.path, e);
                self.port = None;
            }
            _ => {
                if !self.settings.settle.is_zero() {
                    tokio::time::sleep(self.settings.settle).await;
                }
            }
        }
        result
    }

    async fn run_command(&mut self, command: &str, limit: Duration) -> GatewayResult<AtResponse> {
        self.ensure_open().await?;
        self.begin();
        let exchange = async {
            self.write_raw(format!("{command}\r").as_bytes()).await?;
            self.read_final(command).await
        };
        let result = match timeout(limit, exchange).await {
            Ok(r) => r,
            Err(_) => Err(GatewayError::timeout(format!(
                "{command}: no final result within {limit:?}"
            ))),
        };
        self.finish(result).await
    }

    async fn run_submit(
        &mut self,
        command: &str,
        body: &str,
        limit: Duration,
    ) -> GatewayResult<AtResponse> {
        self.ensure_open().await?;
        self.begin();
        let exchange = async {
            self.write_raw(format!("{command}\r").as_bytes()).await?;
            if let Some(refused) = self.wait_prompt(command).await? {
                return Ok(refused);
            }
            let mut payload = body.as_bytes().to_vec();
            payload.push(CTRL_Z);
            self.write_raw(&payload).await?;
            self.read_final("").await
        };
        let result = match timeout(limit, exchange).await {
            Ok(r) => r,
            Err(_) => Err(GatewayError::timeout(format!(
                "{command}: not confirmed within {limit:?}"
            ))),
        };
        self.finish(result).await
    }
}

impl AtLink for SerialLink {
    fn open<'a>(&'a mut self) -> BoxFuture<'a, GatewayResult<()>> {
        Box::pin(async move { self.ensure_open().await })
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn command<'a>(
        &'a mut self,
        command: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, GatewayResult<AtResponse>> {
        Box::pin(async move { self.run_command(command, timeout).await })
    }

    fn submit<'a>(
        &'a mut self,
        command: &'a str,
        body: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, GatewayResult<AtResponse>> {
        Box::pin(async move { self.run_submit(command, body, timeout).await })
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Closed {}", self.settings.path);
        }
        self.framer.clear();
    }
}
