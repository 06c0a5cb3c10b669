// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

use serde::Serialize;
use thiserror::Error;

/// Error type shared by transports, device managers and the gateway core.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum GatewayError {
    /// Transport could not be opened.
    #[error("connection error: {0}")]
    Connection(String),
    /// An exchange exceeded its timeout.
    #[error("timeout: {0}")]
    Timeout(String),
    /// The response did not match the expected grammar.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Hub push failed.
    #[error("delivery error: {0}")]
    Delivery(String),
    /// Device initialisation failed.
    #[error("init error: {0}")]
    Init(String),
    /// Origin did not confirm an outbound message.
    #[error("send error: {0}")]
    Send(String),
    /// Persistence layer failure.
    #[error("storage error: {0}")]
    Storage(String),
    #[error("unsupported device family: {0}")]
    UnsupportedFamily(String),
    #[error("device already exists: {0}")]
    DuplicateDevice(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Operation is not offered by this family.
    #[error("operation not supported: {0}")]
    NotSupported(String),
    /// The device task is gone (removed or shutting down).
    #[error("device shut down: {0}")]
    Shutdown(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn delivery(message: impl Into<String>) -> Self {
        Self::Delivery(message.into())
    }

    pub fn send(message: impl Into<String>) -> Self {
        Self::Send(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn not_supported(operation: impl Into<String>) -> Self {
        Self::NotSupported(operation.into())
    }

    /// Errors that the next scheduled cycle may clear on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::Delivery(_) | Self::Storage(_)
        )
    }

    /// Errors reported straight back to the caller without any retry.
    pub fn is_caller_facing(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFamily(_) | Self::DuplicateDevice(_) | Self::NotFound(_)
        )
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            Self::Timeout(err.to_string())
        } else {
            Self::Connection(err.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for GatewayError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::Timeout(err.to_string())
    }
}
