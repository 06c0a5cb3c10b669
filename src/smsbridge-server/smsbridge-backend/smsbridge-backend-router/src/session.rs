// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Token-authenticated HTTP session against one router.

use std::time::{Duration, Instant};

use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use smsbridge_core::{GatewayError, GatewayResult};

use crate::api::{self, LoginRequest, LoginResponse};

const SLOW_REQUEST: Duration = Duration::from_secs(2);

pub fn map_http_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::timeout(e.to_string())
    } else if e.is_decode() {
        GatewayError::protocol(format!("malformed reply: {e}"))
    } else {
        GatewayError::connection(e.to_string())
    }
}

pub struct RouterSession {
    client: reqwest::Client,
    base_url: String,
    password: String,
    token: Option<String>,
}

impl RouterSession {
    pub fn new(base_url: &str, password: &str, timeout: Duration) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::connection(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            password: password.to_string(),
            token: None,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_logged_in(&self) -> bool {
        self.token.is_some()
    }

    /// Forget the token; the next call logs in again.
    pub fn reset(&mut self) {
        self.token = None;
    }

    pub async fn login(&mut self) -> GatewayResult<()> {
        let url = format!("{}{}", self.base_url, api::LOGIN);
        let body = LoginRequest {
            password: api::password_digest(&self.password),
        };
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(map_http_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(GatewayError::protocol(format!("login returned {status}")));
        }
        let reply: LoginResponse = resp.json().await.map_err(map_http_error)?;
        match (reply.success, reply.token) {
            (true, Some(token)) if !token.is_empty() => {
                debug!("Logged in to {}", self.base_url);
                self.token = Some(token);
                Ok(())
            }
            _ => {
                self.token = None;
                Err(GatewayError::protocol("login rejected"))
            }
        }
    }

    pub async fn get(&mut self, path: &str) -> GatewayResult<Value> {
        self.call(Method::GET, path, None).await
    }

    pub async fn post(&mut self, path: &str, body: &Value) -> GatewayResult<Value> {
        self.call(Method::POST, path, Some(body)).await
    }

    async fn call(&mut self, method: Method, path: &str, body: Option<&Value>) -> GatewayResult<Value> {
        if self.token.is_none() {
            self.login().await?;
        }
        let start = Instant::now();
        let (mut code, mut reply) = self.send_once(method.clone(), path, body).await?;
        if code == StatusCode::UNAUTHORIZED {
            debug!("Token for {} expired, logging in again", self.base_url);
            self.token = None;
            self.login().await?;
            (code, reply) = self.send_once(method.clone(), path, body).await?;
        }
        let elapsed = start.elapsed();
        if elapsed > SLOW_REQUEST {
            warn!("{} {}{} took {:?}", method, self.base_url, path, elapsed);
        }
        if !code.is_success() {
            if code == StatusCode::UNAUTHORIZED {
                self.token = None;
            }
            return Err(GatewayError::protocol(format!("{method} {path} returned {code}")));
        }
        reply.ok_or_else(|| GatewayError::protocol(format!("{method} {path}: empty reply")))
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> GatewayResult<(StatusCode, Option<Value>)> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method, &url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(map_http_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Ok((status, None));
        }
        let value = resp.json::<Value>().await.map_err(map_http_error)?;
        Ok((status, Some(value)))
    }
}
