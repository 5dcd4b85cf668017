// Copyright 2025 Storeforge Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Request gatekeeper: authentication, per-caller rate limiting, owner
//! allowlisting and audit logging. Every inbound tool call passes through
//! [`Gatekeeper::check`] before any pipeline work starts; the gatekeeper
//! fails closed when the server has no configured secret.

use axum::http::HeaderMap;
use base64::Engine;
use parking_lot::RwLock;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::AppConfig;

/// Denial taxonomy. Each variant maps to the HTTP status the boundary
/// returns; the gatekeeper is the only place that produces non-200 statuses.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("missing or invalid credential")]
    Unauthorized,
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("owner '{0}' is not allowlisted")]
    Forbidden(String),
    #[error("server auth secret is not configured")]
    Misconfigured,
}

impl GateError {
    pub fn http_status(&self) -> u16 {
        match self {
            GateError::Unauthorized => 401,
            GateError::RateLimited { .. } => 429,
            GateError::Forbidden(_) => 403,
            GateError::Misconfigured => 500,
        }
    }
}

/// Authorization context handed to the pipeline once a request is accepted.
#[derive(Clone, Debug)]
pub struct GateContext {
    pub request_id: String,
    pub client_ip: String,
    pub remaining: u32,
}

/// Outcome of one rate-limit check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: u64 },
}

/// Seam for the rate limiter so a distributed deployment can swap in a
/// shared-store-backed implementation without touching callers.
pub trait RateLimiter: Send + Sync {
    fn check(&self, key: &str) -> Decision;
}

struct WindowState {
    started: Instant,
    count: u32,
}

/// In-memory fixed-window counter, one window per key. Best-effort and not
/// linearizable across processes; the window resets when it elapses.
pub struct FixedWindowLimiter {
    max: u32,
    window: Duration,
    table: RwLock<HashMap<String, WindowState>>,
}

impl FixedWindowLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            table: RwLock::new(HashMap::new()),
        }
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check(&self, key: &str) -> Decision {
        let now = Instant::now();
        let mut table = self.table.write();
        let state = table.entry(key.to_string()).or_insert(WindowState {
            started: now,
            count: 0,
        });
        if now.duration_since(state.started) >= self.window {
            state.started = now;
            state.count = 0;
        }
        if state.count < self.max {
            state.count += 1;
            Decision::Allowed {
                remaining: self.max - state.count,
            }
        } else {
            let elapsed = now.duration_since(state.started);
            let left = self.window.saturating_sub(elapsed);
            Decision::Limited {
                retry_after_secs: left.as_secs().max(1),
            }
        }
    }
}

/// Generate a short request correlation id (base64 of 9 random bytes).
pub fn gen_request_id() -> String {
    let mut b = [0u8; 9];
    rand::rng().fill_bytes(&mut b);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b)
}

/// Pull the caller token from `Authorization: Bearer ...` or the
/// `x-storeforge-token` fallback header.
pub fn caller_token(headers: &HeaderMap) -> Option<String> {
    if let Some(v) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(s) = v.to_str() {
            if let Some(rest) = s.strip_prefix("Bearer ") {
                return Some(rest.trim().to_string());
            }
        }
    }
    headers
        .get("x-storeforge-token")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
}

/// Resolve the client IP: first `x-forwarded-for` value, else `x-real-ip`,
/// else the transport peer address.
pub fn client_ip(headers: &HeaderMap, peer: &str) -> String {
    if let Some(v) = headers.get("x-forwarded-for") {
        if let Ok(s) = v.to_str() {
            if let Some(first) = s.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
    }
    if let Some(v) = headers.get("x-real-ip") {
        if let Ok(s) = v.to_str() {
            let s = s.trim();
            if !s.is_empty() {
                return s.to_string();
            }
        }
    }
    peer.to_string()
}

pub struct Gatekeeper {
    secret: Option<String>,
    allowed_owners: Vec<String>,
    limiter: Arc<dyn RateLimiter>,
}

impl Gatekeeper {
    pub fn new(cfg: &AppConfig) -> Self {
        Self {
            secret: cfg.auth_secret.clone(),
            allowed_owners: cfg.allowed_owners.clone(),
            limiter: Arc::new(FixedWindowLimiter::new(
                cfg.rate_limit_max,
                cfg.rate_limit_window,
            )),
        }
    }

    pub fn with_limiter(cfg: &AppConfig, limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            secret: cfg.auth_secret.clone(),
            allowed_owners: cfg.allowed_owners.clone(),
            limiter,
        }
    }

    /// Authenticate, rate-limit and (for mutating calls) allowlist-check one
    /// inbound request. Every accept and deny emits an audit event; audit
    /// emission never blocks or fails the request path.
    pub fn check(
        &self,
        headers: &HeaderMap,
        peer_ip: &str,
        mutating_owner: Option<&str>,
    ) -> Result<GateContext, GateError> {
        let request_id = headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(gen_request_id);
        let ip = client_ip(headers, peer_ip);

        let Some(secret) = self.secret.as_deref() else {
            // Fail closed: a server without a secret authorizes nobody.
            self.audit_deny(&request_id, &ip, "misconfigured", None);
            return Err(GateError::Misconfigured);
        };

        let token = match caller_token(headers) {
            Some(t) if t == secret => t,
            _ => {
                self.audit_deny(&request_id, &ip, "unauthorized", None);
                return Err(GateError::Unauthorized);
            }
        };

        let remaining = match self.limiter.check(&format!("{}|{}", token, ip)) {
            Decision::Allowed { remaining } => remaining,
            Decision::Limited { retry_after_secs } => {
                self.audit_deny(&request_id, &ip, "rate_limited", Some(retry_after_secs));
                return Err(GateError::RateLimited { retry_after_secs });
            }
        };

        if let Some(owner) = mutating_owner {
            if !self.allowed_owners.iter().any(|o| o == owner) {
                self.audit_deny(&request_id, &ip, "owner_not_allowlisted", None);
                return Err(GateError::Forbidden(owner.to_string()));
            }
        }

        tracing::info!(
            target: "audit",
            request_id = %request_id,
            client_ip = %ip,
            outcome = "accept",
            remaining = remaining,
            mutating_owner = mutating_owner.unwrap_or("-"),
            "request accepted"
        );
        Ok(GateContext {
            request_id,
            client_ip: ip,
            remaining,
        })
    }

    fn audit_deny(&self, request_id: &str, ip: &str, reason: &str, retry_after: Option<u64>) {
        tracing::warn!(
            target: "audit",
            request_id = %request_id,
            client_ip = %ip,
            outcome = "deny",
            reason = reason,
            retry_after_secs = retry_after.unwrap_or(0),
            "request denied"
        );
    }
}
