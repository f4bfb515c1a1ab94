//! OAuth exchange coordination.
//!
//! Consumes auth-callback payloads and performs the one-shot
//! authorization-code-for-session exchange against the backend identity
//! service. Codes are single-use, so there is no retry and each code is
//! exchanged at most once even if a payload is redelivered.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::json;
use url::Url;

use crate::config::{AppConfig, AUTH_CALLBACK_HOST, AUTH_CALLBACK_PATH};
use crate::deep_link::AuthCallbackPayload;

const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(15);

/// Where a callback payload came from. The shell always uses `Bridge`;
/// `PageUrl` covers the same flow when the frontend runs outside the shell
/// and the callback lands on its own `/auth/callback` route.
#[derive(Debug, Clone)]
pub enum DeliverySource {
    Bridge(AuthCallbackPayload),
    PageUrl(Url),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Code exchanged; the caller should navigate to the landing route.
    Completed,
    /// The provider reported an error; no exchange was attempted.
    ProviderError,
    /// The exchange request failed; the code is spent either way.
    ExchangeFailed,
    /// This code was already handed to the identity service once.
    AlreadyHandled,
    /// Payload carried neither code nor error, or the source was not an
    /// auth callback at all.
    Ignored,
}

pub struct ExchangeCoordinator {
    client: reqwest::Client,
    token_endpoint: Option<Url>,
    attempted: Mutex<HashSet<String>>,
}

impl ExchangeCoordinator {
    pub fn new(config: &AppConfig) -> Self {
        let token_endpoint = config.backend_url.as_ref().and_then(|backend| {
            backend
                .join("/auth/v1/token?grant_type=pkce")
                .map_err(|err| warn!("[auth] invalid backend URL for token endpoint: {err}"))
                .ok()
        });
        Self {
            client: reqwest::Client::builder()
                .timeout(EXCHANGE_TIMEOUT)
                .build()
                .unwrap_or_default(),
            token_endpoint,
            attempted: Mutex::new(HashSet::new()),
        }
    }

    pub async fn process(&self, source: DeliverySource) -> ExchangeOutcome {
        let payload = match source {
            DeliverySource::Bridge(payload) => payload,
            DeliverySource::PageUrl(url) => match payload_from_page_url(&url) {
                Some(payload) => payload,
                None => return ExchangeOutcome::Ignored,
            },
        };
        self.handle_callback(&payload).await
    }

    pub async fn handle_callback(&self, payload: &AuthCallbackPayload) -> ExchangeOutcome {
        if let Some(err) = &payload.error {
            error!(
                "[auth] provider returned error: {err} ({})",
                payload.error_description.as_deref().unwrap_or("no description")
            );
            return ExchangeOutcome::ProviderError;
        }

        let Some(code) = payload.code.as_deref() else {
            // Neither code nor error: tolerated as a no-op.
            debug!("[auth] callback without code or error, ignoring");
            return ExchangeOutcome::Ignored;
        };

        if !self.mark_attempted(code) {
            warn!("[auth] ignoring redelivered payload for an already-exchanged code");
            return ExchangeOutcome::AlreadyHandled;
        }

        match self.exchange(code).await {
            Ok(()) => {
                info!("[auth] code exchange completed");
                ExchangeOutcome::Completed
            }
            Err(err) => {
                // The code is consumed or invalid now; no retry.
                error!("[auth] code exchange failed: {err:#}");
                ExchangeOutcome::ExchangeFailed
            }
        }
    }

    /// Records the exchange attempt; returns false if the code was seen
    /// before.
    fn mark_attempted(&self, code: &str) -> bool {
        self.attempted.lock().insert(code.to_string())
    }

    async fn exchange(&self, code: &str) -> Result<()> {
        let endpoint = self
            .token_endpoint
            .clone()
            .ok_or_else(|| anyhow!("no backend identity service configured"))?;

        let response = self
            .client
            .post(endpoint)
            .json(&json!({ "auth_code": code }))
            .send()
            .await
            .context("token exchange request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("identity service rejected the code: {status} {body}"));
        }
        Ok(())
    }
}

/// Reads the same two parameters the deep-link parser extracts, but from a
/// page URL at the dedicated callback route (the non-shell fallback).
pub fn payload_from_page_url(url: &Url) -> Option<AuthCallbackPayload> {
    // suna://auth/callback splits into host + path; on a web origin the
    // same route is a plain path.
    let callback_route = format!("/{AUTH_CALLBACK_HOST}{AUTH_CALLBACK_PATH}");
    if url.path() != callback_route {
        return None;
    }

    let mut payload = AuthCallbackPayload {
        code: None,
        error: None,
        error_description: None,
        url: url.to_string(),
    };
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => payload.code = Some(value.into_owned()),
            "error" => payload.error = Some(value.into_owned()),
            "error_description" => payload.error_description = Some(value.into_owned()),
            _ => {}
        }
    }
    Some(payload)
}
