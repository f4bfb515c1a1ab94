use std::env;

use log::warn;
use url::Url;

/// Custom protocol scheme registered with the OS for auth callbacks.
pub const PROTOCOL_SCHEME: &str = "suna";

/// Host + path of the only meaningful deep link under the scheme.
pub const AUTH_CALLBACK_HOST: &str = "auth";
pub const AUTH_CALLBACK_PATH: &str = "/callback";

/// Event name for the one-way auth notification into the webview.
pub const AUTH_CALLBACK_EVENT: &str = "auth-callback";

pub const MAIN_WINDOW_LABEL: &str = "main";

/// Route the webview is sent to after a successful code exchange.
pub const LANDING_ROUTE: &str = "/dashboard";

const DEFAULT_DEV_SERVER_URL: &str = "http://localhost:3000";

/// Identity-provider hosts whose popups are routed to the OS browser.
/// Matched exactly or as a subdomain suffix.
const AUTH_POPUP_HOSTS: &[&str] = &["supabase.co", "github.com", "accounts.google.com"];

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub dev_mode: bool,
    pub dev_server_url: Url,
    pub backend_url: Option<Url>,
    pub auth_popup_hosts: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let dev_server_url = env::var("SUNA_DEV_SERVER_URL")
            .ok()
            .and_then(|raw| normalize_server_url(&raw))
            .unwrap_or_else(|| {
                Url::parse(DEFAULT_DEV_SERVER_URL).expect("default dev server URL is valid")
            });

        let backend_url = match env::var("SUNA_BACKEND_URL") {
            Ok(raw) => {
                let normalized = normalize_server_url(&raw);
                if normalized.is_none() && !raw.trim().is_empty() {
                    warn!("[config] ignoring invalid SUNA_BACKEND_URL: {raw}");
                }
                normalized
            }
            Err(_) => None,
        };

        let mut auth_popup_hosts: Vec<String> =
            AUTH_POPUP_HOSTS.iter().map(|host| host.to_string()).collect();
        if let Some(host) = backend_url.as_ref().and_then(|url| url.host_str()) {
            if !auth_popup_hosts.iter().any(|existing| existing == host) {
                auth_popup_hosts.push(host.to_string());
            }
        }

        Self {
            dev_mode: cfg!(debug_assertions),
            dev_server_url,
            backend_url,
            auth_popup_hosts,
        }
    }

    /// The callback URL handed to the frontend for OAuth redirect configuration.
    pub fn auth_callback_url() -> String {
        format!("{PROTOCOL_SCHEME}://{AUTH_CALLBACK_HOST}{AUTH_CALLBACK_PATH}")
    }
}

/// Accepts only http/https URLs; anything else is rejected.
pub fn normalize_server_url(input: &str) -> Option<Url> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    match Url::parse(trimmed) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Some(url),
        _ => None,
    }
}
