//! Main window creation and the two webview security enforcement points:
//! top-level navigation filtering and popup interception.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::{error, info, warn};
use tauri::{
    webview::NewWindowResponse, AppHandle, Manager, WebviewUrl, WebviewWindowBuilder,
};
use tauri_plugin_shell::ShellExt;
use url::Url;

use crate::config::{AppConfig, MAIN_WINDOW_LABEL};

/// What to do with a `window.open` request from hosted content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupAction {
    /// Identity-provider target: hand it to the OS browser.
    OpenExternal,
    /// Everything else: no second in-app window, ever.
    Deny,
}

/// Origin and host allow-lists applied to the hosted content.
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    dev_mode: bool,
    allowed_origins: Vec<String>,
    auth_popup_hosts: Vec<String>,
}

impl SecurityPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        let mut allowed_origins = vec![origin_of(&config.dev_server_url)];
        if let Some(backend) = &config.backend_url {
            allowed_origins.push(origin_of(backend));
        }
        Self {
            dev_mode: config.dev_mode,
            allowed_origins,
            auth_popup_hosts: config.auth_popup_hosts.clone(),
        }
    }

    /// Whether a top-level navigation inside the app's own frame may
    /// proceed. Development builds bypass the check for hot-reload
    /// workflows; production allows only the bundled-asset origins, the
    /// dev server origin and the backend origin.
    pub fn navigation_allowed(&self, url: &Url) -> bool {
        if self.dev_mode {
            return true;
        }
        // Bundled frontend: tauri://localhost on macOS/Linux,
        // http(s)://tauri.localhost on Windows, plus the asset protocol.
        match url.scheme() {
            "tauri" | "asset" => return true,
            "http" | "https" if url.host_str() == Some("tauri.localhost") => return true,
            _ => {}
        }
        let origin = origin_of(url);
        self.allowed_origins.iter().any(|allowed| *allowed == origin)
    }

    /// Disposition for a new-window request from hosted content.
    pub fn popup_action(&self, url: &Url) -> PopupAction {
        let Some(host) = url.host_str() else {
            return PopupAction::Deny;
        };
        let matches_auth_host = self.auth_popup_hosts.iter().any(|allowed| {
            host == allowed || host.ends_with(&format!(".{allowed}"))
        });
        if matches_auth_host && matches!(url.scheme(), "http" | "https") {
            PopupAction::OpenExternal
        } else {
            PopupAction::Deny
        }
    }
}

fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// Creates the single main window with both enforcement points attached.
pub fn create_main_window(app: &AppHandle, config: &AppConfig) -> Result<()> {
    let policy = Arc::new(SecurityPolicy::from_config(config));
    let webview_url = resolve_frontend_url(app, config);

    let version = app.package_info().version.to_string();
    let init_script = format!(
        "(function(){{try{{window.__SUNA_DESKTOP__={{version:{}}};}}catch(_e){{}}}})();",
        serde_json::to_string(&version).unwrap_or_else(|_| "\"\"".into())
    );

    let nav_policy = Arc::clone(&policy);
    let popup_handle = app.clone();
    let popup_policy = policy;

    let window = WebviewWindowBuilder::new(app, MAIN_WINDOW_LABEL, webview_url)
        .title("Suna")
        .inner_size(1400.0, 900.0)
        .min_inner_size(1000.0, 700.0)
        .visible(false)
        .initialization_script(&init_script)
        .on_navigation(move |url| {
            if nav_policy.navigation_allowed(url) {
                true
            } else {
                warn!("[window] blocked navigation to {url}");
                false
            }
        })
        .on_new_window(move |url, _features| {
            match popup_policy.popup_action(&url) {
                PopupAction::OpenExternal => {
                    // Authorization must run in the OS browser, where the
                    // user's sessions and password manager live.
                    info!("[window] routing auth popup to OS browser: {url}");
                    #[allow(deprecated)]
                    {
                        let _ = popup_handle
                            .shell()
                            .open(url.as_str(), None::<tauri_plugin_shell::open::Program>);
                    }
                }
                PopupAction::Deny => warn!("[window] blocked new window: {url}"),
            }
            NewWindowResponse::Deny
        })
        .build()?;

    let _ = window.set_focus();
    Ok(())
}

/// Picks the webview URL: the dev server in development, the bundled
/// static export in production. A missing bundle tries one fallback
/// resource location; if that also fails the window is left on the
/// default app URL (an error state for this launch, not a crash).
fn resolve_frontend_url(app: &AppHandle, config: &AppConfig) -> WebviewUrl {
    if config.dev_mode {
        return WebviewUrl::External(config.dev_server_url.clone());
    }
    match resolve_bundle_index(app) {
        Ok(()) => WebviewUrl::App("index.html".into()),
        Err(err) => {
            error!("[window] frontend bundle missing: {err:#}");
            WebviewUrl::App("index.html".into())
        }
    }
}

fn resolve_bundle_index(app: &AppHandle) -> Result<()> {
    let candidates = ["frontend/out", "resources/frontend/out"];
    for candidate in candidates {
        let path = app
            .path()
            .resolve(candidate, tauri::path::BaseDirectory::Resource)
            .map_err(|err| anyhow!("failed to resolve '{candidate}' resources: {err}"))?;
        if std::fs::metadata(path.join("index.html")).is_ok() {
            return Ok(());
        }
    }
    Err(anyhow!(
        "no index.html under any bundle candidate ({})",
        candidates.join(", ")
    ))
}
