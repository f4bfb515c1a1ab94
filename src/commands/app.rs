//! App-level bridge commands: version/platform queries, validated external
//! opens, the auth callback URL, and the update-feed query.

use std::process::Command;

use log::{error, warn};
use serde::Serialize;
use tauri::{AppHandle, Manager};
use tauri_plugin_shell::ShellExt;
use tauri_plugin_updater::UpdaterExt;
use url::Url;

use crate::config::AppConfig;

const ALLOWED_EXTERNAL_SCHEMES: &[&str] = &["http", "https", "mailto"];

#[tauri::command]
pub fn get_app_version(app: AppHandle) -> String {
    app.package_info().version.to_string()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformInfo {
    pub platform: String,
    pub arch: String,
    pub version: String,
}

#[tauri::command]
pub fn get_platform_info() -> PlatformInfo {
    PlatformInfo {
        platform: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        version: os_version(),
    }
}

#[tauri::command]
pub fn get_auth_callback_url() -> String {
    AppConfig::auth_callback_url()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenExternalResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OpenExternalResult {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Launches the OS browser for http/https/mailto targets only. Any other
/// scheme is rejected before any side effect occurs.
#[tauri::command]
pub fn open_external_url(app: AppHandle, url: String) -> OpenExternalResult {
    let parsed = match validate_external_url(&url) {
        Ok(parsed) => parsed,
        Err(reason) => {
            warn!("[bridge] refused external open of {url}: {reason}");
            return OpenExternalResult::failure(reason);
        }
    };

    #[allow(deprecated)]
    let opened = app
        .shell()
        .open(parsed.as_str(), None::<tauri_plugin_shell::open::Program>);

    match opened {
        Ok(()) => OpenExternalResult::ok(),
        Err(err) => {
            error!("[bridge] failed to open external URL: {err}");
            OpenExternalResult::failure(err.to_string())
        }
    }
}

pub(crate) fn validate_external_url(raw: &str) -> Result<Url, String> {
    let parsed = Url::parse(raw).map_err(|err| err.to_string())?;
    if ALLOWED_EXTERNAL_SCHEMES.contains(&parsed.scheme()) {
        Ok(parsed)
    } else {
        Err("Invalid protocol".to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    pub version: String,
    pub current_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheckResult {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<UpdateInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Queries the update feed. A no-op outside production builds; feed or
/// updater failures come back as a typed unavailable result.
#[tauri::command]
pub async fn check_for_updates(app: AppHandle) -> UpdateCheckResult {
    if cfg!(debug_assertions) {
        return UpdateCheckResult {
            available: false,
            info: None,
            reason: Some("Development mode".to_string()),
            error: None,
        };
    }
    check_update_feed(&app).await
}

pub(crate) async fn check_update_feed(app: &AppHandle) -> UpdateCheckResult {
    let unavailable = |error: String| UpdateCheckResult {
        available: false,
        info: None,
        reason: None,
        error: Some(error),
    };

    let updater = match app.updater() {
        Ok(updater) => updater,
        Err(err) => {
            error!("[bridge] updater unavailable: {err}");
            return unavailable(err.to_string());
        }
    };

    match updater.check().await {
        Ok(Some(update)) => UpdateCheckResult {
            available: true,
            info: Some(UpdateInfo {
                version: update.version.clone(),
                current_version: app.package_info().version.to_string(),
                body: update.body.clone(),
                date: update.date.map(|date| date.to_string()),
            }),
            reason: None,
            error: None,
        },
        Ok(None) => UpdateCheckResult {
            available: false,
            info: None,
            reason: Some("Up to date".to_string()),
            error: None,
        },
        Err(err) => {
            error!("[bridge] update check failed: {err}");
            unavailable(err.to_string())
        }
    }
}

/// OS version string, best effort, probed the same way the webview UA
/// fallback logic does.
fn os_version() -> String {
    fn cmd_stdout(cmd: &str, args: &[&str]) -> Option<String> {
        let output = Command::new(cmd).args(args).output().ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8(output.stdout)
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
    }

    #[cfg(target_os = "macos")]
    let probed = cmd_stdout("/usr/bin/sw_vers", &["-productVersion"])
        .or_else(|| cmd_stdout("sw_vers", &["-productVersion"]));

    #[cfg(all(unix, not(target_os = "macos")))]
    let probed = cmd_stdout("uname", &["-r"]);

    #[cfg(windows)]
    let probed = cmd_stdout("cmd", &["/C", "ver"]);

    probed.unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_schemes_are_rejected_before_any_launch() {
        assert_eq!(
            validate_external_url("javascript:alert(1)"),
            Err("Invalid protocol".to_string())
        );
        assert_eq!(
            validate_external_url("file:///etc/passwd"),
            Err("Invalid protocol".to_string())
        );
        assert_eq!(
            validate_external_url("suna://auth/callback"),
            Err("Invalid protocol".to_string())
        );
    }

    #[test]
    fn browser_schemes_are_accepted() {
        assert!(validate_external_url("https://example.com").is_ok());
        assert!(validate_external_url("http://example.com/path?q=1").is_ok());
        assert!(validate_external_url("mailto:support@suna.so").is_ok());
    }

    #[test]
    fn unparseable_input_reports_the_parse_failure() {
        let err = validate_external_url("not a url").unwrap_err();
        assert_ne!(err, "Invalid protocol");
    }

    #[test]
    fn platform_info_reports_compile_time_target() {
        let info = get_platform_info();
        assert_eq!(info.platform, std::env::consts::OS);
        assert_eq!(info.arch, std::env::consts::ARCH);
        assert!(!info.version.is_empty());
    }
}
