//! Suna desktop shell: hosts the web frontend in a locked-down window and
//! bridges OS-level events (deep links, second-instance activation) into it
//! over a narrow, validated channel.

pub mod auth;
pub mod commands;
pub mod config;
pub mod deep_link;
pub mod settings;
pub mod window;

use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;
use tauri::{AppHandle, Emitter, Manager};

use crate::auth::{DeliverySource, ExchangeCoordinator, ExchangeOutcome};
use crate::config::{
    AppConfig, AUTH_CALLBACK_EVENT, LANDING_ROUTE, MAIN_WINDOW_LABEL, PROTOCOL_SCHEME,
};
use crate::deep_link::{AuthCallbackPayload, CallbackSink, DeepLinkDispatcher, SubscriptionHandle};
use crate::settings::SettingsStore;

/// Holds the live deep-link subscription for the main window so the
/// destroy handler can detach exactly the subscriber it owns.
#[derive(Default)]
struct AuthBridgeState {
    subscription: Mutex<Option<SubscriptionHandle>>,
}

/// Delivery target for parsed callbacks: notifies the webview over the
/// one-way event channel and drives the exchange coordinator.
struct WebviewAuthSink {
    app: AppHandle,
    coordinator: Arc<ExchangeCoordinator>,
}

impl CallbackSink for WebviewAuthSink {
    fn deliver(&self, payload: AuthCallbackPayload) {
        if let Err(err) = self
            .app
            .emit_to(MAIN_WINDOW_LABEL, AUTH_CALLBACK_EVENT, &payload)
        {
            warn!("[shell] failed to notify webview of auth callback: {err}");
        }

        let app = self.app.clone();
        let coordinator = Arc::clone(&self.coordinator);
        tauri::async_runtime::spawn(async move {
            if coordinator.process(DeliverySource::Bridge(payload)).await
                == ExchangeOutcome::Completed
            {
                navigate_to_landing(&app);
            }
        });
    }
}

fn navigate_to_landing(app: &AppHandle) {
    let Some(window) = app.get_webview_window(MAIN_WINDOW_LABEL) else {
        return;
    };
    let route = serde_json::to_string(LANDING_ROUTE).unwrap_or_else(|_| "\"/\"".into());
    let _ = window.eval(&format!("window.location.assign({route});"));
}

fn attach_auth_bridge(app: &AppHandle) {
    let dispatcher = app.state::<DeepLinkDispatcher>();
    let coordinator = Arc::clone(&*app.state::<Arc<ExchangeCoordinator>>());
    let sink = Arc::new(WebviewAuthSink {
        app: app.clone(),
        coordinator,
    });
    let handle = dispatcher.attach(sink);

    let bridge = app.state::<AuthBridgeState>();
    let stale = bridge.subscription.lock().replace(handle);
    if let Some(stale) = stale {
        // A reload re-attached before the old page's teardown ran; the
        // stale handle is already superseded, detach is a no-op.
        dispatcher.detach(stale);
    }
}

fn detach_auth_bridge(app: &AppHandle) {
    let bridge = app.state::<AuthBridgeState>();
    let handle = bridge.subscription.lock().take();
    if let Some(handle) = handle {
        app.state::<DeepLinkDispatcher>().detach(handle);
    }
}

fn focus_main_window(app: &AppHandle) {
    if let Some(window) = app.get_webview_window(MAIN_WINDOW_LABEL) {
        if window.is_minimized().unwrap_or(false) {
            let _ = window.unminimize();
        }
        let _ = window.set_focus();
    }
}

pub fn run() {
    let config = AppConfig::from_env();

    let log_builder = tauri_plugin_log::Builder::default()
        .level(if cfg!(debug_assertions) {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .clear_targets()
        .targets([
            tauri_plugin_log::Target::new(tauri_plugin_log::TargetKind::Stdout),
            tauri_plugin_log::Target::new(tauri_plugin_log::TargetKind::Webview),
        ]);

    let setup_config = config.clone();

    let app = tauri::Builder::default()
        // Must be registered first: a duplicate launch forwards its argv to
        // this instance and exits before touching any other resource.
        .plugin(tauri_plugin_single_instance::init(|app, argv, _cwd| {
            info!("[shell] second instance rejected, argv forwarded");
            if let Some(link) = deep_link::deep_link_arg(&argv, PROTOCOL_SCHEME) {
                app.state::<DeepLinkDispatcher>().handle_url(&link);
            }
            focus_main_window(app);
        }))
        .plugin(tauri_plugin_deep_link::init())
        .plugin(tauri_plugin_shell::init())
        .plugin(tauri_plugin_updater::Builder::new().build())
        .plugin(log_builder.build())
        .manage(config)
        .manage(DeepLinkDispatcher::new(PROTOCOL_SCHEME))
        .manage(AuthBridgeState::default())
        .setup(move |app| {
            let handle = app.handle().clone();
            let config = setup_config;

            info!(
                "[shell] starting v{} on {} ({}), dev mode: {}",
                handle.package_info().version,
                std::env::consts::OS,
                std::env::consts::ARCH,
                config.dev_mode
            );

            let store = SettingsStore::initialise(&handle)?;
            app.manage(store);
            app.manage(Arc::new(ExchangeCoordinator::new(&config)));

            // Deep-link sources, all normalized into the dispatcher. The
            // window does not exist yet, so anything arriving now buffers.
            {
                use tauri_plugin_deep_link::DeepLinkExt;

                #[cfg(any(target_os = "linux", all(debug_assertions, windows)))]
                {
                    if let Err(err) = app.deep_link().register(PROTOCOL_SCHEME) {
                        warn!("[shell] failed to register {PROTOCOL_SCHEME} scheme: {err}");
                    }
                }

                let open_url_handle = handle.clone();
                app.deep_link().on_open_url(move |event| {
                    let dispatcher = open_url_handle.state::<DeepLinkDispatcher>();
                    for url in event.urls() {
                        dispatcher.handle_url(url.as_str());
                    }
                });

                if let Ok(Some(urls)) = app.deep_link().get_current() {
                    let dispatcher = handle.state::<DeepLinkDispatcher>();
                    for url in urls {
                        dispatcher.handle_url(url.as_str());
                    }
                }
            }

            // Windows-style protocol delivery lands in our own argv.
            let args: Vec<String> = std::env::args().skip(1).collect();
            if let Some(link) = deep_link::deep_link_arg(&args, PROTOCOL_SCHEME) {
                handle.state::<DeepLinkDispatcher>().handle_url(&link);
            }

            window::create_main_window(&handle, &config)?;

            // Fire-and-forget startup update check in production.
            if !config.dev_mode {
                let update_handle = handle.clone();
                tauri::async_runtime::spawn(async move {
                    let result = commands::app::check_update_feed(&update_handle).await;
                    info!(
                        "[shell] startup update check: available={}",
                        result.available
                    );
                });
            }

            Ok(())
        })
        .on_page_load(|webview, payload| {
            // The rendering context becomes a valid delivery target only
            // once its page finished loading; re-attach on every load so a
            // reload replaces the previous subscriber.
            if webview.label() == MAIN_WINDOW_LABEL
                && matches!(payload.event(), tauri::webview::PageLoadEvent::Finished)
            {
                let window = webview.window();
                let _ = window.show();
                attach_auth_bridge(webview.app_handle());
            }
        })
        .on_window_event(|window, event| {
            if let tauri::WindowEvent::Destroyed = event {
                if window.label() == MAIN_WINDOW_LABEL {
                    // Delivery target gone: re-arm deep-link buffering.
                    detach_auth_bridge(window.app_handle());
                }
            }
        })
        .invoke_handler(tauri::generate_handler![
            commands::app::get_app_version,
            commands::app::get_platform_info,
            commands::app::get_auth_callback_url,
            commands::app::open_external_url,
            commands::app::check_for_updates,
            commands::store::store_get,
            commands::store::store_set,
            commands::store::store_delete,
        ])
        .build(tauri::generate_context!())
        .expect("failed to build Tauri application");

    app.run(handle_run_event);
}

/// macOS keeps running with all windows closed and re-creates the window
/// on dock activation; other platforms exit with the last window.
#[cfg(target_os = "macos")]
fn handle_run_event(app_handle: &AppHandle, event: tauri::RunEvent) {
    match event {
        tauri::RunEvent::ExitRequested { api, code, .. } => {
            if code.is_none() {
                api.prevent_exit();
            }
        }
        tauri::RunEvent::Reopen { .. } => {
            if app_handle.get_webview_window(MAIN_WINDOW_LABEL).is_none() {
                let config = app_handle.state::<AppConfig>();
                if let Err(err) = window::create_main_window(app_handle, &config) {
                    log::error!("[shell] failed to recreate window: {err:#}");
                }
            } else {
                focus_main_window(app_handle);
            }
        }
        _ => {}
    }
}

#[cfg(not(target_os = "macos"))]
fn handle_run_event(_app_handle: &AppHandle, _event: tauri::RunEvent) {}
