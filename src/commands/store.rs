//! Settings-store bridge commands. The webview only ever sees opaque keys
//! and JSON values; persistence and encryption stay on this side.

use log::error;
use serde_json::Value;
use tauri::State;

use crate::settings::SettingsStore;

#[tauri::command]
pub fn store_get(store: State<'_, SettingsStore>, key: String) -> Option<Value> {
    store.get(&key)
}

#[tauri::command]
pub fn store_set(store: State<'_, SettingsStore>, key: String, value: Value) -> bool {
    match store.set(&key, value) {
        Ok(()) => true,
        Err(err) => {
            error!("[bridge] failed to persist setting {key}: {err:#}");
            false
        }
    }
}

#[tauri::command]
pub fn store_delete(store: State<'_, SettingsStore>, key: String) -> bool {
    match store.delete(&key) {
        Ok(()) => true,
        Err(err) => {
            error!("[bridge] failed to delete setting {key}: {err:#}");
            false
        }
    }
}
