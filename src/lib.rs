// Dicktaint - local push-to-talk dictation engine

pub mod audio;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod device;
pub mod errors;
#[cfg(target_os = "macos")]
mod hotkey_macos;
pub mod hotkeys;
pub mod models;
pub mod overlay;
pub mod server;
pub mod settings;
pub mod sidecar;
pub mod state;
pub mod transcription;

use crate::config::EngineConfig;
use crate::device::DeviceProfile;
use crate::errors::{AppError, ErrorEvent};
use crate::models::ModelSelection;
use crate::state::AppState;
use arboard::Clipboard;
use enigo::{Enigo, Key, KeyboardControllable};
use serde::Serialize;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tauri::{AppHandle, Emitter, Manager, State, WebviewUrl};
use tauri_plugin_global_shortcut::{GlobalShortcutExt, ShortcutState};
use tracing::{error, info, warn};

const WHISPER_SETUP_URL: &str = "https://github.com/ggerganov/whisper.cpp";

/// Initialize logging with tracing.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Dicktaint starting up");
}

/// Emit an error event to the frontend.
pub(crate) fn emit_error(app: &AppHandle, error: AppError, context: Option<&str>) {
    let event = if let Some(ctx) = context {
        ErrorEvent::new(error.clone()).with_context(ctx)
    } else {
        ErrorEvent::new(error.clone())
    };

    error!("{}: {}", error.title(), error);
    let _ = app.emit("app:error", event);
}

// ---------------------------------------------------------------------------
// Onboarding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct DictationOnboardingPayload {
    pub onboarding_required: bool,
    pub selected_model_id: Option<String>,
    pub selected_model_path: Option<String>,
    pub selected_model_exists: bool,
    pub whisper_cli_available: bool,
    pub whisper_cli_path: Option<String>,
    pub models_dir: String,
    pub device: DeviceProfile,
    pub models: Vec<catalog::ModelOption>,
}

fn onboarding_required(selected_model_exists: bool, cli_available: bool) -> bool {
    !selected_model_exists || !cli_available
}

fn build_onboarding_payload(app: &AppHandle) -> DictationOnboardingPayload {
    let state = app.state::<AppState>();
    let settings = state.settings_snapshot();
    let profile = device::profile();
    let models_dir = state.config.models_dir();

    let (selected_model_id, selected_model_path) =
        if let Some(override_path) = &state.config.model_path_override {
            (
                Some("env-override".to_string()),
                Some(override_path.clone()),
            )
        } else {
            (
                settings.selected_model_id.clone(),
                settings.selected_model_path.clone(),
            )
        };
    let selected_model_exists = selected_model_path
        .as_deref()
        .map(|path| Path::new(path).exists())
        .unwrap_or(false);

    let cli = sidecar::resolve(&state.config);
    let whisper_cli_available = cli.is_some();
    let whisper_cli_path = cli.map(|cli| cli.path.to_string_lossy().to_string());

    let models = catalog::evaluate(&profile, &models_dir, settings.selected_model_id.as_deref());

    DictationOnboardingPayload {
        onboarding_required: onboarding_required(selected_model_exists, whisper_cli_available),
        selected_model_id,
        selected_model_path,
        selected_model_exists,
        whisper_cli_available,
        whisper_cli_path,
        models_dir: models_dir.to_string_lossy().to_string(),
        device: profile,
        models,
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[tauri::command]
async fn get_dictation_onboarding(app: AppHandle) -> Result<DictationOnboardingPayload, AppError> {
    // The CLI probe can take up to 2 s per candidate; keep it off the UI loop.
    tauri::async_runtime::spawn_blocking(move || build_onboarding_payload(&app))
        .await
        .map_err(|err| AppError::Internal(format!("onboarding task failed: {}", err)))
}

#[tauri::command]
async fn install_dictation_model(
    model: String,
    app: AppHandle,
) -> Result<ModelSelection, AppError> {
    tauri::async_runtime::spawn_blocking(move || models::install_model(&app, &model))
        .await
        .map_err(|err| AppError::Internal(format!("install task failed: {}", err)))?
}

#[tauri::command]
async fn delete_dictation_model(model: String, app: AppHandle) -> Result<(), AppError> {
    tauri::async_runtime::spawn_blocking(move || models::delete_model(&app, &model))
        .await
        .map_err(|err| AppError::Internal(format!("delete task failed: {}", err)))?
}

#[tauri::command]
async fn start_native_dictation(app: AppHandle) -> Result<(), AppError> {
    tauri::async_runtime::spawn_blocking(move || coordinator::start_cycle_blocking(&app))
        .await
        .map_err(|err| AppError::Internal(format!("start task failed: {}", err)))?
}

#[tauri::command]
async fn stop_native_dictation(app: AppHandle) -> Result<String, AppError> {
    let transcript =
        tauri::async_runtime::spawn_blocking(move || coordinator::stop_cycle_blocking(&app))
            .await
            .map_err(|err| AppError::Internal(format!("stop task failed: {}", err)))??;
    Ok(transcript)
}

#[tauri::command]
async fn cancel_native_dictation(app: AppHandle) -> Result<(), AppError> {
    tauri::async_runtime::spawn_blocking(move || coordinator::cancel_cycle(&app))
        .await
        .map_err(|err| AppError::Internal(format!("cancel task failed: {}", err)))
}

#[tauri::command]
fn open_whisper_setup_page() -> Result<(), AppError> {
    open_external(WHISPER_SETUP_URL)
}

#[tauri::command]
fn get_dictation_trigger(state: State<'_, AppState>) -> Option<String> {
    state.settings_snapshot().dictation_trigger
}

#[tauri::command]
fn set_dictation_trigger(trigger: String, app: AppHandle) -> Result<String, AppError> {
    let binding = hotkeys::parse_binding(&trigger)?;
    let canonical = binding.to_string();

    // Register first so a plugin rejection never clobbers the stored binding.
    register_dictation_trigger(&app, Some(&canonical))?;

    let state = app.state::<AppState>();
    state.update_settings(|settings| {
        settings.dictation_trigger = Some(canonical.clone());
    })?;
    info!("dictation trigger set to {}", canonical);
    Ok(canonical)
}

#[tauri::command]
fn clear_dictation_trigger(app: AppHandle) -> Result<(), AppError> {
    register_dictation_trigger(&app, None)?;
    let state = app.state::<AppState>();
    state.update_settings(|settings| {
        settings.dictation_trigger = None;
    })?;
    info!("dictation trigger cleared");
    Ok(())
}

#[tauri::command]
fn set_focused_field_insert_enabled(
    enabled: bool,
    state: State<'_, AppState>,
) -> Result<(), AppError> {
    state.update_settings(|settings| {
        settings.focused_field_insert_enabled = enabled;
    })?;
    Ok(())
}

#[tauri::command]
fn insert_text_into_focused_field(text: String) -> Result<(), AppError> {
    paste_text(&text)
}

// ---------------------------------------------------------------------------
// Hotkey registration
// ---------------------------------------------------------------------------

#[cfg(target_os = "macos")]
static FN_MONITOR_SPAWNED: AtomicBool = AtomicBool::new(false);
static FN_MONITOR_ENABLED: AtomicBool = AtomicBool::new(false);

/// (Re)register the global dictation trigger. `None` unregisters everything.
/// A bare `Fn` binding is routed to the flags-changed monitor on macOS and
/// reported inactive elsewhere; the stored binding is kept either way.
pub(crate) fn register_dictation_trigger(
    app: &AppHandle,
    trigger: Option<&str>,
) -> Result<(), AppError> {
    let manager = app.global_shortcut();
    let _ = manager.unregister_all();
    FN_MONITOR_ENABLED.store(false, Ordering::SeqCst);

    let Some(raw) = trigger else {
        return Ok(());
    };
    let binding = hotkeys::parse_binding(raw)?;

    if binding.is_fn_only() {
        #[cfg(target_os = "macos")]
        {
            FN_MONITOR_ENABLED.store(true, Ordering::SeqCst);
            start_fn_cycle_monitor(app);
            info!("Fn dictation trigger active");
            return Ok(());
        }
        #[cfg(not(target_os = "macos"))]
        {
            let inactive = AppError::HotkeyInactive(format!(
                "the Fn key can only be monitored on macOS (current platform: {})",
                std::env::consts::OS
            ));
            emit_error(app, inactive, Some("Hotkey Registration"));
            return Ok(());
        }
    }

    let accelerator = binding.plugin_accelerator();
    info!("registering dictation trigger: {}", accelerator);
    manager
        .on_shortcut(accelerator.as_str(), |app, _shortcut, event| {
            if event.state == ShortcutState::Pressed {
                coordinator::handle_edge_down(app);
            } else {
                coordinator::handle_edge_up(app);
            }
        })
        .map_err(|err| {
            let invalid = AppError::HotkeyInvalid(format!(
                "could not register '{}': {}; try a different combination",
                accelerator, err
            ));
            emit_error(app, invalid.clone(), Some("Hotkey Registration"));
            invalid
        })?;

    Ok(())
}

#[cfg(target_os = "macos")]
fn start_fn_cycle_monitor(app: &AppHandle) {
    use crate::hotkey_macos::{start_fn_listener, FnEvent};

    if FN_MONITOR_SPAWNED.swap(true, Ordering::SeqCst) {
        return;
    }

    let (tx, rx) = std::sync::mpsc::channel::<FnEvent>();
    let _listener = start_fn_listener(tx);

    let app = app.clone();
    thread::spawn(move || {
        for event in rx {
            if !FN_MONITOR_ENABLED.load(Ordering::SeqCst) {
                continue;
            }
            match event {
                FnEvent::Pressed => coordinator::handle_edge_down(&app),
                FnEvent::Released => coordinator::handle_edge_up(&app),
                FnEvent::TapFailed => {
                    emit_error(
                        &app,
                        AppError::HotkeyInactive(
                            "Fn monitoring requires the Accessibility permission".to_string(),
                        ),
                        Some("Fn Monitor"),
                    );
                    break;
                }
            }
        }
    });
}

// ---------------------------------------------------------------------------
// Focused-field insertion
// ---------------------------------------------------------------------------

/// Push a finished transcript toward its destinations. The state-changed
/// event already carries it to the in-app draft; when the user enabled
/// focused-field insert and is working in another app, it is also pasted
/// into the external field.
pub(crate) fn deliver_transcript(app: &AppHandle, text: &str) {
    let state = app.state::<AppState>();
    if !state.settings_snapshot().focused_field_insert_enabled {
        return;
    }
    if main_window_focused(app) {
        return;
    }
    if let Err(err) = paste_text(text) {
        emit_error(app, err, Some("Focused-field insert"));
    }
}

fn main_window_focused(app: &AppHandle) -> bool {
    app.get_webview_window("main")
        .and_then(|window| window.is_focused().ok())
        .unwrap_or(false)
}

fn paste_text(text: &str) -> Result<(), AppError> {
    let mut clipboard =
        Clipboard::new().map_err(|err| AppError::Internal(format!("clipboard: {}", err)))?;
    let previous = clipboard.get_text().ok();
    clipboard
        .set_text(text.to_string())
        .map_err(|err| AppError::Internal(format!("clipboard: {}", err)))?;

    send_paste_keystroke();

    if let Some(previous) = previous {
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            if let Ok(mut clipboard) = Clipboard::new() {
                let _ = clipboard.set_text(previous);
            }
        });
    }

    Ok(())
}

fn send_paste_keystroke() {
    let mut enigo = Enigo::new();
    if cfg!(target_os = "macos") {
        enigo.key_down(Key::Meta);
        enigo.key_click(Key::Layout('v'));
        enigo.key_up(Key::Meta);
    } else {
        enigo.key_down(Key::Control);
        enigo.key_click(Key::Layout('v'));
        enigo.key_up(Key::Control);
    }
}

fn open_external(url: &str) -> Result<(), AppError> {
    let spawned = if cfg!(target_os = "macos") {
        Command::new("open").arg(url).spawn()
    } else if cfg!(target_os = "windows") {
        Command::new("cmd").args(["/C", "start", "", url]).spawn()
    } else {
        Command::new("xdg-open").arg(url).spawn()
    };
    spawned
        .map(|_| ())
        .map_err(|err| AppError::Internal(format!("could not open {}: {}", url, err)))
}

// ---------------------------------------------------------------------------
// Window lifecycle
// ---------------------------------------------------------------------------

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn show_main_window(app: &AppHandle) {
    if let Some(window) = app.get_webview_window("main") {
        let _ = window.show();
        let _ = window.set_skip_taskbar(false);
        let _ = window.set_focus();
    }
}

fn hide_main_window(app: &AppHandle) {
    if let Some(window) = app.get_webview_window("main") {
        let _ = window.hide();
        let _ = window.set_skip_taskbar(true);
    }
}

// ---------------------------------------------------------------------------
// App entry
// ---------------------------------------------------------------------------

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    init_logging();

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("failed to initialize engine configuration: {}", err);
            return;
        }
    };

    tauri::Builder::default()
        .plugin(tauri_plugin_global_shortcut::Builder::new().build())
        .setup(move |app| {
            let start_hidden = config.start_hidden;
            let host = config.host.clone();
            let port = config.port;
            let public_dir = config.public_dir.clone();

            app.manage(AppState::new(config));

            let main = tauri::WebviewWindowBuilder::new(
                app.handle(),
                "main",
                WebviewUrl::App("index.html".into()),
            )
            .title("Dicktaint")
            .inner_size(980.0, 700.0)
            .visible(!start_hidden)
            .build()?;
            if start_hidden {
                let _ = main.set_skip_taskbar(true);
            }

            if let Err(err) = overlay::sync_overlay_windows(app.handle()) {
                warn!("overlay windows unavailable: {}", err);
            }

            server::spawn(host, port, public_dir);

            let settings = app.state::<AppState>().settings_snapshot();
            if let Some(trigger) = settings.dictation_trigger.clone() {
                if let Err(err) = register_dictation_trigger(app.handle(), Some(&trigger)) {
                    warn!("stored dictation trigger could not be registered: {}", err);
                }
            }

            Ok(())
        })
        .on_window_event(|window, event| {
            if window.label() != "main" {
                return;
            }
            match event {
                // Hide-on-close: the engine keeps running in the background.
                tauri::WindowEvent::CloseRequested { api, .. } => {
                    api.prevent_close();
                    hide_main_window(window.app_handle());
                }
                // Crossing onto another display is the cheapest signal we
                // get for monitor layout changes; the sync is idempotent.
                tauri::WindowEvent::Moved(_) | tauri::WindowEvent::ScaleFactorChanged { .. } => {
                    let _ = overlay::sync_overlay_windows(window.app_handle());
                }
                _ => {}
            }
        })
        .invoke_handler(tauri::generate_handler![
            get_dictation_onboarding,
            install_dictation_model,
            delete_dictation_model,
            start_native_dictation,
            stop_native_dictation,
            cancel_native_dictation,
            open_whisper_setup_page,
            get_dictation_trigger,
            set_dictation_trigger,
            clear_dictation_trigger,
            set_focused_field_insert_enabled,
            insert_text_into_focused_field,
        ])
        .build(tauri::generate_context!())
        .expect("error while building tauri application")
        .run(|_app, _event| {
            // Dock/taskbar reopen re-shows the hidden shell on macOS.
            #[cfg(target_os = "macos")]
            if let tauri::RunEvent::Reopen { .. } = _event {
                show_main_window(_app);
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onboarding_requires_both_model_and_cli() {
        assert!(!onboarding_required(true, true));
        assert!(onboarding_required(false, true));
        assert!(onboarding_required(true, false));
        assert!(onboarding_required(false, false));
    }
}
