use serde::Serialize;
use std::collections::HashSet;
use tauri::{AppHandle, Emitter, Manager, WebviewUrl, WebviewWindow, WindowEvent};
use tracing::{info, warn};

/// Pill display states mirrored by the overlay webview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PillState {
    Idle,
    Working,
    Live,
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct PillStatus {
    pub message: String,
    pub state: PillState,
    pub visible: bool,
}

/// One pill window per monitor, keyed by monitor id.
#[derive(Debug, Clone)]
pub struct OverlayRecord {
    pub window_label: String,
    pub monitor_id: String,
    pub visible: bool,
}

#[derive(Debug, Default)]
pub struct OverlayManager {
    records: Vec<OverlayRecord>,
}

impl OverlayManager {
    pub fn records(&self) -> &[OverlayRecord] {
        &self.records
    }
}

fn monitor_id(monitor: &tauri::Monitor, index: usize) -> String {
    monitor
        .name()
        .map(|name| name.to_string())
        .unwrap_or_else(|| format!("monitor-{}", index))
}

/// Reconcile pill windows against the current monitor layout: create
/// missing ones, close orphans, never exceed `max_overlays`. Safe to call
/// again whenever monitors change.
pub fn sync_overlay_windows(app: &AppHandle) -> Result<(), String> {
    let max_overlays = app.state::<crate::state::AppState>().config.max_overlays;
    let monitors = app
        .available_monitors()
        .map_err(|err| format!("failed to enumerate monitors: {}", err))?;

    let mut desired: Vec<(String, tauri::Monitor)> = Vec::new();
    for (index, monitor) in monitors.into_iter().enumerate() {
        if desired.len() >= max_overlays {
            warn!("capping overlay windows at {}", max_overlays);
            break;
        }
        desired.push((monitor_id(&monitor, index), monitor));
    }

    let state = app.state::<crate::state::AppState>();
    let mut manager = state.overlays.lock().expect("overlay lock poisoned");

    let desired_ids: HashSet<String> = desired.iter().map(|(id, _)| id.clone()).collect();
    manager.records.retain(|record| {
        if desired_ids.contains(&record.monitor_id) {
            return true;
        }
        // destroy() bypasses the hide-on-close handler installed below.
        if let Some(window) = app.get_webview_window(&record.window_label) {
            let _ = window.destroy();
        }
        info!("closed pill window for detached monitor {}", record.monitor_id);
        false
    });

    for (index, (id, monitor)) in desired.iter().enumerate() {
        if manager.records.iter().any(|record| &record.monitor_id == id) {
            continue;
        }
        let label = format!("pill-{}", index);
        match create_pill_window(app, &label, monitor) {
            Ok(_) => manager.records.push(OverlayRecord {
                window_label: label,
                monitor_id: id.clone(),
                visible: true,
            }),
            Err(err) => warn!("failed to create pill window on {}: {}", id, err),
        }
    }

    Ok(())
}

/// Transparent, always-on-top, click-through status window pinned to the
/// top-right corner of its monitor.
fn create_pill_window(
    app: &AppHandle,
    label: &str,
    monitor: &tauri::Monitor,
) -> Result<WebviewWindow, String> {
    if let Some(existing) = app.get_webview_window(label) {
        return Ok(existing);
    }

    let window = tauri::WebviewWindowBuilder::new(app, label, WebviewUrl::App("overlay.html".into()))
        .title("Dicktaint Status")
        .inner_size(220.0, 48.0)
        .resizable(false)
        .decorations(false)
        .shadow(false)
        .transparent(true)
        .focusable(false)
        .always_on_top(true)
        .skip_taskbar(true)
        .visible(true)
        .build()
        .map_err(|err| format!("failed to create pill window: {}", err))?;

    let scale = monitor.scale_factor();
    let position = monitor.position();
    let size = monitor.size();
    let origin_x = position.x as f64 / scale;
    let origin_y = position.y as f64 / scale;
    let width = size.width as f64 / scale;
    let _ = window.set_position(tauri::Position::Logical(tauri::LogicalPosition {
        x: origin_x + width - 240.0,
        y: origin_y + 16.0,
    }));
    let _ = window.set_ignore_cursor_events(true);

    // Pills hide instead of closing; they come back on the next state change.
    let app_handle = app.clone();
    let label_owned = label.to_string();
    window.on_window_event(move |event| {
        if let WindowEvent::CloseRequested { api, .. } = event {
            api.prevent_close();
            if let Some(window) = app_handle.get_webview_window(&label_owned) {
                let _ = window.hide();
            }
        }
    });

    Ok(window)
}

/// Broadcast the pill state to every overlay window and to app listeners.
pub fn publish_pill(app: &AppHandle, state: PillState, message: &str) {
    let status = PillStatus {
        message: message.to_string(),
        state,
        visible: state != PillState::Idle,
    };

    let labels: Vec<String> = {
        let app_state = app.state::<crate::state::AppState>();
        let manager = app_state.overlays.lock().expect("overlay lock poisoned");
        manager
            .records
            .iter()
            .map(|record| record.window_label.clone())
            .collect()
    };

    for label in labels {
        if let Some(window) = app.get_webview_window(&label) {
            let _ = window.show();
            let _ = window.emit("pill-status", status.clone());
        }
    }
    let _ = app.emit("pill-status", status);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pill_visibility_follows_state() {
        for (state, visible) in [
            (PillState::Idle, false),
            (PillState::Working, true),
            (PillState::Live, true),
            (PillState::Ok, true),
            (PillState::Error, true),
        ] {
            let status = PillStatus {
                message: String::new(),
                state,
                visible: state != PillState::Idle,
            };
            assert_eq!(status.visible, visible);
        }
    }

    #[test]
    fn pill_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&PillState::Working).unwrap(), "\"working\"");
        assert_eq!(serde_json::to_string(&PillState::Ok).unwrap(), "\"ok\"");
    }
}
