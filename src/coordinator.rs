use crate::audio;
use crate::errors::{AppError, ErrorEvent};
use crate::models::resolve_active_model_path;
use crate::overlay::{publish_pill, PillState};
use crate::sidecar;
use crate::state::AppState;
use crate::transcription;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::thread;
use tauri::{AppHandle, Emitter, Manager};
use tracing::{info, warn};

/// Dictation cycle phases driven by global-key edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CyclePhase {
    #[default]
    Idle,
    StartInFlight,
    Listening,
    StopInFlight,
}

/// Follow-up work the machine asks the driver to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleAction {
    BeginStart,
    BeginStop,
}

/// Edge-driven state machine with two explicit latches: `stop_requested`
/// covers a release that lands while the mic is still warming up, and
/// `queued_start` covers a press that lands while the previous cycle is
/// still stopping. Each down-up cycle yields exactly one transcript or
/// error event.
#[derive(Debug, Default)]
pub struct CycleMachine {
    phase: CyclePhase,
    stop_requested: bool,
    queued_start: bool,
}

impl CycleMachine {
    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn on_edge_down(&mut self) -> Option<CycleAction> {
        match self.phase {
            CyclePhase::Idle => {
                self.phase = CyclePhase::StartInFlight;
                self.stop_requested = false;
                Some(CycleAction::BeginStart)
            }
            CyclePhase::StopInFlight => {
                self.queued_start = true;
                None
            }
            CyclePhase::StartInFlight | CyclePhase::Listening => None,
        }
    }

    pub fn on_edge_up(&mut self) -> Option<CycleAction> {
        match self.phase {
            CyclePhase::StartInFlight => {
                self.stop_requested = true;
                None
            }
            CyclePhase::Listening => {
                self.phase = CyclePhase::StopInFlight;
                Some(CycleAction::BeginStop)
            }
            CyclePhase::StopInFlight => {
                self.queued_start = false;
                None
            }
            CyclePhase::Idle => None,
        }
    }

    pub fn on_start_finished(&mut self, ok: bool) -> Option<CycleAction> {
        if self.phase != CyclePhase::StartInFlight {
            return None;
        }
        if !ok {
            self.phase = CyclePhase::Idle;
            self.stop_requested = false;
            return None;
        }
        self.phase = CyclePhase::Listening;
        if self.stop_requested {
            self.stop_requested = false;
            self.phase = CyclePhase::StopInFlight;
            return Some(CycleAction::BeginStop);
        }
        None
    }

    pub fn on_stop_finished(&mut self) -> Option<CycleAction> {
        if self.phase != CyclePhase::StopInFlight {
            return None;
        }
        self.phase = CyclePhase::Idle;
        if self.queued_start {
            self.queued_start = false;
            self.phase = CyclePhase::StartInFlight;
            return Some(CycleAction::BeginStart);
        }
        None
    }

    pub fn reset(&mut self) {
        self.phase = CyclePhase::Idle;
        self.stop_requested = false;
        self.queued_start = false;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DictationStateEvent {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

pub fn emit_state(app: &AppHandle, state: &'static str, error: Option<String>, transcript: Option<String>) {
    let _ = app.emit(
        "dictation:state-changed",
        DictationStateEvent {
            state,
            error,
            transcript,
        },
    );
}

fn emit_error_event(app: &AppHandle, error: &AppError, context: &str) {
    warn!("{}: {}", context, error);
    let _ = app.emit("app:error", ErrorEvent::new(error.clone()).with_context(context));
}

/// Global-key down edge. Publishes the impulse, then asks the machine what
/// to do; heavy work always leaves the event thread.
pub fn handle_edge_down(app: &AppHandle) {
    let _ = app.emit("dictation:hotkey-triggered", ());
    let action = {
        let state = app.state::<AppState>();
        let mut machine = state.cycle.lock().expect("cycle lock poisoned");
        machine.on_edge_down()
    };
    run_action(app, action);
}

pub fn handle_edge_up(app: &AppHandle) {
    let action = {
        let state = app.state::<AppState>();
        let mut machine = state.cycle.lock().expect("cycle lock poisoned");
        machine.on_edge_up()
    };
    run_action(app, action);
}

fn run_action(app: &AppHandle, action: Option<CycleAction>) {
    match action {
        Some(CycleAction::BeginStart) => {
            let app = app.clone();
            thread::spawn(move || start_worker(&app));
        }
        Some(CycleAction::BeginStop) => {
            let app = app.clone();
            thread::spawn(move || stop_worker(&app));
        }
        None => {}
    }
}

fn start_worker(app: &AppHandle) {
    let result = start_cycle_blocking(app);
    let follow = {
        let state = app.state::<AppState>();
        let mut machine = state.cycle.lock().expect("cycle lock poisoned");
        machine.on_start_finished(result.is_ok())
    };
    if let Err(err) = result {
        emit_error_event(app, &err, "start dictation");
        emit_state(app, "error", Some(err.to_string()), None);
        publish_pill(app, PillState::Error, err.title());
        return;
    }
    run_action(app, follow);
}

fn stop_worker(app: &AppHandle) {
    match stop_cycle_blocking(app) {
        Ok(transcript) => {
            crate::deliver_transcript(app, &transcript);
        }
        // Cancelled mid-cycle, or nothing was captured; not a failure.
        Err(AppError::NotRunning) => {}
        Err(err) => {
            emit_error_event(app, &err, "stop dictation");
        }
    }

    let follow = {
        let state = app.state::<AppState>();
        let mut machine = state.cycle.lock().expect("cycle lock poisoned");
        machine.on_stop_finished()
    };
    run_action(app, follow);
}

/// Readiness check plus mic start. Blocks the caller for up to the mic-open
/// timeout; publishes `listening` on success.
pub fn start_cycle_blocking(app: &AppHandle) -> Result<(), AppError> {
    let state = app.state::<AppState>();
    let settings = state.settings_snapshot();

    // A start only proceeds when both the model and the CLI are in place.
    resolve_active_model_path(&state.config, &settings)?;
    let cli = sidecar::resolve(&state.config).ok_or_else(|| {
        AppError::SetupIncomplete(
            "whisper-cli executable not found; install whisper.cpp or set WHISPER_CLI_PATH"
                .to_string(),
        )
    })?;
    *state.resolved_cli.lock().expect("cli lock poisoned") = Some(cli);

    {
        let mut recorder = state.recorder.lock().expect("recorder lock poisoned");
        recorder.start(state.config.mic_open_timeout_ms)?;
    }

    info!("dictation listening");
    emit_state(app, "listening", None, None);
    publish_pill(app, PillState::Live, "Listening");
    Ok(())
}

/// Join the capture, run transcription, publish the terminal state for this
/// cycle, and return the transcript.
pub fn stop_cycle_blocking(app: &AppHandle) -> Result<String, AppError> {
    let state = app.state::<AppState>();
    let epoch = state.cancel_epoch.load(Ordering::SeqCst);

    let raw = {
        let mut recorder = state.recorder.lock().expect("recorder lock poisoned");
        recorder.stop()?
    };

    emit_state(app, "processing", None, None);
    publish_pill(app, PillState::Working, "Transcribing");

    let result = (|| -> Result<String, AppError> {
        let conditioned = audio::condition(&raw)?;
        let settings = state.settings_snapshot();
        let model_path = resolve_active_model_path(&state.config, &settings)?;
        let cli = state
            .resolved_cli
            .lock()
            .expect("cli lock poisoned")
            .clone()
            .or_else(|| sidecar::resolve(&state.config))
            .ok_or_else(|| {
                AppError::SetupIncomplete("whisper-cli executable not found".to_string())
            })?;
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        transcription::transcribe(&conditioned, &model_path, &cli, cores)
    })();

    // A cancel that landed while the CLI was running wins: the cycle was
    // already reset and published as idle, so the output is dropped.
    if state.cancel_epoch.load(Ordering::SeqCst) != epoch {
        info!("dictation cancelled while transcription was in flight; dropping output");
        return Err(AppError::NotRunning);
    }

    match &result {
        Ok(transcript) => {
            info!("transcription finished ({} chars)", transcript.len());
            emit_state(app, "idle", None, Some(transcript.clone()));
            publish_pill(app, PillState::Ok, "Done");
        }
        Err(err) => {
            emit_state(app, "error", Some(err.to_string()), None);
            publish_pill(app, PillState::Error, err.title());
        }
    }

    result
}

/// Cancel is safe in any state: capture is interrupted, samples are
/// discarded, and the machine returns to idle. An in-flight transcription
/// is allowed to finish; its output is dropped by the cycle reset.
pub fn cancel_cycle(app: &AppHandle) {
    let state = app.state::<AppState>();
    state.cancel_epoch.fetch_add(1, Ordering::SeqCst);
    {
        let mut recorder = state.recorder.lock().expect("recorder lock poisoned");
        recorder.cancel();
    }
    {
        let mut machine = state.cycle.lock().expect("cycle lock poisoned");
        machine.reset();
    }
    emit_state(app, "idle", None, None);
    publish_pill(app, PillState::Idle, "");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_cycle_starts_then_stops_once() {
        let mut machine = CycleMachine::default();
        assert_eq!(machine.on_edge_down(), Some(CycleAction::BeginStart));
        assert_eq!(machine.phase(), CyclePhase::StartInFlight);
        assert_eq!(machine.on_start_finished(true), None);
        assert_eq!(machine.phase(), CyclePhase::Listening);
        assert_eq!(machine.on_edge_up(), Some(CycleAction::BeginStop));
        assert_eq!(machine.phase(), CyclePhase::StopInFlight);
        assert_eq!(machine.on_stop_finished(), None);
        assert_eq!(machine.phase(), CyclePhase::Idle);
    }

    #[test]
    fn tap_and_release_during_warmup_still_stops_exactly_once() {
        // Down and up arrive 50 ms apart while the mic is opening.
        let mut machine = CycleMachine::default();
        assert_eq!(machine.on_edge_down(), Some(CycleAction::BeginStart));
        assert_eq!(machine.on_edge_up(), None); // latched, not dropped
        assert_eq!(machine.on_start_finished(true), Some(CycleAction::BeginStop));
        assert_eq!(machine.phase(), CyclePhase::StopInFlight);
        assert_eq!(machine.on_stop_finished(), None);
        assert_eq!(machine.phase(), CyclePhase::Idle);
    }

    #[test]
    fn failed_start_returns_to_idle_and_clears_latch() {
        let mut machine = CycleMachine::default();
        machine.on_edge_down();
        machine.on_edge_up();
        assert_eq!(machine.on_start_finished(false), None);
        assert_eq!(machine.phase(), CyclePhase::Idle);
        // The next press starts a fresh cycle.
        assert_eq!(machine.on_edge_down(), Some(CycleAction::BeginStart));
        assert_eq!(machine.on_start_finished(true), None);
        assert_eq!(machine.phase(), CyclePhase::Listening);
    }

    #[test]
    fn press_during_stop_queues_a_deferred_start() {
        let mut machine = CycleMachine::default();
        machine.on_edge_down();
        machine.on_start_finished(true);
        assert_eq!(machine.on_edge_up(), Some(CycleAction::BeginStop));
        // Next cycle begins while the previous one is still stopping.
        assert_eq!(machine.on_edge_down(), None);
        assert_eq!(machine.on_stop_finished(), Some(CycleAction::BeginStart));
        assert_eq!(machine.phase(), CyclePhase::StartInFlight);
    }

    #[test]
    fn release_during_stop_cancels_the_queued_start() {
        let mut machine = CycleMachine::default();
        machine.on_edge_down();
        machine.on_start_finished(true);
        machine.on_edge_up();
        machine.on_edge_down();
        machine.on_edge_up();
        assert_eq!(machine.on_stop_finished(), None);
        assert_eq!(machine.phase(), CyclePhase::Idle);
    }

    #[test]
    fn repeated_down_edges_do_not_double_start() {
        let mut machine = CycleMachine::default();
        assert_eq!(machine.on_edge_down(), Some(CycleAction::BeginStart));
        assert_eq!(machine.on_edge_down(), None);
        machine.on_start_finished(true);
        assert_eq!(machine.on_edge_down(), None);
    }

    #[test]
    fn cycles_produce_one_terminal_event_each() {
        // Count BeginStart/BeginStop pairs over a run of mixed edges.
        let mut machine = CycleMachine::default();
        let mut starts = 0;
        let mut stops = 0;

        for _ in 0..3 {
            if machine.on_edge_down() == Some(CycleAction::BeginStart) {
                starts += 1;
            }
            match machine.on_start_finished(true) {
                Some(CycleAction::BeginStop) => stops += 1,
                _ => {}
            }
            if machine.on_edge_up() == Some(CycleAction::BeginStop) {
                stops += 1;
            }
            match machine.on_stop_finished() {
                Some(CycleAction::BeginStart) => starts += 1,
                _ => {}
            }
        }

        assert_eq!(starts, stops);
    }

    #[test]
    fn reset_clears_everything() {
        let mut machine = CycleMachine::default();
        machine.on_edge_down();
        machine.on_edge_up();
        machine.reset();
        assert_eq!(machine.phase(), CyclePhase::Idle);
        assert_eq!(machine.on_edge_down(), Some(CycleAction::BeginStart));
    }
}
