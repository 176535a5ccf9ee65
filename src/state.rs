use crate::audio::Recorder;
use crate::config::EngineConfig;
use crate::coordinator::CycleMachine;
use crate::overlay::OverlayManager;
use crate::settings::{Settings, SettingsStore};
use crate::sidecar::ResolvedCli;
use std::collections::HashSet;
use std::sync::atomic::AtomicU64;
use std::sync::Mutex;

/// Everything Tauri manages for the engine. One mutex per component, no
/// nesting: lock, copy what you need, drop, then act.
pub struct AppState {
    pub config: EngineConfig,
    pub store: SettingsStore,
    pub settings: Mutex<Settings>,
    pub recorder: Mutex<Recorder>,
    pub cycle: Mutex<CycleMachine>,
    pub overlays: Mutex<OverlayManager>,
    pub downloads: Mutex<HashSet<String>>,
    /// CLI resolution is probed at start and reused at stop.
    pub resolved_cli: Mutex<Option<ResolvedCli>>,
    /// Bumped by cancel; an in-flight transcription that outlives it drops
    /// its output instead of publishing it.
    pub cancel_epoch: AtomicU64,
}

impl AppState {
    pub fn new(config: EngineConfig) -> Self {
        let store = SettingsStore::new(config.settings_path());
        let settings = store.load_or_recover();
        Self {
            config,
            store,
            settings: Mutex::new(settings),
            recorder: Mutex::new(Recorder::new()),
            cycle: Mutex::new(CycleMachine::default()),
            overlays: Mutex::new(OverlayManager::default()),
            downloads: Mutex::new(HashSet::new()),
            resolved_cli: Mutex::new(None),
            cancel_epoch: AtomicU64::new(0),
        }
    }

    pub fn settings_snapshot(&self) -> Settings {
        self.settings.lock().expect("settings lock poisoned").clone()
    }

    /// Mutate settings under the lock, then persist the result atomically.
    pub fn update_settings<F>(&self, apply: F) -> Result<Settings, crate::errors::AppError>
    where
        F: FnOnce(&mut Settings),
    {
        let updated = {
            let mut guard = self.settings.lock().expect("settings lock poisoned");
            apply(&mut guard);
            guard.clone()
        };
        self.store.save(&updated)?;
        Ok(updated)
    }
}
