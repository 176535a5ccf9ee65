use crate::errors::AppError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Persisted user selection. Keys the engine does not recognize are carried
/// in `extra` and written back verbatim on every save.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub selected_model_id: Option<String>,
    pub selected_model_path: Option<String>,
    pub dictation_trigger: Option<String>,
    pub focused_field_insert_enabled: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Exclusive owner of the on-disk settings file. All writes go through a
/// sibling temp file followed by a rename, so a crash mid-write leaves
/// either the old or the new content, never a truncated file.
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Absent file is an empty selection; a file that exists but does not
    /// parse is `ConfigCorrupt`.
    pub fn load(&self) -> Result<Settings, AppError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(value) => value,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Settings::default())
            }
            Err(err) => return Err(AppError::ConfigCorrupt(err.to_string())),
        };

        serde_json::from_str::<Settings>(&raw).map_err(|err| AppError::ConfigCorrupt(err.to_string()))
    }

    /// Startup path: a corrupt file is preserved as `.bak` and replaced with
    /// an empty settings file so the engine always starts.
    pub fn load_or_recover(&self) -> Settings {
        match self.load() {
            Ok(settings) => settings,
            Err(err) => {
                warn!("{}; resetting settings file", err);
                let backup = self.path.with_extension("json.bak");
                if let Err(err) = fs::rename(&self.path, &backup) {
                    warn!("could not preserve corrupt settings as .bak: {}", err);
                }
                let settings = Settings::default();
                if let Err(err) = self.save(&settings) {
                    warn!("could not rewrite settings file: {}", err);
                } else {
                    info!("settings reset; previous file kept at {}", backup.display());
                }
                settings
            }
        }
    }

    pub fn save(&self, settings: &Settings) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::Internal(format!(
                    "failed to create settings directory {}: {}",
                    parent.display(),
                    err
                ))
            })?;
        }

        let serialized = serde_json::to_string_pretty(settings)
            .map_err(|err| AppError::Internal(format!("failed to serialize settings: {}", err)))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serialized).map_err(|err| {
            AppError::Internal(format!("failed to write {}: {}", tmp.display(), err))
        })?;
        fs::rename(&tmp, &self.path).map_err(|err| {
            let _ = fs::remove_file(&tmp);
            AppError::Internal(format!(
                "failed to move settings into place at {}: {}",
                self.path.display(),
                err
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> SettingsStore {
        SettingsStore::new(dir.path().join("dictation-settings.json"))
    }

    #[test]
    fn absent_file_loads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.load().unwrap(), Settings::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut settings = Settings::default();
        settings.selected_model_id = Some("base-en".to_string());
        settings.dictation_trigger = Some("CmdOrCtrl+Shift+D".to_string());
        settings.focused_field_insert_enabled = true;

        store.save(&settings).unwrap();
        assert_eq!(store.load().unwrap(), settings);
    }

    #[test]
    fn unknown_keys_survive_a_load_save_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(
            store.path(),
            r#"{"selected_model_id":"tiny-en","theme":"midnight","nested":{"a":1}}"#,
        )
        .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.extra["theme"], "midnight");
        store.save(&loaded).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["theme"], "midnight");
        assert_eq!(raw["nested"]["a"], 1);
        assert_eq!(raw["selected_model_id"], "tiny-en");
    }

    #[test]
    fn malformed_file_is_config_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.load(), Err(AppError::ConfigCorrupt(_))));
    }

    #[test]
    fn recovery_preserves_the_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "{not json").unwrap();

        let recovered = store.load_or_recover();
        assert_eq!(recovered, Settings::default());
        assert!(dir.path().join("dictation-settings.json.bak").exists());
        assert_eq!(store.load().unwrap(), Settings::default());
    }

    #[test]
    fn crash_between_temp_write_and_rename_leaves_old_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut old = Settings::default();
        old.selected_model_id = Some("tiny-en".to_string());
        store.save(&old).unwrap();

        // Simulate the crash: the new content only ever reached the temp file.
        let tmp = store.path().with_extension("json.tmp");
        fs::write(&tmp, r#"{"selected_model_id":"medium-en""#).unwrap();

        assert_eq!(store.load().unwrap(), old);
    }
}
