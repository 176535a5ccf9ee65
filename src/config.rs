use crate::constants::{MAX_OVERLAY_WINDOWS_DEFAULT, MIC_OPEN_TIMEOUT_MS_DEFAULT};
use std::path::PathBuf;

const APP_DIR: &str = ".dicktaint";
const SETTINGS_FILE: &str = "dictation-settings.json";
const MODELS_DIR: &str = "whisper-models";

/// Everything the engine is parameterized by. Built once at startup from the
/// environment and handed to the components by value; there is no global
/// configuration state.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub home_dir: PathBuf,
    pub public_dir: PathBuf,
    pub cli_path_override: Option<String>,
    pub model_path_override: Option<String>,
    pub start_hidden: bool,
    pub max_overlays: usize,
    pub mic_open_timeout_ms: u64,
    pub host: String,
    pub port: u16,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, String> {
        let home_dir = resolve_home_dir()?;
        let public_dir = std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("public");

        Ok(Self {
            home_dir,
            public_dir,
            cli_path_override: non_empty_env("WHISPER_CLI_PATH"),
            model_path_override: non_empty_env("WHISPER_MODEL_PATH"),
            start_hidden: flag_env("DICKTAINT_START_HIDDEN"),
            max_overlays: MAX_OVERLAY_WINDOWS_DEFAULT,
            mic_open_timeout_ms: MIC_OPEN_TIMEOUT_MS_DEFAULT,
            host: non_empty_env("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: non_empty_env("PORT")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(4517),
        })
    }

    pub fn app_dir(&self) -> PathBuf {
        self.home_dir.join(APP_DIR)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.app_dir().join(SETTINGS_FILE)
    }

    pub fn models_dir(&self) -> PathBuf {
        self.app_dir().join(MODELS_DIR)
    }
}

fn resolve_home_dir() -> Result<PathBuf, String> {
    if let Some(home) = std::env::var_os("HOME") {
        return Ok(PathBuf::from(home));
    }
    if let Some(home) = std::env::var_os("USERPROFILE") {
        return Ok(PathBuf::from(home));
    }
    Err("Could not resolve user home directory for local dictation storage.".to_string())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn flag_env(key: &str) -> bool {
    std::env::var(key)
        .map(|value| {
            let lowered = value.trim().to_ascii_lowercase();
            lowered == "1" || lowered == "true" || lowered == "on"
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_paths_live_under_the_app_dir() {
        let config = EngineConfig {
            home_dir: PathBuf::from("/home/tester"),
            public_dir: PathBuf::from("/srv/public"),
            cli_path_override: None,
            model_path_override: None,
            start_hidden: false,
            max_overlays: MAX_OVERLAY_WINDOWS_DEFAULT,
            mic_open_timeout_ms: MIC_OPEN_TIMEOUT_MS_DEFAULT,
            host: "127.0.0.1".to_string(),
            port: 4517,
        };

        assert_eq!(
            config.settings_path(),
            PathBuf::from("/home/tester/.dicktaint/dictation-settings.json")
        );
        assert_eq!(
            config.models_dir(),
            PathBuf::from("/home/tester/.dicktaint/whisper-models")
        );
    }
}
