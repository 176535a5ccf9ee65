use serde::{Deserialize, Serialize};
use std::fmt;

/// Application-wide error taxonomy. Serialized with a stable tag so the
/// frontend can branch on kind while showing the rendered string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "message")]
pub enum AppError {
    /// Missing model or transcription CLI; blocks capture start.
    SetupIncomplete(String),

    /// A capture session is already active.
    AlreadyRunning,

    /// No capture session is active.
    NotRunning,

    /// The microphone stream could not start or timed out.
    MicOpenFailed(String),

    /// Guards fired or the transcript came back empty. User-facing.
    NoSpeech,

    /// The transcription CLI exited non-zero or produced no output file.
    TranscriptionFailed(String),

    /// Network or filesystem failure while installing a model.
    DownloadFailed { status: u16, detail: String },

    /// The settings file exists but could not be parsed.
    ConfigCorrupt(String),

    /// A hotkey string failed to parse; the stored binding is untouched.
    HotkeyInvalid(String),

    /// The binding is stored but cannot be monitored on this platform.
    HotkeyInactive(String),

    /// A model id that is not part of the catalog.
    UnknownModel(String),

    /// Overlay/window management failure.
    Window(String),

    /// Internal failures that do not fit the taxonomy above.
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AppError::SetupIncomplete(msg) => write!(f, "Setup incomplete: {}", msg),
            AppError::AlreadyRunning => write!(f, "Dictation is already running."),
            AppError::NotRunning => write!(f, "Dictation is not running."),
            AppError::MicOpenFailed(msg) => write!(f, "Microphone failed to start: {}", msg),
            AppError::NoSpeech => write!(f, "No speech detected in the recorded audio."),
            AppError::TranscriptionFailed(msg) => write!(f, "Transcription failed: {}", msg),
            AppError::DownloadFailed { status, detail } => {
                write!(f, "Model download failed ({}): {}", status, detail)
            }
            AppError::ConfigCorrupt(msg) => write!(f, "Settings file is corrupt: {}", msg),
            AppError::HotkeyInvalid(msg) => write!(f, "Invalid hotkey: {}", msg),
            AppError::HotkeyInactive(msg) => write!(f, "Hotkey inactive: {}", msg),
            AppError::UnknownModel(msg) => write!(f, "Unknown dictation model: {}", msg),
            AppError::Window(msg) => write!(f, "Window error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Short user-facing title for the error kind.
    pub fn title(&self) -> &'static str {
        match self {
            AppError::SetupIncomplete(_) => "Setup Required",
            AppError::AlreadyRunning | AppError::NotRunning => "Dictation State",
            AppError::MicOpenFailed(_) => "Microphone Issue",
            AppError::NoSpeech => "No Speech",
            AppError::TranscriptionFailed(_) => "Transcription Failed",
            AppError::DownloadFailed { .. } => "Download Failed",
            AppError::ConfigCorrupt(_) => "Settings Problem",
            AppError::HotkeyInvalid(_) | AppError::HotkeyInactive(_) => "Hotkey Problem",
            AppError::UnknownModel(_) => "Unknown Model",
            AppError::Window(_) => "Window Error",
            AppError::Internal(_) => "Error",
        }
    }
}

/// Error event payload sent to the frontend alongside command results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub error: AppError,
    pub timestamp: u64,
    pub context: Option<String>,
}

impl ErrorEvent {
    pub fn new(error: AppError) -> Self {
        Self {
            error,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_stable() {
        let err = AppError::MicOpenFailed("timed out".to_string());
        assert_eq!(err.to_string(), "Microphone failed to start: timed out");
        assert_eq!(
            AppError::NoSpeech.to_string(),
            "No speech detected in the recorded audio."
        );
    }

    #[test]
    fn serializes_with_kind_tag() {
        let err = AppError::DownloadFailed {
            status: 503,
            detail: "unavailable".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "DownloadFailed");
        assert_eq!(json["message"]["status"], 503);
    }

    #[test]
    fn error_event_carries_context() {
        let event = ErrorEvent::new(AppError::NoSpeech).with_context("stop_native_dictation");
        assert_eq!(event.context.as_deref(), Some("stop_native_dictation"));
    }
}
