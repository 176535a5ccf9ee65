use crate::catalog::{self, model_path_for, ModelSpec};
use crate::config::EngineConfig;
use crate::device;
use crate::errors::AppError;
use crate::settings::Settings;
use crate::state::AppState;
use serde::Serialize;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tauri::{AppHandle, Emitter, Manager};
use tracing::{info, warn};
use url::Url;

const MODEL_BASE_URL: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";
const DOWNLOAD_CONNECT_TIMEOUT_SECS: u64 = 10;
const DOWNLOAD_READ_TIMEOUT_SECS: u64 = 30;
const DOWNLOAD_STALL_TIMEOUT_SECS: u64 = 30;
const DOWNLOAD_REDIRECT_LIMIT: u32 = 5;
const MAX_MODEL_SIZE_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Result of a successful install, mirrored into persisted settings.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSelection {
    pub selected_model_id: String,
    pub selected_model_path: String,
    pub installed: bool,
}

#[derive(Debug, Clone, Serialize)]
struct DownloadProgress {
    id: String,
    downloaded: u64,
    total: Option<u64>,
}

/// Resolve the model file transcription should use right now. The
/// `WHISPER_MODEL_PATH` override beats any persisted selection.
pub fn resolve_active_model_path(
    config: &EngineConfig,
    settings: &Settings,
) -> Result<PathBuf, AppError> {
    if let Some(override_path) = &config.model_path_override {
        let path = PathBuf::from(override_path);
        if !path.exists() {
            return Err(AppError::SetupIncomplete(format!(
                "WHISPER_MODEL_PATH points at a missing file: {}",
                path.display()
            )));
        }
        return Ok(path);
    }

    let saved = settings
        .selected_model_path
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            AppError::SetupIncomplete(
                "no dictation model selected yet; install one in onboarding".to_string(),
            )
        })?;

    let path = PathBuf::from(saved);
    if !path.exists() {
        return Err(AppError::SetupIncomplete(format!(
            "selected dictation model file is missing: {}",
            path.display()
        )));
    }
    Ok(path)
}

fn model_download_url(spec: &ModelSpec) -> String {
    format!("{}/{}", MODEL_BASE_URL, spec.file_name)
}

/// Defense in depth for anything that ends up joined under the models dir.
fn validate_model_file_name(file_name: &str) -> Result<(), AppError> {
    if file_name.trim().is_empty() {
        return Err(AppError::Internal("missing model file name".to_string()));
    }
    if file_name.contains('/') || file_name.contains('\\') || file_name.contains("..") {
        return Err(AppError::Internal(format!(
            "invalid model file name '{}'",
            file_name
        )));
    }
    if !file_name.to_ascii_lowercase().ends_with(".bin") {
        return Err(AppError::Internal(format!(
            "only .bin model files are expected, got '{}'",
            file_name
        )));
    }
    if !file_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
    {
        return Err(AppError::Internal(format!(
            "model file name '{}' contains invalid characters",
            file_name
        )));
    }
    Ok(())
}

fn validate_model_url(raw: &str) -> Result<Url, AppError> {
    let parsed = Url::parse(raw).map_err(|err| AppError::DownloadFailed {
        status: 0,
        detail: format!("invalid URL: {}", err),
    })?;
    if parsed.scheme() != "https" {
        return Err(AppError::DownloadFailed {
            status: 0,
            detail: "only HTTPS model URLs are allowed".to_string(),
        });
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(AppError::DownloadFailed {
            status: 0,
            detail: "URL userinfo is not allowed".to_string(),
        });
    }
    if parsed.host_str().is_none() {
        return Err(AppError::DownloadFailed {
            status: 0,
            detail: "URL missing host".to_string(),
        });
    }
    Ok(parsed)
}

fn build_download_agent() -> ureq::Agent {
    ureq::builder()
        .timeout_connect(Duration::from_secs(DOWNLOAD_CONNECT_TIMEOUT_SECS))
        .timeout_read(Duration::from_secs(DOWNLOAD_READ_TIMEOUT_SECS))
        .timeout_write(Duration::from_secs(DOWNLOAD_READ_TIMEOUT_SECS))
        .redirects(0)
        .build()
}

/// Follow redirects by hand so every hop gets validated.
fn http_get_with_redirects(url: &str) -> Result<ureq::Response, AppError> {
    let agent = build_download_agent();
    let mut current = url.to_string();

    for _ in 0..=DOWNLOAD_REDIRECT_LIMIT {
        let parsed = validate_model_url(&current)?;
        let response = match agent.get(parsed.as_str()).call() {
            Ok(resp) => resp,
            Err(ureq::Error::Status(code, resp)) => {
                if (300..400).contains(&code) {
                    resp
                } else {
                    return Err(AppError::DownloadFailed {
                        status: code,
                        detail: format!("HTTP {} for {}", code, parsed),
                    });
                }
            }
            Err(err) => {
                return Err(AppError::DownloadFailed {
                    status: 0,
                    detail: err.to_string(),
                })
            }
        };

        let status = response.status();
        if (300..400).contains(&status) {
            let location = response.header("Location").ok_or(AppError::DownloadFailed {
                status,
                detail: "redirect without Location header".to_string(),
            })?;
            let next = parsed.join(location).map_err(|err| AppError::DownloadFailed {
                status,
                detail: format!("invalid redirect URL: {}", err),
            })?;
            current = next.to_string();
            continue;
        }

        return Ok(response);
    }

    Err(AppError::DownloadFailed {
        status: 0,
        detail: format!("too many redirects (>{})", DOWNLOAD_REDIRECT_LIMIT),
    })
}

/// Stream the model into a `.part` sibling and rename it into place. The
/// partial file is removed on every failure path.
fn download_model_file(
    app: &AppHandle,
    models_dir: &Path,
    spec: &ModelSpec,
) -> Result<PathBuf, AppError> {
    validate_model_file_name(spec.file_name)?;
    fs::create_dir_all(models_dir).map_err(|err| AppError::DownloadFailed {
        status: 0,
        detail: format!("failed to create {}: {}", models_dir.display(), err),
    })?;

    let dest_path = model_path_for(models_dir, spec);
    if dest_path.exists() {
        return Ok(dest_path);
    }

    let url = model_download_url(spec);
    info!("downloading {} from {}", spec.id, url);
    let tmp_path = dest_path.with_extension("part");

    let result = (|| -> Result<PathBuf, AppError> {
        let response = http_get_with_redirects(&url)?;
        let total = response
            .header("Content-Length")
            .and_then(|value| value.parse::<u64>().ok());

        if let Some(size) = total {
            if size > MAX_MODEL_SIZE_BYTES {
                return Err(AppError::DownloadFailed {
                    status: 0,
                    detail: format!("model too large: {} MB", size / 1024 / 1024),
                });
            }
        }

        let mut reader = response.into_reader();
        let mut file = fs::File::create(&tmp_path).map_err(|err| AppError::DownloadFailed {
            status: 0,
            detail: err.to_string(),
        })?;

        let mut downloaded = 0u64;
        let mut last_emit = Instant::now();
        let mut last_read = Instant::now();
        let mut buffer = [0u8; 64 * 1024];

        loop {
            if last_read.elapsed().as_secs() > DOWNLOAD_STALL_TIMEOUT_SECS {
                return Err(AppError::DownloadFailed {
                    status: 0,
                    detail: format!(
                        "download stalled: no data for {} seconds",
                        DOWNLOAD_STALL_TIMEOUT_SECS
                    ),
                });
            }

            let read_bytes = reader.read(&mut buffer).map_err(|err| AppError::DownloadFailed {
                status: 0,
                detail: err.to_string(),
            })?;
            if read_bytes == 0 {
                break;
            }
            last_read = Instant::now();

            file.write_all(&buffer[..read_bytes])
                .map_err(|err| AppError::DownloadFailed {
                    status: 0,
                    detail: err.to_string(),
                })?;
            downloaded += read_bytes as u64;
            if downloaded > MAX_MODEL_SIZE_BYTES {
                return Err(AppError::DownloadFailed {
                    status: 0,
                    detail: "model exceeded the size limit".to_string(),
                });
            }

            if last_emit.elapsed() >= Duration::from_millis(250) {
                let _ = app.emit(
                    "model:download-progress",
                    DownloadProgress {
                        id: spec.id.to_string(),
                        downloaded,
                        total,
                    },
                );
                last_emit = Instant::now();
            }
        }

        file.flush().map_err(|err| AppError::DownloadFailed {
            status: 0,
            detail: err.to_string(),
        })?;
        drop(file);

        fs::rename(&tmp_path, &dest_path).map_err(|err| AppError::DownloadFailed {
            status: 0,
            detail: err.to_string(),
        })?;

        Ok(dest_path.clone())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// Install (download if needed) a catalog model and persist it as the active
/// selection. Unknown ids are rejected without touching settings.
pub fn install_model(app: &AppHandle, model_id: &str) -> Result<ModelSelection, AppError> {
    let trimmed = model_id.trim();
    let spec = catalog::find_spec(trimmed).ok_or_else(|| {
        let ids = catalog::MODEL_CATALOG
            .iter()
            .map(|spec| spec.id)
            .collect::<Vec<_>>()
            .join(", ");
        AppError::UnknownModel(format!("'{}'; available models: {}", trimmed, ids))
    })?;

    let state = app.state::<AppState>();
    {
        let mut downloads = state.downloads.lock().expect("downloads lock poisoned");
        if !downloads.insert(spec.id.to_string()) {
            return Err(AppError::DownloadFailed {
                status: 0,
                detail: format!("download of '{}' is already in progress", spec.id),
            });
        }
    }

    let models_dir = state.config.models_dir();
    let result = download_model_file(app, &models_dir, spec);

    {
        let mut downloads = state.downloads.lock().expect("downloads lock poisoned");
        downloads.remove(spec.id);
    }

    let path = result?;
    let path_str = path.to_string_lossy().to_string();
    state.update_settings(|settings| {
        settings.selected_model_id = Some(spec.id.to_string());
        settings.selected_model_path = Some(path_str.clone());
    })?;

    let _ = app.emit("model:download-complete", spec.id);
    Ok(ModelSelection {
        selected_model_id: spec.id.to_string(),
        selected_model_path: path_str,
        installed: true,
    })
}

/// Delete an installed model. When the deleted model was selected, the
/// selection fails over to the best remaining installed model, or clears.
pub fn delete_model(app: &AppHandle, model_id: &str) -> Result<(), AppError> {
    let trimmed = model_id.trim();
    let spec = catalog::find_spec(trimmed)
        .ok_or_else(|| AppError::UnknownModel(format!("'{}'", trimmed)))?;

    let state = app.state::<AppState>();
    let models_dir = state.config.models_dir();
    let target = model_path_for(&models_dir, spec);
    if target.exists() {
        fs::remove_file(&target).map_err(|err| {
            AppError::Internal(format!("failed to delete {}: {}", target.display(), err))
        })?;
        info!("deleted model file {}", target.display());
    }

    let was_selected = state
        .settings_snapshot()
        .selected_model_id
        .as_deref()
        .is_some_and(|id| id == spec.id);
    if !was_selected {
        return Ok(());
    }

    let profile = device::profile();
    let next = catalog::best_installed(&profile, &models_dir, Some(spec.id));
    state.update_settings(|settings| match next {
        Some(next_spec) => {
            let next_path = model_path_for(&models_dir, next_spec);
            settings.selected_model_id = Some(next_spec.id.to_string());
            settings.selected_model_path = Some(next_path.to_string_lossy().to_string());
        }
        None => {
            settings.selected_model_id = None;
            settings.selected_model_path = None;
        }
    })?;

    match next {
        Some(next_spec) => info!("selection failed over to {}", next_spec.id),
        None => warn!("no installed model remains; onboarding required again"),
    }
    Ok(())
}
