use crate::config::EngineConfig;
use crate::constants::CLI_PROBE_TIMEOUT_MS;
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Where the whisper-cli executable was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CliOrigin {
    EnvOverride,
    Bundled,
    SystemPath,
    KnownInstall,
    DevTree,
}

#[derive(Debug, Clone)]
pub struct ResolvedCli {
    pub path: PathBuf,
    pub origin: CliOrigin,
}

/// Locate a usable whisper-cli executable. Candidates are probed in order;
/// the first one that exists, is executable and answers `--help` like a real
/// whisper.cpp build wins. A candidate that hangs past the probe budget is
/// skipped, not fatal.
pub fn resolve(config: &EngineConfig) -> Option<ResolvedCli> {
    for (path, origin) in candidate_paths(config) {
        if !path.exists() || !is_executable(&path) {
            continue;
        }
        match run_help_probe(&path, Duration::from_millis(CLI_PROBE_TIMEOUT_MS)) {
            Some(help) if help_looks_genuine(&help) => {
                info!("whisper-cli resolved at {} ({:?})", path.display(), origin);
                return Some(ResolvedCli { path, origin });
            }
            Some(_) => {
                debug!("{} answered --help but does not look like whisper-cli", path.display());
            }
            None => {
                debug!("{} failed the --help probe", path.display());
            }
        }
    }
    None
}

fn candidate_paths(config: &EngineConfig) -> Vec<(PathBuf, CliOrigin)> {
    let mut candidates = Vec::new();

    if let Some(explicit) = &config.cli_path_override {
        candidates.push((PathBuf::from(explicit), CliOrigin::EnvOverride));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.push((exe_dir.join(cli_binary_name()), CliOrigin::Bundled));
        }
    }

    if let Ok(on_path) = which::which("whisper-cli") {
        candidates.push((on_path, CliOrigin::SystemPath));
    }

    for known in known_install_candidates() {
        candidates.push((known, CliOrigin::KnownInstall));
    }

    if let Ok(cwd) = std::env::current_dir() {
        for relative in [
            "whisper.cpp/build/bin",
            "../whisper.cpp/build/bin",
            "../../whisper.cpp/build/bin",
        ] {
            candidates.push((cwd.join(relative).join(cli_binary_name()), CliOrigin::DevTree));
        }
    }

    candidates
}

fn cli_binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "whisper-cli.exe"
    } else {
        "whisper-cli"
    }
}

fn known_install_candidates() -> Vec<PathBuf> {
    if cfg!(target_os = "windows") {
        vec![PathBuf::from("C:\\Program Files\\whisper.cpp\\whisper-cli.exe")]
    } else {
        vec![
            PathBuf::from("/opt/homebrew/bin/whisper-cli"),
            PathBuf::from("/usr/local/bin/whisper-cli"),
            PathBuf::from("/usr/bin/whisper-cli"),
        ]
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path).map(|meta| meta.is_file()).unwrap_or(false)
}

/// Run `<candidate> --help` with a hard deadline. Returns the combined
/// stdout/stderr text when the process exits successfully in time.
fn run_help_probe(path: &Path, timeout: Duration) -> Option<String> {
    let mut child = Command::new(path)
        .arg("--help")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .ok()?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let mut text = String::new();
                if let Some(mut out) = child.stdout.take() {
                    let _ = out.read_to_string(&mut text);
                }
                if let Some(mut err) = child.stderr.take() {
                    let _ = err.read_to_string(&mut text);
                }
                if !status.success() {
                    return None;
                }
                return Some(text);
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(25));
            }
            Err(_) => return None,
        }
    }
}

/// A genuine whisper.cpp help page mentions its usage line and the model
/// flag; placeholder stubs that merely exit 0 do not pass.
fn help_looks_genuine(help: &str) -> bool {
    let lowered = help.to_ascii_lowercase();
    lowered.contains("usage") && (lowered.contains("-m") || lowered.contains("--model"))
}
