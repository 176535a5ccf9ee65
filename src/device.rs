use serde::Serialize;
#[cfg(any(target_os = "macos", target_os = "windows"))]
use std::process::Command;

const FALLBACK_MEMORY_BYTES: u64 = 8 * 1_073_741_824;

/// Immutable snapshot of the host machine, used to rank the model catalog.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceProfile {
    pub total_memory_gb: f64,
    pub logical_cpu_cores: usize,
    pub architecture: String,
    pub os: String,
}

impl DeviceProfile {
    #[cfg(test)]
    pub fn for_test(total_memory_gb: f64, logical_cpu_cores: usize) -> Self {
        Self {
            total_memory_gb,
            logical_cpu_cores,
            architecture: "x86_64".to_string(),
            os: "linux".to_string(),
        }
    }
}

/// Probe the host. Never fails; unsupported platform queries fall back to
/// conservative defaults.
pub fn profile() -> DeviceProfile {
    let logical_cpu_cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1);

    DeviceProfile {
        total_memory_gb: memory_gb_rounded(total_memory_bytes().unwrap_or(FALLBACK_MEMORY_BYTES)),
        logical_cpu_cores,
        architecture: non_empty_or_unknown(std::env::consts::ARCH),
        os: non_empty_or_unknown(std::env::consts::OS),
    }
}

fn non_empty_or_unknown(value: &str) -> String {
    if value.is_empty() {
        "unknown".to_string()
    } else {
        value.to_string()
    }
}

fn memory_gb_rounded(bytes: u64) -> f64 {
    let gb = bytes as f64 / 1_073_741_824.0;
    (gb * 10.0).round() / 10.0
}

#[cfg(target_os = "macos")]
fn total_memory_bytes() -> Option<u64> {
    let output = Command::new("sysctl").args(["-n", "hw.memsize"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout).trim().parse::<u64>().ok()
}

#[cfg(target_os = "linux")]
fn total_memory_bytes() -> Option<u64> {
    let content = std::fs::read_to_string("/proc/meminfo").ok()?;
    let line = content.lines().find(|entry| entry.starts_with("MemTotal:"))?;
    let kib = line
        .split_whitespace()
        .nth(1)
        .and_then(|value| value.parse::<u64>().ok())?;
    Some(kib.saturating_mul(1024))
}

#[cfg(target_os = "windows")]
fn total_memory_bytes() -> Option<u64> {
    wmic_memory_bytes().or_else(cim_memory_bytes)
}

#[cfg(target_os = "windows")]
fn wmic_memory_bytes() -> Option<u64> {
    let output = Command::new("wmic")
        .args(["ComputerSystem", "get", "TotalPhysicalMemory", "/Value"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let raw = String::from_utf8_lossy(&output.stdout);
    let value = raw
        .lines()
        .find_map(|line| line.strip_prefix("TotalPhysicalMemory="))?
        .trim()
        .to_string();
    value.parse::<u64>().ok()
}

// wmic is deprecated on recent Windows builds; CIM answers the same query.
#[cfg(target_os = "windows")]
fn cim_memory_bytes() -> Option<u64> {
    let output = Command::new("powershell")
        .args([
            "-NoProfile",
            "-Command",
            "(Get-CimInstance Win32_ComputerSystem).TotalPhysicalMemory",
        ])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout).trim().parse::<u64>().ok()
}

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
fn total_memory_bytes() -> Option<u64> {
    None
}
