use crate::device::DeviceProfile;
use serde::Serialize;
use std::path::Path;

/// Catalog entry for a downloadable whisper.cpp model.
#[derive(Debug, Clone, Copy)]
pub struct ModelSpec {
    pub id: &'static str,
    pub display_name: &'static str,
    pub whisper_ref: &'static str,
    pub file_name: &'static str,
    pub approx_size_gb: f32,
    pub min_ram_gb: f32,
    pub recommended_ram_gb: f32,
    pub speed_note: &'static str,
    pub quality_note: &'static str,
}

/// The fixed catalog, in presentation order. RAM floors are the hard minimum
/// to load the model at all; the recommended figure is where it runs without
/// starving the rest of the machine.
pub const MODEL_CATALOG: [ModelSpec; 12] = [
    ModelSpec {
        id: "tiny-en",
        display_name: "Whisper Tiny (English)",
        whisper_ref: "tiny.en",
        file_name: "ggml-tiny.en.bin",
        approx_size_gb: 0.08,
        min_ram_gb: 1.0,
        recommended_ram_gb: 2.0,
        speed_note: "Fastest",
        quality_note: "Lowest accuracy",
    },
    ModelSpec {
        id: "tiny",
        display_name: "Whisper Tiny",
        whisper_ref: "tiny",
        file_name: "ggml-tiny.bin",
        approx_size_gb: 0.08,
        min_ram_gb: 1.0,
        recommended_ram_gb: 2.0,
        speed_note: "Fastest",
        quality_note: "Lowest accuracy",
    },
    ModelSpec {
        id: "base-en",
        display_name: "Whisper Base (English)",
        whisper_ref: "base.en",
        file_name: "ggml-base.en.bin",
        approx_size_gb: 0.15,
        min_ram_gb: 2.0,
        recommended_ram_gb: 4.0,
        speed_note: "Fast",
        quality_note: "Balanced",
    },
    ModelSpec {
        id: "base",
        display_name: "Whisper Base",
        whisper_ref: "base",
        file_name: "ggml-base.bin",
        approx_size_gb: 0.15,
        min_ram_gb: 2.0,
        recommended_ram_gb: 4.0,
        speed_note: "Fast",
        quality_note: "Balanced",
    },
    ModelSpec {
        id: "small-en",
        display_name: "Whisper Small (English)",
        whisper_ref: "small.en",
        file_name: "ggml-small.en.bin",
        approx_size_gb: 0.47,
        min_ram_gb: 4.0,
        recommended_ram_gb: 8.0,
        speed_note: "Medium",
        quality_note: "Better accuracy",
    },
    ModelSpec {
        id: "small",
        display_name: "Whisper Small",
        whisper_ref: "small",
        file_name: "ggml-small.bin",
        approx_size_gb: 0.47,
        min_ram_gb: 4.0,
        recommended_ram_gb: 8.0,
        speed_note: "Medium",
        quality_note: "Better accuracy",
    },
    ModelSpec {
        id: "medium-en",
        display_name: "Whisper Medium (English)",
        whisper_ref: "medium.en",
        file_name: "ggml-medium.en.bin",
        approx_size_gb: 1.5,
        min_ram_gb: 8.0,
        recommended_ram_gb: 16.0,
        speed_note: "Slow",
        quality_note: "High accuracy",
    },
    ModelSpec {
        id: "medium",
        display_name: "Whisper Medium",
        whisper_ref: "medium",
        file_name: "ggml-medium.bin",
        approx_size_gb: 1.5,
        min_ram_gb: 8.0,
        recommended_ram_gb: 16.0,
        speed_note: "Slow",
        quality_note: "High accuracy",
    },
    ModelSpec {
        id: "large-v1",
        display_name: "Whisper Large v1",
        whisper_ref: "large-v1",
        file_name: "ggml-large-v1.bin",
        approx_size_gb: 2.9,
        min_ram_gb: 24.0,
        recommended_ram_gb: 32.0,
        speed_note: "Slowest",
        quality_note: "Best accuracy (superseded)",
    },
    ModelSpec {
        id: "large-v2",
        display_name: "Whisper Large v2",
        whisper_ref: "large-v2",
        file_name: "ggml-large-v2.bin",
        approx_size_gb: 2.9,
        min_ram_gb: 24.0,
        recommended_ram_gb: 32.0,
        speed_note: "Slowest",
        quality_note: "Best accuracy (superseded)",
    },
    ModelSpec {
        id: "large-v3",
        display_name: "Whisper Large v3",
        whisper_ref: "large-v3",
        file_name: "ggml-large-v3.bin",
        approx_size_gb: 3.1,
        min_ram_gb: 24.0,
        recommended_ram_gb: 32.0,
        speed_note: "Slowest",
        quality_note: "Best accuracy",
    },
    ModelSpec {
        id: "turbo",
        display_name: "Whisper Large v3 Turbo",
        whisper_ref: "large-v3-turbo",
        file_name: "ggml-large-v3-turbo.bin",
        approx_size_gb: 1.6,
        min_ram_gb: 12.0,
        recommended_ram_gb: 24.0,
        speed_note: "Fast for its size",
        quality_note: "Near-large accuracy",
    },
];

pub fn find_spec(id: &str) -> Option<&'static ModelSpec> {
    MODEL_CATALOG.iter().find(|spec| spec.id == id)
}

pub fn model_path_for(models_dir: &Path, spec: &ModelSpec) -> std::path::PathBuf {
    models_dir.join(spec.file_name)
}

/// Catalog entry annotated with per-device, per-installation state.
#[derive(Debug, Clone, Serialize)]
pub struct ModelOption {
    pub id: String,
    pub display_name: String,
    pub whisper_ref: String,
    pub file_name: String,
    pub path: String,
    pub installed: bool,
    pub likely_runnable: bool,
    pub recommended: bool,
    pub selected: bool,
    pub approx_size_gb: f32,
    pub min_ram_gb: f32,
    pub recommended_ram_gb: f32,
    pub speed_note: String,
    pub quality_note: String,
}

/// Composite ranking key: comfortable fit first, then the higher comfort
/// floor, then the larger model, then catalog order. Deliberately biased
/// toward the strongest model the device can actually run.
fn ranking_key(profile: &DeviceProfile, spec: &ModelSpec) -> (bool, f32, f32) {
    (
        profile.total_memory_gb >= spec.recommended_ram_gb as f64,
        spec.recommended_ram_gb,
        spec.approx_size_gb,
    )
}

fn better_ranked(profile: &DeviceProfile, candidate: &ModelSpec, incumbent: &ModelSpec) -> bool {
    let (c_fit, c_rec, c_size) = ranking_key(profile, candidate);
    let (i_fit, i_rec, i_size) = ranking_key(profile, incumbent);
    if c_fit != i_fit {
        return c_fit;
    }
    if c_rec != i_rec {
        return c_rec > i_rec;
    }
    // Catalog order breaks exact ties, so only a strictly larger size wins.
    c_size > i_size
}

/// Index of the single recommended entry for this device, if any runnable
/// entry exists.
pub fn recommended_index(profile: &DeviceProfile) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (index, spec) in MODEL_CATALOG.iter().enumerate() {
        if profile.total_memory_gb < spec.min_ram_gb as f64 {
            continue;
        }
        match best {
            None => best = Some(index),
            Some(current) => {
                if better_ranked(profile, spec, &MODEL_CATALOG[current]) {
                    best = Some(index);
                }
            }
        }
    }
    best
}

/// Annotate the full catalog against a device profile and the models dir.
pub fn evaluate(
    profile: &DeviceProfile,
    models_dir: &Path,
    selected_id: Option<&str>,
) -> Vec<ModelOption> {
    let recommended = recommended_index(profile);

    MODEL_CATALOG
        .iter()
        .enumerate()
        .map(|(index, spec)| {
            let path = model_path_for(models_dir, spec);
            ModelOption {
                id: spec.id.to_string(),
                display_name: spec.display_name.to_string(),
                whisper_ref: spec.whisper_ref.to_string(),
                file_name: spec.file_name.to_string(),
                path: path.to_string_lossy().to_string(),
                installed: path.exists(),
                likely_runnable: profile.total_memory_gb >= spec.min_ram_gb as f64,
                recommended: recommended == Some(index),
                selected: selected_id.is_some_and(|id| id == spec.id),
                approx_size_gb: spec.approx_size_gb,
                min_ram_gb: spec.min_ram_gb,
                recommended_ram_gb: spec.recommended_ram_gb,
                speed_note: spec.speed_note.to_string(),
                quality_note: spec.quality_note.to_string(),
            }
        })
        .collect()
}

/// Best installed model for this device, excluding `exclude_id`. Used when a
/// deleted model was the active selection and another installed model should
/// take over. Runnable models outrank non-runnable ones; within each group
/// the usual ranking applies.
pub fn best_installed(
    profile: &DeviceProfile,
    models_dir: &Path,
    exclude_id: Option<&str>,
) -> Option<&'static ModelSpec> {
    let mut best: Option<&'static ModelSpec> = None;
    for spec in MODEL_CATALOG.iter() {
        if exclude_id.is_some_and(|id| id == spec.id) {
            continue;
        }
        if !model_path_for(models_dir, spec).exists() {
            continue;
        }
        match best {
            None => best = Some(spec),
            Some(current) => {
                let c_runnable = profile.total_memory_gb >= spec.min_ram_gb as f64;
                let i_runnable = profile.total_memory_gb >= current.min_ram_gb as f64;
                if c_runnable != i_runnable {
                    if c_runnable {
                        best = Some(spec);
                    }
                } else if better_ranked(profile, spec, current) {
                    best = Some(spec);
                }
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceProfile;
    use std::fs;

    fn touch(dir: &Path, file_name: &str) {
        fs::write(dir.join(file_name), b"model").unwrap();
    }

    #[test]
    fn catalog_has_twelve_fixed_entries() {
        let ids: Vec<&str> = MODEL_CATALOG.iter().map(|spec| spec.id).collect();
        assert_eq!(
            ids,
            vec![
                "tiny-en", "tiny", "base-en", "base", "small-en", "small", "medium-en", "medium",
                "large-v1", "large-v2", "large-v3", "turbo",
            ]
        );
    }

    #[test]
    fn sixteen_gb_device_gets_medium_en() {
        let dir = tempfile::tempdir().unwrap();
        let profile = DeviceProfile::for_test(16.0, 8);
        let options = evaluate(&profile, dir.path(), None);

        let recommended: Vec<&str> = options
            .iter()
            .filter(|option| option.recommended)
            .map(|option| option.id.as_str())
            .collect();
        assert_eq!(recommended, vec!["medium-en"]);

        for option in &options {
            if option.id.starts_with("large-") {
                assert!(!option.likely_runnable, "{} should not be runnable", option.id);
            }
        }
    }

    #[test]
    fn four_gb_device_gets_base_en() {
        let dir = tempfile::tempdir().unwrap();
        let profile = DeviceProfile::for_test(4.0, 4);
        let options = evaluate(&profile, dir.path(), None);

        let recommended: Vec<&str> = options
            .iter()
            .filter(|option| option.recommended)
            .map(|option| option.id.as_str())
            .collect();
        assert_eq!(recommended, vec!["base-en"]);
    }

    #[test]
    fn at_most_one_recommended_for_any_device() {
        let dir = tempfile::tempdir().unwrap();
        for ram in [0.5, 1.0, 2.0, 3.0, 4.0, 6.0, 8.0, 12.0, 16.0, 24.0, 32.0, 64.0] {
            let profile = DeviceProfile::for_test(ram, 8);
            let options = evaluate(&profile, dir.path(), None);
            let recommended = options.iter().filter(|option| option.recommended).count();
            let runnable = options.iter().filter(|option| option.likely_runnable).count();
            if runnable == 0 {
                assert_eq!(recommended, 0, "ram={}", ram);
            } else {
                assert_eq!(recommended, 1, "ram={}", ram);
            }
        }
    }

    #[test]
    fn plenty_of_ram_prefers_the_largest_model() {
        let profile = DeviceProfile::for_test(64.0, 16);
        let index = recommended_index(&profile).unwrap();
        assert_eq!(MODEL_CATALOG[index].id, "large-v3");
    }

    #[test]
    fn selected_flag_tracks_the_given_id() {
        let dir = tempfile::tempdir().unwrap();
        let profile = DeviceProfile::for_test(8.0, 4);
        let options = evaluate(&profile, dir.path(), Some("small-en"));
        let selected: Vec<&str> = options
            .iter()
            .filter(|option| option.selected)
            .map(|option| option.id.as_str())
            .collect();
        assert_eq!(selected, vec!["small-en"]);
    }

    #[test]
    fn failover_picks_best_remaining_installed() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "ggml-tiny.en.bin");
        touch(dir.path(), "ggml-base.en.bin");
        touch(dir.path(), "ggml-medium.en.bin");

        let profile = DeviceProfile::for_test(16.0, 8);
        let next = best_installed(&profile, dir.path(), Some("medium-en")).unwrap();
        assert_eq!(next.id, "base-en");

        let next = best_installed(&profile, dir.path(), Some("base-en")).unwrap();
        assert_eq!(next.id, "medium-en");
    }

    #[test]
    fn failover_with_nothing_installed_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let profile = DeviceProfile::for_test(16.0, 8);
        assert!(best_installed(&profile, dir.path(), None).is_none());
    }
}
