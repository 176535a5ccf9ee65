pub const TARGET_SAMPLE_RATE: u32 = 16_000;

pub const MIN_AUDIO_MS: u64 = 250;
pub const SPEECH_PAD_MS: u64 = 100;
pub const TRIM_WINDOW_MS: u64 = 10;
pub const TRIM_RMS_THRESHOLD: f32 = 0.008;

pub const NOISE_FLOOR_RMS: f32 = 0.003; // ~ -50 dB
pub const AUDIBLE_PEAK_FLOOR: f32 = 0.01;

pub const GAIN_TARGET_RMS: f32 = 0.08;
pub const GAIN_RMS_LOW: f32 = 0.04;
pub const GAIN_RMS_HIGH: f32 = 0.15;
pub const GAIN_PEAK_CEILING: f32 = 0.97;
pub const GAIN_MAX_BOOST: f32 = 8.0;

pub const MIC_OPEN_TIMEOUT_MS_DEFAULT: u64 = 5_000;
pub const MAX_OVERLAY_WINDOWS_DEFAULT: usize = 6;

pub const CLI_PROBE_TIMEOUT_MS: u64 = 2_000;

pub const FAST_PASS_BEAM: u32 = 2;
pub const FAST_PASS_BEST_OF: u32 = 2;
pub const ACCURACY_PASS_BEAM: u32 = 5;
pub const ACCURACY_PASS_BEST_OF: u32 = 5;

pub const LOW_INFO_MIN_CHARS: usize = 12;
pub const LOW_INFO_MAX_WORDS: usize = 2;
pub const LOW_INFO_REPEAT_RATIO: f32 = 0.6;
pub const LOW_INFO_ALPHA_RATIO: f32 = 0.5;
