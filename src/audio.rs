use crate::constants::{
    AUDIBLE_PEAK_FLOOR, GAIN_MAX_BOOST, GAIN_PEAK_CEILING, GAIN_RMS_HIGH, GAIN_RMS_LOW,
    GAIN_TARGET_RMS, MIN_AUDIO_MS, NOISE_FLOOR_RMS, SPEECH_PAD_MS, TARGET_SAMPLE_RATE,
    TRIM_RMS_THRESHOLD, TRIM_WINDOW_MS,
};
use crate::errors::AppError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Sample format the input device delivered. Samples are normalized to f32
/// at the callback; the original format is kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    F32,
    I16,
    U16,
}

/// Interleaved capture buffer. The audio callback is the only writer; the
/// control side only drains it after the stream has been joined.
#[derive(Default)]
pub struct CaptureBuffer {
    samples: Vec<f32>,
}

impl CaptureBuffer {
    fn append(&mut self, chunk: &[f32]) {
        self.samples.extend_from_slice(chunk);
    }

    fn drain(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.samples)
    }
}

/// The single active capture. Created by `start`, moved out by `stop`,
/// dropped by `cancel`.
pub struct CaptureSession {
    buffer: Arc<Mutex<CaptureBuffer>>,
    stop_tx: mpsc::Sender<()>,
    join_handle: thread::JoinHandle<()>,
    sample_rate: u32,
    channels: usize,
    format: SourceFormat,
    started_at: Instant,
}

/// Raw capture handed to conditioning after the stream is joined.
pub struct RawCapture {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
    pub format: SourceFormat,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapturePhase {
    #[default]
    Idle,
    Starting,
    Recording,
    Stopping,
}

/// Single-slot microphone recorder. At most one `CaptureSession` exists at
/// any time; a second `start` while one is live is `AlreadyRunning`.
#[derive(Default)]
pub struct Recorder {
    phase: CapturePhase,
    session: Option<CaptureSession>,
}

struct StreamMeta {
    sample_rate: u32,
    channels: usize,
    format: SourceFormat,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> CapturePhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase != CapturePhase::Idle
    }

    /// Open the default input device on a worker thread and block until the
    /// stream is confirmed live or the timeout elapses.
    pub fn start(&mut self, mic_open_timeout_ms: u64) -> Result<(), AppError> {
        if self.phase != CapturePhase::Idle {
            return Err(AppError::AlreadyRunning);
        }
        self.phase = CapturePhase::Starting;

        let buffer = Arc::new(Mutex::new(CaptureBuffer::default()));
        let capture_buffer = Arc::clone(&buffer);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<StreamMeta, String>>();

        let join_handle = thread::spawn(move || {
            let result = (|| -> Result<(), String> {
                let host = cpal::default_host();
                let device = host
                    .default_input_device()
                    .ok_or_else(|| "no microphone input device found".to_string())?;
                let supported = device
                    .default_input_config()
                    .map_err(|err| format!("failed to read default input config: {}", err))?;
                let sample_rate = supported.sample_rate().0;
                let channels = supported.channels() as usize;
                let stream_config: StreamConfig = supported.clone().into();

                let (stream, format) = match supported.sample_format() {
                    SampleFormat::F32 => (
                        build_input_stream_f32(&device, &stream_config, capture_buffer)?,
                        SourceFormat::F32,
                    ),
                    SampleFormat::I16 => (
                        build_input_stream_i16(&device, &stream_config, capture_buffer)?,
                        SourceFormat::I16,
                    ),
                    SampleFormat::U16 => (
                        build_input_stream_u16(&device, &stream_config, capture_buffer)?,
                        SourceFormat::U16,
                    ),
                    other => return Err(format!("unsupported input sample format {:?}", other)),
                };

                stream
                    .play()
                    .map_err(|err| format!("failed to start microphone stream: {}", err))?;
                let _ = ready_tx.send(Ok(StreamMeta {
                    sample_rate,
                    channels,
                    format,
                }));

                let _ = stop_rx.recv();
                drop(stream);
                Ok(())
            })();

            if let Err(err) = result {
                let _ = ready_tx.send(Err(err));
            }
        });

        let meta = match ready_rx.recv_timeout(Duration::from_millis(mic_open_timeout_ms)) {
            Ok(Ok(meta)) => meta,
            Ok(Err(err)) => {
                let _ = join_handle.join();
                self.phase = CapturePhase::Idle;
                return Err(AppError::MicOpenFailed(err));
            }
            Err(_) => {
                let _ = stop_tx.send(());
                let _ = join_handle.join();
                self.phase = CapturePhase::Idle;
                return Err(AppError::MicOpenFailed(
                    "timed out while opening the microphone stream".to_string(),
                ));
            }
        };

        info!(
            "capture started: {} Hz, {} channel(s), {:?}",
            meta.sample_rate, meta.channels, meta.format
        );
        self.session = Some(CaptureSession {
            buffer,
            stop_tx,
            join_handle,
            sample_rate: meta.sample_rate,
            channels: meta.channels,
            format: meta.format,
            started_at: Instant::now(),
        });
        self.phase = CapturePhase::Recording;
        Ok(())
    }

    /// Join the capture worker and hand the raw samples out. The session is
    /// consumed; there is no way to keep recording after `stop`.
    pub fn stop(&mut self) -> Result<RawCapture, AppError> {
        if self.phase != CapturePhase::Recording {
            return Err(AppError::NotRunning);
        }
        self.phase = CapturePhase::Stopping;
        let session = self.session.take().ok_or(AppError::NotRunning)?;

        let _ = session.stop_tx.send(());
        if session.join_handle.join().is_err() {
            self.phase = CapturePhase::Idle;
            return Err(AppError::MicOpenFailed(
                "audio capture thread crashed".to_string(),
            ));
        }

        let samples = session
            .buffer
            .lock()
            .map_err(|_| AppError::Internal("capture buffer lock poisoned".to_string()))?
            .drain();
        self.phase = CapturePhase::Idle;

        Ok(RawCapture {
            samples,
            sample_rate: session.sample_rate,
            channels: session.channels,
            format: session.format,
            elapsed: session.started_at.elapsed(),
        })
    }

    /// Safe in every state; discards any buffered samples.
    pub fn cancel(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.stop_tx.send(());
            let _ = session.join_handle.join();
        }
        self.phase = CapturePhase::Idle;
    }
}

fn build_input_stream_f32(
    device: &cpal::Device,
    config: &StreamConfig,
    buffer: Arc<Mutex<CaptureBuffer>>,
) -> Result<cpal::Stream, String> {
    let err_fn = |err| warn!("microphone stream error: {}", err);
    device
        .build_input_stream(
            config,
            move |data: &[f32], _| {
                if let Ok(mut guard) = buffer.lock() {
                    guard.append(data);
                }
            },
            err_fn,
            None,
        )
        .map_err(|err| format!("failed to open f32 input stream: {}", err))
}

fn build_input_stream_i16(
    device: &cpal::Device,
    config: &StreamConfig,
    buffer: Arc<Mutex<CaptureBuffer>>,
) -> Result<cpal::Stream, String> {
    let err_fn = |err| warn!("microphone stream error: {}", err);
    device
        .build_input_stream(
            config,
            move |data: &[i16], _| {
                let converted: Vec<f32> =
                    data.iter().map(|&v| v as f32 / i16::MAX as f32).collect();
                if let Ok(mut guard) = buffer.lock() {
                    guard.append(&converted);
                }
            },
            err_fn,
            None,
        )
        .map_err(|err| format!("failed to open i16 input stream: {}", err))
}

fn build_input_stream_u16(
    device: &cpal::Device,
    config: &StreamConfig,
    buffer: Arc<Mutex<CaptureBuffer>>,
) -> Result<cpal::Stream, String> {
    let err_fn = |err| warn!("microphone stream error: {}", err);
    device
        .build_input_stream(
            config,
            move |data: &[u16], _| {
                let converted: Vec<f32> = data
                    .iter()
                    .map(|&v| (v as f32 / u16::MAX as f32) * 2.0 - 1.0)
                    .collect();
                if let Ok(mut guard) = buffer.lock() {
                    guard.append(&converted);
                }
            },
            err_fn,
            None,
        )
        .map_err(|err| format!("failed to open u16 input stream: {}", err))
}

/// Turn a raw capture into the 16 kHz mono signal the transcription CLI
/// expects, or `NoSpeech` when the guards fire.
pub fn condition(raw: &RawCapture) -> Result<Vec<f32>, AppError> {
    let mono = downmix_dominant(&raw.samples, raw.channels);
    let resampled = resample_linear(&mono, raw.sample_rate, TARGET_SAMPLE_RATE);
    let centered = remove_dc(resampled);
    let trimmed = trim_silence(&centered, TARGET_SAMPLE_RATE);

    let duration_ms = trimmed.len() as u64 * 1000 / TARGET_SAMPLE_RATE as u64;
    if duration_ms < MIN_AUDIO_MS {
        return Err(AppError::NoSpeech);
    }
    let rms = rms(&trimmed);
    let peak = peak(&trimmed);
    if rms < NOISE_FLOOR_RMS || peak < AUDIBLE_PEAK_FLOOR {
        return Err(AppError::NoSpeech);
    }

    Ok(normalize_gain(trimmed))
}

/// Pick the channel carrying the most energy instead of averaging; averaging
/// a hot and a near-silent channel halves the usable signal.
fn downmix_dominant(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    let mut energy = vec![0.0f64; channels];
    for frame in samples.chunks_exact(channels) {
        for (channel, &sample) in frame.iter().enumerate() {
            energy[channel] += (sample as f64) * (sample as f64);
        }
    }
    let dominant = energy
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(index, _)| index)
        .unwrap_or(0);

    samples
        .chunks_exact(channels)
        .map(|frame| frame[dominant])
        .collect()
}

fn resample_linear(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if samples.is_empty() || source_rate == 0 {
        return Vec::new();
    }
    if source_rate == target_rate {
        return samples.to_vec();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let out_len = ((samples.len() as f64) * ratio).round().max(1.0) as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos.floor() as usize;
        let frac = (src_pos - idx as f64) as f32;

        let a = samples.get(idx).copied().unwrap_or(0.0);
        let b = samples.get(idx + 1).copied().unwrap_or(a);
        out.push(a + (b - a) * frac);
    }

    out
}

fn remove_dc(mut samples: Vec<f32>) -> Vec<f32> {
    if samples.is_empty() {
        return samples;
    }
    let mean = samples.iter().map(|&v| v as f64).sum::<f64>() / samples.len() as f64;
    let mean = mean as f32;
    for sample in &mut samples {
        *sample -= mean;
    }
    samples
}

/// Drop leading/trailing stretches below the energy threshold, keeping a
/// short speech pad on each edge so plosives and trailing consonants survive.
fn trim_silence(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    let window = (sample_rate as u64 * TRIM_WINDOW_MS / 1000).max(1) as usize;
    let pad = (sample_rate as u64 * SPEECH_PAD_MS / 1000) as usize;

    let mut first_voiced: Option<usize> = None;
    let mut last_voiced_end = 0usize;
    for (index, chunk) in samples.chunks(window).enumerate() {
        if rms(chunk) >= TRIM_RMS_THRESHOLD {
            let start = index * window;
            if first_voiced.is_none() {
                first_voiced = Some(start);
            }
            last_voiced_end = start + chunk.len();
        }
    }

    let Some(first) = first_voiced else {
        return Vec::new();
    };
    let start = first.saturating_sub(pad);
    let end = (last_voiced_end + pad).min(samples.len());
    samples[start..end].to_vec()
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&v| (v as f64) * (v as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, &v| acc.max(v.abs()))
}

/// Pull quiet takes up toward the target RMS and hot takes down under the
/// peak ceiling. A single scale factor keeps the waveform shape intact.
fn normalize_gain(mut samples: Vec<f32>) -> Vec<f32> {
    let rms = rms(&samples);
    let peak = peak(&samples);
    if rms <= f32::EPSILON || peak <= f32::EPSILON {
        return samples;
    }

    let scale = if rms < GAIN_RMS_LOW {
        (GAIN_TARGET_RMS / rms)
            .min(GAIN_MAX_BOOST)
            .min(GAIN_PEAK_CEILING / peak)
    } else if rms > GAIN_RMS_HIGH || peak > GAIN_PEAK_CEILING {
        (GAIN_TARGET_RMS / rms).min(GAIN_PEAK_CEILING / peak)
    } else {
        1.0
    };

    if (scale - 1.0).abs() > f32::EPSILON {
        for sample in &mut samples {
            *sample = (*sample * scale).clamp(-1.0, 1.0);
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(samples: Vec<f32>, sample_rate: u32, channels: usize) -> RawCapture {
        RawCapture {
            samples,
            sample_rate,
            channels,
            format: SourceFormat::F32,
            elapsed: Duration::from_millis(0),
        }
    }

    fn tone(duration_ms: u64, sample_rate: u32, amplitude: f32) -> Vec<f32> {
        let count = (sample_rate as u64 * duration_ms / 1000) as usize;
        (0..count)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    #[test]
    fn stop_without_start_is_not_running() {
        let mut recorder = Recorder::new();
        assert!(matches!(recorder.stop(), Err(AppError::NotRunning)));
    }

    #[test]
    fn cancel_when_idle_is_a_no_op() {
        let mut recorder = Recorder::new();
        recorder.cancel();
        assert_eq!(recorder.phase(), CapturePhase::Idle);
    }

    #[test]
    fn downmix_prefers_the_dominant_channel() {
        // Channel 0 is near-silent, channel 1 carries the signal.
        let mut interleaved = Vec::new();
        for i in 0..1000 {
            interleaved.push(0.001);
            interleaved.push(if i % 2 == 0 { 0.5 } else { -0.5 });
        }
        let mono = downmix_dominant(&interleaved, 2);
        assert_eq!(mono.len(), 1000);
        assert!(mono.iter().all(|&v| v.abs() > 0.4));
    }

    #[test]
    fn resample_is_identity_at_matching_rates() {
        let source = vec![0.0f32, 0.5, -0.5, 1.0];
        assert_eq!(resample_linear(&source, 16_000, 16_000), source);
    }

    #[test]
    fn resample_halves_sample_count_from_32k() {
        let source = tone(1000, 32_000, 0.3);
        let out = resample_linear(&source, 32_000, 16_000);
        let expected = source.len() / 2;
        assert!((out.len() as i64 - expected as i64).abs() <= 1);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn dc_offset_is_removed() {
        let biased: Vec<f32> = tone(100, 16_000, 0.2).iter().map(|v| v + 0.3).collect();
        let centered = remove_dc(biased);
        let mean: f32 = centered.iter().sum::<f32>() / centered.len() as f32;
        assert!(mean.abs() < 1e-4);
    }

    #[test]
    fn trim_keeps_speech_and_pad_only() {
        let rate = TARGET_SAMPLE_RATE;
        let mut samples = vec![0.0f32; rate as usize]; // 1 s silence
        samples.extend(tone(500, rate, 0.3)); // 500 ms speech
        samples.extend(vec![0.0f32; rate as usize]); // 1 s silence

        let trimmed = trim_silence(&samples, rate);
        let duration_ms = trimmed.len() as u64 * 1000 / rate as u64;
        // 500 ms of speech plus at most one pad and one window per edge.
        assert!(duration_ms >= 500);
        assert!(duration_ms <= 500 + 2 * (SPEECH_PAD_MS + TRIM_WINDOW_MS));
    }

    #[test]
    fn all_silence_trims_to_nothing() {
        let samples = vec![0.0f32; TARGET_SAMPLE_RATE as usize];
        assert!(trim_silence(&samples, TARGET_SAMPLE_RATE).is_empty());
    }

    #[test]
    fn condition_rejects_too_short_audio() {
        let capture = raw(tone(100, TARGET_SAMPLE_RATE, 0.3), TARGET_SAMPLE_RATE, 1);
        assert!(matches!(condition(&capture), Err(AppError::NoSpeech)));
    }

    #[test]
    fn condition_rejects_silence() {
        let capture = raw(
            vec![0.0f32; TARGET_SAMPLE_RATE as usize],
            TARGET_SAMPLE_RATE,
            1,
        );
        assert!(matches!(condition(&capture), Err(AppError::NoSpeech)));
    }

    #[test]
    fn condition_rejects_sub_audible_signal() {
        let capture = raw(tone(800, TARGET_SAMPLE_RATE, 0.004), TARGET_SAMPLE_RATE, 1);
        assert!(matches!(condition(&capture), Err(AppError::NoSpeech)));
    }

    #[test]
    fn condition_passes_and_levels_ordinary_speech() {
        let capture = raw(tone(800, TARGET_SAMPLE_RATE, 0.02), TARGET_SAMPLE_RATE, 1);
        let out = condition(&capture).unwrap();
        let rms = rms(&out);
        assert!(rms >= GAIN_RMS_LOW, "rms {} below band", rms);
        assert!(peak(&out) <= GAIN_PEAK_CEILING + 1e-3);
    }

    #[test]
    fn condition_resamples_other_rates_to_16k() {
        let capture = raw(tone(800, 48_000, 0.2), 48_000, 1);
        let out = condition(&capture).unwrap();
        let duration_ms = out.len() as u64 * 1000 / TARGET_SAMPLE_RATE as u64;
        assert!(duration_ms >= 500 && duration_ms <= 1100);
    }

    #[test]
    fn normalize_caps_hot_signal_below_the_ceiling() {
        let hot: Vec<f32> = tone(400, TARGET_SAMPLE_RATE, 1.0);
        let out = normalize_gain(hot);
        assert!(peak(&out) <= GAIN_PEAK_CEILING + 1e-3);
    }
}
