use crate::constants::{
    ACCURACY_PASS_BEAM, ACCURACY_PASS_BEST_OF, FAST_PASS_BEAM, FAST_PASS_BEST_OF,
    LOW_INFO_ALPHA_RATIO, LOW_INFO_MAX_WORDS, LOW_INFO_MIN_CHARS, LOW_INFO_REPEAT_RATIO,
    TARGET_SAMPLE_RATE,
};
use crate::errors::AppError;
use crate::sidecar::ResolvedCli;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Artifact tokens whisper.cpp emits for non-speech stretches.
const ARTIFACT_TOKENS: [&str; 4] = ["BLANK_AUDIO", "NOISE", "MUSIC", "SILENCE"];

/// Removes temp files on every exit path of a transcription call.
struct TempFileGuard(Vec<PathBuf>);

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        for path in &self.0 {
            let _ = fs::remove_file(path);
        }
    }
}

/// Run the external CLI over conditioned 16 kHz mono samples and return the
/// cleaned transcript. A low-information fast pass is retried once with
/// wider beam settings; the better-covered candidate wins.
pub fn transcribe(
    samples: &[f32],
    model_path: &Path,
    cli: &ResolvedCli,
    logical_cores: usize,
) -> Result<String, AppError> {
    if samples.is_empty() {
        return Err(AppError::NoSpeech);
    }

    let temp_dir = std::env::temp_dir();
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let base = temp_dir.join(format!("dicktaint-{}-{}", std::process::id(), stamp));
    let wav_path = base.with_extension("wav");
    let txt_path = base.with_extension("txt");
    let _guard = TempFileGuard(vec![
        wav_path.clone(),
        txt_path.clone(),
        PathBuf::from(format!("{}.txt", wav_path.display())),
    ]);

    write_wav(&wav_path, samples)?;

    let threads = fast_pass_threads(logical_cores);
    let raw = run_whisper(
        cli,
        model_path,
        &wav_path,
        &base,
        &txt_path,
        threads,
        FAST_PASS_BEAM,
        FAST_PASS_BEST_OF,
    )?;
    let cleaned = clean_transcript(&raw);

    if cleaned.is_empty() {
        return Err(AppError::NoSpeech);
    }

    if !looks_low_information(&cleaned) {
        return Ok(cleaned);
    }

    info!("fast pass looks low-information, retrying with wider beam");
    let retry_raw = run_whisper(
        cli,
        model_path,
        &wav_path,
        &base,
        &txt_path,
        threads,
        ACCURACY_PASS_BEAM,
        ACCURACY_PASS_BEST_OF,
    );
    match retry_raw {
        Ok(raw) => {
            let retry_cleaned = clean_transcript(&raw);
            if retry_cleaned.is_empty() {
                return Ok(cleaned);
            }
            if coverage_score(&retry_cleaned) > coverage_score(&cleaned) {
                Ok(retry_cleaned)
            } else {
                Ok(cleaned)
            }
        }
        // The fast-pass result is still usable; a failed retry is not fatal.
        Err(err) => {
            debug!("accuracy retry failed, keeping fast pass: {}", err);
            Ok(cleaned)
        }
    }
}

/// Fast-pass thread count: leave a core for the UI, stay in a band that
/// whisper.cpp actually benefits from.
pub fn fast_pass_threads(logical_cores: usize) -> usize {
    logical_cores.saturating_sub(1).clamp(2, 8)
}

pub fn write_wav(path: &Path, samples: &[f32]) -> Result<(), AppError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec).map_err(|err| {
        AppError::TranscriptionFailed(format!(
            "failed to create wav file {}: {}",
            path.display(),
            err
        ))
    })?;
    for sample in samples {
        let clipped = sample.clamp(-1.0, 1.0);
        let pcm = (clipped * i16::MAX as f32) as i16;
        writer.write_sample(pcm).map_err(|err| {
            AppError::TranscriptionFailed(format!("failed to write wav sample: {}", err))
        })?;
    }
    writer.finalize().map_err(|err| {
        AppError::TranscriptionFailed(format!("failed to finalize wav file: {}", err))
    })
}

#[allow(clippy::too_many_arguments)]
fn run_whisper(
    cli: &ResolvedCli,
    model_path: &Path,
    wav_path: &Path,
    output_base: &Path,
    txt_path: &Path,
    threads: usize,
    beam: u32,
    best_of: u32,
) -> Result<String, AppError> {
    let mut command = Command::new(&cli.path);

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        command.creation_flags(0x08000000); // CREATE_NO_WINDOW
    }

    command
        .arg("-m")
        .arg(model_path)
        .arg("-f")
        .arg(wav_path)
        .arg("-l")
        .arg("en")
        .arg("-otxt")
        .arg("-nt")
        .arg("-np")
        .arg("-of")
        .arg(output_base)
        .arg("-t")
        .arg(threads.to_string())
        .arg("-bs")
        .arg(beam.to_string())
        .arg("-bo")
        .arg(best_of.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = command.output().map_err(|err| {
        AppError::TranscriptionFailed(format!(
            "failed to execute whisper-cli '{}': {}",
            cli.path.display(),
            err
        ))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let detail = if !stderr.is_empty() {
            stderr
        } else if !stdout.is_empty() {
            stdout
        } else {
            "no error output".to_string()
        };
        return Err(AppError::TranscriptionFailed(detail));
    }

    // Builds differ in where they honor -of; check the plausible landing
    // spots before declaring the output missing.
    let mut candidates: Vec<PathBuf> = Vec::new();
    push_unique_path(&mut candidates, txt_path.to_path_buf());
    push_unique_path(
        &mut candidates,
        PathBuf::from(format!("{}.txt", wav_path.display())),
    );
    push_unique_path(&mut candidates, wav_path.with_extension("txt"));

    match read_first_existing_text_file(&candidates) {
        Some((_, text)) => Ok(text),
        None => {
            let stdout_text = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !stdout_text.is_empty() {
                return Ok(stdout_text);
            }
            let checked = candidates
                .iter()
                .map(|path| format!("'{}'", path.display()))
                .collect::<Vec<_>>()
                .join(", ");
            Err(AppError::TranscriptionFailed(format!(
                "whisper-cli finished without producing a transcript; checked {}",
                checked
            )))
        }
    }
}

fn push_unique_path(paths: &mut Vec<PathBuf>, candidate: PathBuf) {
    if !paths.iter().any(|existing| existing == &candidate) {
        paths.push(candidate);
    }
}

fn read_first_existing_text_file(paths: &[PathBuf]) -> Option<(PathBuf, String)> {
    for path in paths {
        match fs::read_to_string(path) {
            Ok(content) => return Some((path.clone(), content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => {
                debug!("could not read transcript candidate {}: {}", path.display(), err);
            }
        }
    }
    None
}

/// Strip bracketed artifact tokens and collapse the remaining whitespace.
pub fn clean_transcript(raw: &str) -> String {
    raw.split_whitespace()
        .filter(|token| !is_artifact_token(token))
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_artifact_token(token: &str) -> bool {
    let had_wrapper = token.starts_with('[') || token.starts_with('(');
    let stripped = token
        .trim_start_matches(['[', '('])
        .trim_end_matches([']', ')', '.', ',', '!', '?']);
    let matches = ARTIFACT_TOKENS
        .iter()
        .any(|artifact| stripped.eq_ignore_ascii_case(artifact));
    if !matches {
        return false;
    }
    // Bare artifacts come out of the CLI fully uppercased; a lowercase
    // "music" in running text is real speech.
    had_wrapper || !stripped.chars().any(|c| c.is_lowercase())
}

/// Heuristic for output that deserves a wider-beam retry: very short text,
/// one word dominating the token stream, or mostly non-alphabetic content.
pub fn looks_low_information(text: &str) -> bool {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|word| {
            word.trim_matches(|c: char| !c.is_alphanumeric())
                .to_ascii_lowercase()
        })
        .filter(|word| !word.is_empty())
        .collect();

    if text.chars().count() < LOW_INFO_MIN_CHARS || words.len() <= LOW_INFO_MAX_WORDS {
        return true;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for word in &words {
        *counts.entry(word.as_str()).or_insert(0) += 1;
    }
    let max_count = counts.values().copied().max().unwrap_or(0);
    if max_count as f32 / words.len() as f32 >= LOW_INFO_REPEAT_RATIO {
        return true;
    }

    let total_chars = text.chars().filter(|c| !c.is_whitespace()).count();
    let alpha_chars = text.chars().filter(|c| c.is_alphabetic()).count();
    if total_chars > 0 && (alpha_chars as f32 / total_chars as f32) < LOW_INFO_ALPHA_RATIO {
        return true;
    }

    false
}

/// Coverage metric for picking between the fast and accuracy passes:
/// distinct words weighted by overall length. More varied, longer output
/// scores higher.
pub fn coverage_score(text: &str) -> f64 {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|word| {
            word.trim_matches(|c: char| !c.is_alphanumeric())
                .to_ascii_lowercase()
        })
        .filter(|word| !word.is_empty())
        .collect();
    if words.is_empty() {
        return 0.0;
    }
    let distinct = words
        .iter()
        .collect::<std::collections::HashSet<_>>()
        .len();
    distinct as f64 * (words.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_tokens_are_stripped() {
        assert_eq!(clean_transcript("[BLANK_AUDIO]"), "");
        assert_eq!(clean_transcript("(noise) hello [MUSIC] world"), "hello world");
        assert_eq!(clean_transcript("[silence]."), "");
        assert_eq!(clean_transcript("BLANK_AUDIO"), "");
    }

    #[test]
    fn ordinary_text_is_untouched_apart_from_whitespace() {
        assert_eq!(clean_transcript("  Hello   world. \n"), "Hello world.");
        assert_eq!(
            clean_transcript("The music was loud."),
            "The music was loud."
        );
    }

    #[test]
    fn short_output_is_low_information() {
        assert!(looks_low_information("the"));
        assert!(looks_low_information("ok ok"));
    }

    #[test]
    fn repeated_word_output_is_low_information() {
        assert!(looks_low_information("you you you you you you"));
    }

    #[test]
    fn symbol_heavy_output_is_low_information() {
        assert!(looks_low_information("... --- ... --- 1234 ....."));
    }

    #[test]
    fn normal_sentences_are_not_low_information() {
        assert!(!looks_low_information(
            "Schedule the review for Thursday afternoon and invite the whole team."
        ));
    }

    #[test]
    fn coverage_prefers_varied_longer_output() {
        let short = coverage_score("you you you");
        let long = coverage_score("please schedule the review for thursday afternoon");
        assert!(long > short);
    }

    #[test]
    fn thread_count_stays_in_band() {
        assert_eq!(fast_pass_threads(1), 2);
        assert_eq!(fast_pass_threads(4), 3);
        assert_eq!(fast_pass_threads(32), 8);
    }

    #[test]
    fn wav_round_trips_bit_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roundtrip.wav");
        let samples: Vec<f32> = (0..TARGET_SAMPLE_RATE / 10)
            .map(|i| (2.0 * std::f32::consts::PI * 330.0 * i as f32 / TARGET_SAMPLE_RATE as f32).sin() * 0.4)
            .collect();

        write_wav(&path, &samples).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, TARGET_SAMPLE_RATE);
        assert_eq!(spec.bits_per_sample, 16);

        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        let expected: Vec<i16> = samples
            .iter()
            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect();
        assert_eq!(read, expected);
    }

    #[test]
    fn transcript_candidates_are_deduplicated() {
        let mut paths = Vec::new();
        push_unique_path(&mut paths, PathBuf::from("/tmp/a.txt"));
        push_unique_path(&mut paths, PathBuf::from("/tmp/b.txt"));
        push_unique_path(&mut paths, PathBuf::from("/tmp/a.txt"));
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn first_existing_candidate_wins() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.txt");
        let present = dir.path().join("present.txt");
        fs::write(&present, "transcript here").unwrap();

        let found = read_first_existing_text_file(&[missing, present.clone()]).unwrap();
        assert_eq!(found.0, present);
        assert_eq!(found.1, "transcript here");
    }

    #[test]
    fn temp_guard_removes_files_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.txt");
        fs::write(&path, "x").unwrap();
        {
            let _guard = TempFileGuard(vec![path.clone()]);
        }
        assert!(!path.exists());
    }
}
