//! Deterministic fakes for the pipeline's external services.
//!
//! Segment files used with these fakes hold raw little-endian f32 mono
//! samples instead of a real container. Speech is encoded in the samples:
//! each vocabulary word is a run of a constant level unique to that word,
//! which [`ScriptedTranscriber`] decodes back into timestamped words.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use admute_media::{write_atomic, AudioBuffer, CodecService, MediaError, MediaResult};
use admute_ml_client::{Classification, Classifier, MlError, MlResult, Transcriber};
use admute_models::{file_name_of, TranscriptWord};
use async_trait::async_trait;
use tokio::fs;

/// Shortest run of equal samples decoded as a word (1 ms at 16 kHz).
const MIN_RUN_SAMPLES: usize = 16;

/// Maps words to the sample level that encodes them.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    words: Vec<String>,
}

impl Vocabulary {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            words: words.into_iter().map(Into::into).collect(),
        }
    }

    fn level_at(i: usize) -> f32 {
        0.3 + 0.002 * i as f32
    }

    /// Sample level encoding `word`.
    pub fn level(&self, word: &str) -> Option<f32> {
        self.words.iter().position(|w| w == word).map(Self::level_at)
    }

    fn word_for(&self, level: f32) -> Option<&str> {
        (0..self.words.len())
            .find(|i| Self::level_at(*i) == level)
            .map(|i| self.words[i].as_str())
    }

    /// Silent audio with `words` spoken at the given `(word, start, end)` times.
    pub fn render(
        &self,
        duration_secs: f64,
        sample_rate: u32,
        words: &[(&str, f64, f64)],
    ) -> Result<AudioBuffer, String> {
        let len = (duration_secs * sample_rate as f64).round() as usize;
        let mut samples = vec![0.0f32; len];
        for (word, start, end) in words {
            let level = self
                .level(word)
                .ok_or_else(|| format!("'{}' is not in the vocabulary", word))?;
            let from = ((start * sample_rate as f64).round() as usize).min(len);
            let to = ((end * sample_rate as f64).round() as usize).min(len);
            samples[from..to.max(from)].fill(level);
        }
        Ok(AudioBuffer::new(samples, sample_rate))
    }

    /// Decode spoken words from audio rendered by [`Vocabulary::render`].
    pub fn decode(&self, samples: &[f32], sample_rate: u32) -> Vec<TranscriptWord> {
        let rate = sample_rate.max(1) as f64;
        let mut words = Vec::new();
        let mut run_start = 0;

        for i in 1..=samples.len() {
            if i < samples.len() && samples[i] == samples[run_start] {
                continue;
            }
            if i - run_start >= MIN_RUN_SAMPLES {
                if let Some(word) = self.word_for(samples[run_start]) {
                    words.push(TranscriptWord::new(
                        word,
                        run_start as f64 / rate,
                        i as f64 / rate,
                    ));
                }
            }
            run_start = i;
        }
        words
    }
}

/// Write a fake segment file holding `audio` as raw f32le samples.
pub async fn write_segment(path: &Path, audio: &AudioBuffer) -> MediaResult<()> {
    write_atomic(path, audio.to_f32le_bytes()).await
}

/// Read a fake segment file back.
pub async fn read_segment(path: &Path, sample_rate: u32) -> MediaResult<AudioBuffer> {
    let bytes = fs::read(path).await?;
    Ok(AudioBuffer::from_f32le_bytes(&bytes, sample_rate))
}

/// Transcriber decoding words from vocabulary-encoded audio.
pub struct ScriptedTranscriber {
    vocabulary: Arc<Vocabulary>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn new(vocabulary: Arc<Vocabulary>) -> Self {
        Self {
            vocabulary,
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> MlResult<Vec<TranscriptWord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(MlError::ServiceUnavailable("injected failure".to_string()));
        }
        Ok(self.vocabulary.decode(samples, sample_rate))
    }
}

/// Classifier flagging texts that contain configured keywords.
///
/// A text is an ad when it contains any rule keyword and no suppressing
/// keyword; its confidence is the highest matching rule's.
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier {
    rules: Vec<(String, f32)>,
    suppressors: Vec<String>,
    failing_on: Vec<String>,
}

impl KeywordClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, keyword: &str, confidence: f32) -> Self {
        self.rules.push((keyword.to_lowercase(), confidence));
        self
    }

    pub fn suppress(mut self, keyword: &str) -> Self {
        self.suppressors.push(keyword.to_lowercase());
        self
    }

    /// Fail every request whose text contains `keyword`.
    pub fn failing_on(mut self, keyword: &str) -> Self {
        self.failing_on.push(keyword.to_lowercase());
        self
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> MlResult<Classification> {
        let text = text.to_lowercase();
        if self.failing_on.iter().any(|k| text.contains(k.as_str())) {
            return Err(MlError::InvalidResponse("injected failure".to_string()));
        }
        if self.suppressors.iter().any(|k| text.contains(k.as_str())) {
            return Ok(Classification::not_ad());
        }

        let confidence = self
            .rules
            .iter()
            .filter(|(keyword, _)| text.contains(keyword.as_str()))
            .map(|(_, confidence)| *confidence)
            .fold(None, |best: Option<f32>, c| Some(best.map_or(c, |b| b.max(c))));

        Ok(match confidence {
            Some(confidence) => Classification {
                is_ad: true,
                confidence,
            },
            None => Classification::not_ad(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Extract,
    Remux,
}

#[derive(Debug, Default)]
struct InjectedFailures {
    extract: HashSet<String>,
    remux: HashSet<String>,
}

/// In-memory codec over raw f32le segment files.
///
/// Failures are injected by segment file name; a retained copy of a segment
/// matches when its name ends with the injected name.
#[derive(Debug)]
pub struct FakeCodec {
    sample_rate: u32,
    failures: Mutex<InjectedFailures>,
    remux_calls: AtomicUsize,
}

impl FakeCodec {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            failures: Mutex::new(InjectedFailures::default()),
            remux_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_extract(&self, file_name: &str) {
        self.with_failures(|f| f.extract.insert(file_name.to_string()));
    }

    pub fn fail_remux(&self, file_name: &str) {
        self.with_failures(|f| f.remux.insert(file_name.to_string()));
    }

    pub fn remux_calls(&self) -> usize {
        self.remux_calls.load(Ordering::SeqCst)
    }

    fn with_failures<R>(&self, f: impl FnOnce(&mut InjectedFailures) -> R) -> R {
        let mut guard = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    fn injected(&self, path: &Path, op: Op) -> bool {
        let Some(name) = file_name_of(path) else {
            return false;
        };
        self.with_failures(|f| {
            let names = match op {
                Op::Extract => &f.extract,
                Op::Remux => &f.remux,
            };
            names.iter().any(|n| name.ends_with(n.as_str()))
        })
    }
}

#[async_trait]
impl CodecService for FakeCodec {
    async fn extract_audio(&self, segment: &Path, _scratch_dir: &Path) -> MediaResult<AudioBuffer> {
        if self.injected(segment, Op::Extract) {
            return Err(MediaError::ffmpeg_failed("injected failure", None, Some(1)));
        }
        if !segment.exists() {
            return Err(MediaError::FileNotFound(segment.to_path_buf()));
        }
        let audio = read_segment(segment, self.sample_rate).await?;
        if audio.is_empty() {
            return Err(MediaError::NoAudio(segment.to_path_buf()));
        }
        Ok(audio)
    }

    async fn remux(
        &self,
        original: &Path,
        audio: &AudioBuffer,
        output: &Path,
        _scratch_dir: &Path,
    ) -> MediaResult<()> {
        self.remux_calls.fetch_add(1, Ordering::SeqCst);
        if self.injected(original, Op::Remux) {
            return Err(MediaError::ffmpeg_failed("injected failure", None, Some(1)));
        }
        if !original.exists() {
            return Err(MediaError::FileNotFound(original.to_path_buf()));
        }
        write_segment(output, audio).await
    }

    async fn probe_duration(&self, segment: &Path) -> MediaResult<Option<f64>> {
        let len = fs::metadata(segment).await?.len();
        Ok(Some(len as f64 / 4.0 / self.sample_rate as f64))
    }
}
