//! End-to-end pipeline tests with deterministic service fakes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use admute_models::{AdRegion, MediaPlaylist};
use admute_worker::config::ManifestConfig;
use admute_worker::testing::{
    read_segment, write_segment, FakeCodec, KeywordClassifier, ScriptedTranscriber, Vocabulary,
};
use admute_worker::{
    EmittedSegment, ManifestWriter, PipelineServices, SegmentProcessor, SegmentWatcher,
    StreamPaths, StreamSession, WorkerConfig,
};
use tempfile::TempDir;

const RATE: u32 = 16000;
const WORDS: [&str; 8] = [
    "welcome", "back", "sponsored", "by", "acme", "soap", "weather", "today",
];

struct Harness {
    _dir: TempDir,
    config: WorkerConfig,
    paths: StreamPaths,
    vocabulary: Arc<Vocabulary>,
    codec: Arc<FakeCodec>,
    transcriber: Arc<ScriptedTranscriber>,
    services: PipelineServices,
}

impl Harness {
    fn new(classifier: KeywordClassifier) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = WorkerConfig::default();
        config.input_root = dir.path().join("in");
        config.output_root = dir.path().join("out");
        config.work_dir = dir.path().join("work");
        config.watcher.scan_interval = Duration::from_millis(10);
        config.watcher.initial_delay = Duration::from_millis(10);
        config.watcher.poll_interval = Duration::from_millis(20);
        config.watcher.max_wait = Duration::from_millis(300);

        let paths = StreamPaths::for_stream(&config, "cam");
        std::fs::create_dir_all(&paths.input_dir).unwrap();
        std::fs::create_dir_all(&paths.output_dir).unwrap();
        std::fs::create_dir_all(&paths.scratch_dir).unwrap();

        let vocabulary = Arc::new(Vocabulary::new(WORDS));
        let codec = Arc::new(FakeCodec::new(RATE));
        let transcriber = Arc::new(ScriptedTranscriber::new(Arc::clone(&vocabulary)));
        let services = PipelineServices {
            codec: codec.clone(),
            transcriber: transcriber.clone(),
            classifier: Arc::new(classifier),
        };

        Self {
            _dir: dir,
            config,
            paths,
            vocabulary,
            codec,
            transcriber,
            services,
        }
    }

    async fn processor(&self) -> Arc<SegmentProcessor> {
        let manifest = Arc::new(ManifestWriter::new(
            &self.paths.output_manifest,
            ManifestConfig::default(),
        ));
        manifest.initialize().await.unwrap();
        Arc::new(SegmentProcessor::new(
            "cam",
            self.paths.clone(),
            &self.services,
            &self.config,
            manifest,
        ))
    }

    async fn segment(&self, index: u64, duration: f64, words: &[(&str, f64, f64)]) -> PathBuf {
        let audio = self.vocabulary.render(duration, RATE, words).unwrap();
        let path = self.paths.input_dir.join(format!("segment{}.ts", index));
        write_segment(&path, &audio).await.unwrap();
        path
    }

    async fn output_words(&self, file_name: &str) -> Vec<String> {
        let audio = read_segment(&self.paths.output_dir.join(file_name), RATE)
            .await
            .unwrap();
        self.vocabulary
            .decode(audio.samples(), RATE)
            .into_iter()
            .map(|w| w.word)
            .collect()
    }

    fn output_segments(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.paths.output_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.ends_with(".ts"))
            .collect();
        names.sort();
        names
    }

    fn manifest(&self) -> MediaPlaylist {
        let contents = std::fs::read_to_string(&self.paths.output_manifest).unwrap();
        MediaPlaylist::parse(&contents).unwrap()
    }
}

async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition().await
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[tokio::test]
async fn test_boundary_ad_is_muted_on_both_sides() {
    let h = Harness::new(
        KeywordClassifier::new()
            .rule("sponsored", 0.85)
            .suppress("weather"),
    );
    let processor = h.processor().await;

    // "sponsored by" closes segment A, "acme soap" opens segment B
    let a = h
        .segment(
            0,
            3.0,
            &[
                ("welcome", 0.5, 1.0),
                ("back", 1.05, 1.5),
                ("sponsored", 2.6, 2.85),
                ("by", 2.87, 3.0),
            ],
        )
        .await;
    let b = h
        .segment(
            1,
            3.0,
            &[
                ("acme", 0.0, 0.15),
                ("soap", 0.17, 0.3),
                ("weather", 1.5, 2.0),
                ("today", 2.05, 2.5),
            ],
        )
        .await;

    let mut emitted = processor.submit(&a, 0).await;
    emitted.extend(processor.submit(&b, 1).await);
    emitted.extend(processor.flush().await);

    assert_eq!(emitted.len(), 2);
    assert_eq!(emitted[0].regions, vec![AdRegion::new(2.6, 3.0)]);
    assert_eq!(emitted[1].regions, vec![AdRegion::new(0.0, 0.3)]);
    for segment in &emitted {
        assert!(!segment.passthrough);
        assert!((segment.duration - 3.0).abs() < 1e-9);
    }

    assert_eq!(h.output_words("segment0.ts").await, vec!["welcome", "back"]);
    assert_eq!(h.output_words("segment1.ts").await, vec!["weather", "today"]);
    for name in ["segment0.ts", "segment1.ts"] {
        let audio = read_segment(&h.paths.output_dir.join(name), RATE)
            .await
            .unwrap();
        assert_eq!(audio.samples().len(), 3 * RATE as usize);
    }

    let manifest = h.manifest();
    let uris: Vec<&str> = manifest.entries.iter().map(|e| e.uri.as_str()).collect();
    assert_eq!(uris, vec!["segment0.ts", "segment1.ts"]);
    assert_eq!(manifest.duration_of("segment1.ts"), Some(3.0));
}

#[tokio::test]
async fn test_no_segment_is_dropped_under_failures() {
    let h = Harness::new(
        KeywordClassifier::new()
            .rule("sponsored", 0.95)
            .failing_on("soap"),
    );
    h.codec.fail_extract("segment2.ts");
    h.codec.fail_remux("segment4.ts");
    let processor = h.processor().await;

    let scripts: [&[(&str, f64, f64)]; 3] = [
        &[("welcome", 0.2, 0.6), ("back", 0.65, 1.0)],
        &[("sponsored", 0.3, 0.8), ("by", 0.85, 1.0), ("acme", 1.05, 1.4)],
        &[("acme", 0.2, 0.5), ("soap", 0.55, 0.9)],
    ];

    let mut emitted: Vec<EmittedSegment> = Vec::new();
    let mut last_sequence = 0;
    for index in 0..10u64 {
        let path = h.segment(index, 2.0, scripts[index as usize % 3]).await;
        h.transcriber.set_failing(index == 7);
        emitted.extend(processor.submit(&path, index).await);

        let manifest = h.manifest();
        assert!(manifest.entries.len() <= ManifestConfig::default().window);
        assert!(manifest.media_sequence >= last_sequence);
        last_sequence = manifest.media_sequence;
    }
    h.transcriber.set_failing(false);
    emitted.extend(processor.flush().await);

    let indices: Vec<u64> = emitted.iter().map(|s| s.index).collect();
    assert_eq!(indices, (0..10).collect::<Vec<_>>());

    let outputs = h.output_segments();
    assert_eq!(outputs.len(), 10);
    for name in &outputs {
        assert!(file_len(&h.paths.output_dir.join(name)) > 0, "{} is empty", name);
    }

    assert_eq!(emitted[1].regions, vec![AdRegion::new(0.3, 1.4)]);
    assert!(emitted[2].passthrough);
    assert!(emitted[4].passthrough);
    assert!(!emitted[5].passthrough);
    // Transcription failed for segment 7, so its ad went through
    assert!(!emitted[7].passthrough);
    assert!(emitted[7].regions.is_empty());

    let manifest = h.manifest();
    assert_eq!(manifest.entries.len(), 6);
    assert_eq!(manifest.media_sequence, 4);
    assert_eq!(manifest.entries[5].uri, "segment9.ts");
}

#[tokio::test]
async fn test_repeated_notifications_submit_once() {
    let h = Harness::new(KeywordClassifier::new());
    let processor = h.processor().await;
    let watcher = SegmentWatcher::new(h.config.watcher.clone(), Arc::clone(&processor));

    let path = h.segment(0, 2.0, &[("welcome", 0.2, 0.6)]).await;
    for _ in 0..5 {
        watcher.on_segment_file_appeared(path.clone(), 0);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    assert!(wait_until(Duration::from_secs(3), || async { watcher.pending() == 0 }).await);
    assert_eq!(processor.buffered_index().await, Some(0));
    assert_eq!(h.transcriber.calls(), 1);

    // Once processed, later notifications are ignored
    watcher.on_segment_file_appeared(path.clone(), 0);
    assert_eq!(watcher.pending(), 0);
    assert!(h.output_segments().is_empty());

    watcher.shutdown().await;
}

#[tokio::test]
async fn test_growing_file_is_never_submitted() {
    let h = Harness::new(KeywordClassifier::new());
    let processor = h.processor().await;
    let watcher = SegmentWatcher::new(h.config.watcher.clone(), Arc::clone(&processor));

    let path = h.paths.input_dir.join("segment0.ts");
    std::fs::write(&path, vec![0u8; 400]).unwrap();
    let writer = {
        let path = path.clone();
        tokio::spawn(async move {
            for i in 0..100usize {
                tokio::fs::write(&path, vec![0u8; 400 + i * 40]).await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    watcher.on_segment_file_appeared(path, 0);
    assert!(wait_until(Duration::from_secs(3), || async { watcher.pending() == 0 }).await);
    writer.abort();

    assert!(!watcher.is_processed(0));
    assert_eq!(processor.buffered_index().await, None);
    assert_eq!(h.transcriber.calls(), 0);
    assert!(h.output_segments().is_empty());
}

#[tokio::test]
async fn test_session_processes_a_live_stream() {
    let h = Harness::new(KeywordClassifier::new().rule("sponsored", 0.95));
    let session = StreamSession::start(&h.config, "cam", &h.services)
        .await
        .unwrap();

    for index in 0..4u64 {
        h.segment(index, 2.0, &[("welcome", 0.2, 0.6), ("sponsored", 1.0, 1.4)])
            .await;
        let processor = Arc::clone(session.processor());
        assert!(
            wait_until(Duration::from_secs(3), || {
                let processor = Arc::clone(&processor);
                async move { processor.buffered_index().await == Some(index) }
            })
            .await,
            "segment {} was not ingested",
            index
        );
    }

    // Rewriting an ingested segment must not reprocess it
    h.segment(1, 2.0, &[("welcome", 0.2, 0.6)]).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let flushed = session.shutdown().await;
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].index, 3);
    assert_eq!(flushed[0].regions, vec![AdRegion::new(1.0, 1.4)]);

    assert_eq!(
        h.output_segments(),
        vec!["segment0.ts", "segment1.ts", "segment2.ts", "segment3.ts"]
    );
    let manifest = h.manifest();
    assert_eq!(manifest.entries.len(), 4);
    assert_eq!(manifest.media_sequence, 0);

    assert!(session.shutdown().await.is_empty());
}
