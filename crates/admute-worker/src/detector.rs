//! Ad region detection over transcript fragments.
//!
//! Each fragment is classified twice: on its own, and prefixed with the
//! rolling context of the text that preceded it. A fragment is an ad when
//! the context classification is positive, or when the solo classification
//! is positive with confidence above the solo threshold. Positive fragments
//! become regions, which are merged across small gaps.

use std::sync::Arc;

use admute_ml_client::{Classification, Classifier};
use admute_models::{merge_regions, AdRegion, TranscriptFragment};
use tracing::{debug, warn};

use crate::config::DetectorConfig;

/// Output of one detection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Merged, start-ordered ad regions
    pub regions: Vec<AdRegion>,
    /// Per-fragment decisions, in input order
    pub decisions: Vec<bool>,
    /// Context to pass to the next call
    pub context: String,
}

/// Classifies fragments and turns positives into merged regions.
#[derive(Clone)]
pub struct AdDetector {
    classifier: Arc<dyn Classifier>,
    config: DetectorConfig,
}

impl AdDetector {
    pub fn new(classifier: Arc<dyn Classifier>, config: DetectorConfig) -> Self {
        Self { classifier, config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Detect ad regions in `fragments`, continuing from `previous_context`.
    ///
    /// Classifier failures are logged and count as "not an ad".
    pub async fn detect(
        &self,
        fragments: &[TranscriptFragment],
        previous_context: &str,
    ) -> Detection {
        let mut context = previous_context.to_string();
        let mut candidates = Vec::new();
        let mut decisions = Vec::with_capacity(fragments.len());

        for fragment in fragments {
            let is_ad = self.classify_fragment(fragment, &context).await;
            if is_ad {
                candidates.push(AdRegion::new(fragment.start, fragment.end));
            }
            decisions.push(is_ad);
            context = self.extend_context(&context, &fragment.sentence);
        }

        let regions = merge_regions(&candidates, self.config.merge_gap_secs);
        if !regions.is_empty() {
            debug!(
                fragments = fragments.len(),
                regions = regions.len(),
                "Detected ad regions"
            );
        }

        Detection {
            regions,
            decisions,
            context,
        }
    }

    /// Append `sentence` to `context`, keeping only the trailing characters.
    pub fn extend_context(&self, context: &str, sentence: &str) -> String {
        let joined = if context.is_empty() {
            sentence.to_string()
        } else {
            format!("{} {}", context, sentence)
        };
        tail_chars(&joined, self.config.context_chars)
    }

    async fn classify_fragment(&self, fragment: &TranscriptFragment, context: &str) -> bool {
        let with_context = if context.is_empty() {
            None
        } else {
            Some(format!("{} {}", context, fragment.sentence))
        };

        let (solo, contextual) = match &with_context {
            Some(text) => {
                let (solo, contextual) = tokio::join!(
                    self.classify_or_negative(&fragment.sentence),
                    self.classify_or_negative(text)
                );
                (solo, contextual)
            }
            None => {
                let solo = self.classify_or_negative(&fragment.sentence).await;
                (solo, solo)
            }
        };

        contextual.is_ad
            || (solo.is_ad && solo.confidence > self.config.solo_confidence_threshold)
    }

    async fn classify_or_negative(&self, text: &str) -> Classification {
        match self.classifier.classify(text).await {
            Ok(classification) => classification,
            Err(e) => {
                warn!(error = %e, "Classification failed, treating fragment as not an ad");
                Classification::not_ad()
            }
        }
    }
}

/// Last `n` characters of `text`.
fn tail_chars(text: &str, n: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::KeywordClassifier;

    fn fragment(sentence: &str, start: f64, end: f64) -> TranscriptFragment {
        TranscriptFragment::from_words(
            start,
            end,
            sentence.split_whitespace().map(String::from).collect(),
        )
        .unwrap()
    }

    fn detector(classifier: KeywordClassifier) -> AdDetector {
        AdDetector::new(Arc::new(classifier), DetectorConfig::default())
    }

    #[tokio::test]
    async fn test_confident_solo_positive() {
        let detector = detector(KeywordClassifier::new().rule("discount", 0.95));
        let fragments = vec![
            fragment("welcome back", 0.0, 1.0),
            fragment("huge discount today", 1.5, 2.5),
        ];
        let detection = detector.detect(&fragments, "").await;
        assert_eq!(detection.decisions, vec![false, true]);
        assert_eq!(detection.regions, vec![AdRegion::new(1.5, 2.5)]);
    }

    #[tokio::test]
    async fn test_solo_positive_needs_high_confidence_when_context_disagrees() {
        let detector = detector(
            KeywordClassifier::new()
                .rule("deal", 0.85)
                .rule("bargain", 0.95)
                .suppress("weather"),
        );
        let fragments = vec![fragment("good deal", 0.0, 1.0), fragment("real bargain", 2.0, 3.0)];

        let detection = detector.detect(&fragments, "the weather").await;

        assert_eq!(detection.decisions, vec![false, true]);
        assert_eq!(detection.regions, vec![AdRegion::new(2.0, 3.0)]);
    }

    #[tokio::test]
    async fn test_without_context_the_classifier_decides() {
        let detector = detector(KeywordClassifier::new().rule("deal", 0.85));
        let fragments = vec![fragment("good deal", 0.0, 1.0)];
        let detection = detector.detect(&fragments, "").await;
        assert_eq!(detection.decisions, vec![true]);
    }

    #[tokio::test]
    async fn test_context_lowers_the_bar() {
        let detector = detector(KeywordClassifier::new().rule("sponsored", 0.85));
        let fragments = vec![fragment("acme soap", 0.0, 0.3)];

        let detection = detector.detect(&fragments, "this show is sponsored by").await;

        assert_eq!(detection.decisions, vec![true]);
        assert_eq!(detection.regions, vec![AdRegion::new(0.0, 0.3)]);
    }

    #[tokio::test]
    async fn test_regions_merge_across_small_gap() {
        let detector = detector(KeywordClassifier::new().rule("buy", 0.99));
        let fragments = vec![
            fragment("buy this", 0.0, 1.0),
            fragment("buy that", 1.4, 2.0),
            fragment("buy more", 3.0, 3.5),
        ];
        let detection = detector.detect(&fragments, "").await;
        assert_eq!(
            detection.regions,
            vec![AdRegion::new(0.0, 2.0), AdRegion::new(3.0, 3.5)]
        );
    }

    #[tokio::test]
    async fn test_classifier_failure_is_not_an_ad() {
        let detector = detector(KeywordClassifier::new().rule("buy", 0.99).failing_on("buy"));
        let fragments = vec![fragment("buy now", 0.0, 1.0)];
        let detection = detector.detect(&fragments, "").await;
        assert!(detection.regions.is_empty());
    }

    #[tokio::test]
    async fn test_context_is_tail_of_sentences() {
        let detector = AdDetector::new(
            Arc::new(KeywordClassifier::new()),
            DetectorConfig {
                context_chars: 10,
                ..Default::default()
            },
        );
        let fragments = vec![fragment("first part", 0.0, 1.0), fragment("second part", 2.0, 3.0)];
        let detection = detector.detect(&fragments, "").await;
        assert_eq!(detection.context, "econd part");
    }

    #[tokio::test]
    async fn test_split_calls_match_single_call() {
        let detector = detector(
            KeywordClassifier::new()
                .rule("sponsored", 0.85)
                .rule("offer", 0.95),
        );
        let all = vec![
            fragment("hello everyone", 0.0, 1.0),
            fragment("today we are sponsored", 2.0, 3.0),
            fragment("by acme", 4.0, 5.0),
            fragment("and now", 6.0, 7.0),
            fragment("the weather forecast for the whole week ahead", 8.0, 9.0),
            fragment("rain mostly", 10.0, 11.0),
            fragment("limited offer", 12.0, 13.0),
        ];

        let single = detector.detect(&all, "").await;
        for split in 0..=all.len() {
            let first = detector.detect(&all[..split], "").await;
            let second = detector.detect(&all[split..], &first.context).await;
            let mut decisions = first.decisions.clone();
            decisions.extend(second.decisions);
            assert_eq!(decisions, single.decisions, "split at {}", split);
            assert_eq!(second.context, single.context);
        }
    }

    #[test]
    fn test_tail_chars_is_char_based() {
        assert_eq!(tail_chars("héllo wörld", 5), "wörld");
        assert_eq!(tail_chars("abc", 10), "abc");
        assert_eq!(tail_chars("abc", 0), "");
    }
}
