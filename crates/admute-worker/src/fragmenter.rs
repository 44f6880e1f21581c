//! Transcript fragmenting.
//!
//! Turns the flat, timestamped word list returned by the transcriber into
//! sentence-like fragments split on pauses, after filtering noise words.

use admute_models::{TranscriptFragment, TranscriptWord};

use crate::config::FragmenterConfig;

/// Groups transcript words into fragments.
#[derive(Debug, Clone, Default)]
pub struct Fragmenter {
    config: FragmenterConfig,
}

impl Fragmenter {
    pub fn new(config: FragmenterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FragmenterConfig {
        &self.config
    }

    /// Whether a transcript holds enough real speech to be worth classifying.
    ///
    /// Only words longer than 0.1s with more than one character count.
    pub fn has_enough_speech(&self, words: &[TranscriptWord]) -> bool {
        let speech: f64 = words
            .iter()
            .filter(|w| w.duration() > 0.1 && w.word.trim().chars().count() > 1)
            .map(TranscriptWord::duration)
            .sum();
        speech > 0.0 && speech >= self.config.min_speech_secs
    }

    /// Split words into fragments on pauses and word-count limits.
    pub fn fragment(&self, words: &[TranscriptWord]) -> Vec<TranscriptFragment> {
        let mut fragments = Vec::new();
        let mut current: Vec<&TranscriptWord> = Vec::new();

        for word in words.iter().filter(|w| self.is_valid_word(w)) {
            if let Some(last) = current.last() {
                let pause = word.start - last.end;
                if pause >= self.config.min_pause_secs || current.len() >= self.config.max_words {
                    self.close(&mut current, &mut fragments);
                }
            }
            current.push(word);
        }
        self.close(&mut current, &mut fragments);

        fragments
    }

    fn is_valid_word(&self, word: &TranscriptWord) -> bool {
        !word.word.trim().is_empty() && word.duration() >= self.config.min_word_secs
    }

    fn close(&self, current: &mut Vec<&TranscriptWord>, out: &mut Vec<TranscriptFragment>) {
        let (Some(first), Some(last)) = (current.first(), current.last()) else {
            return;
        };
        let (start, end) = (first.start, last.end);
        let words = current.iter().map(|w| w.word.trim().to_string()).collect();
        current.clear();

        if let Some(fragment) = TranscriptFragment::from_words(start, end, words) {
            if fragment.sentence.chars().count() >= self.config.min_sentence_chars {
                out.push(fragment);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(word: &str, start: f64, end: f64) -> TranscriptWord {
        TranscriptWord::new(word, start, end)
    }

    #[test]
    fn test_splits_on_pause() {
        let words = vec![
            w("hello", 0.0, 0.4),
            w("there", 0.45, 0.8),
            w("buy", 1.2, 1.4),
            w("now", 1.45, 1.7),
        ];
        let fragments = Fragmenter::default().fragment(&words);

        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].sentence, "hello there");
        assert_eq!((fragments[0].start, fragments[0].end), (0.0, 0.8));
        assert_eq!(fragments[1].sentence, "buy now");
        assert_eq!(fragments[1].words, vec!["buy", "now"]);
    }

    #[test]
    fn test_pause_exactly_at_threshold_splits() {
        let words = vec![w("alpha", 0.0, 0.5), w("beta", 0.65, 1.0)];
        let fragments = Fragmenter::default().fragment(&words);
        assert_eq!(fragments.len(), 2);
    }

    #[test]
    fn test_splits_on_word_limit() {
        let words: Vec<_> = (0..25)
            .map(|i| w("word", i as f64 * 0.2, i as f64 * 0.2 + 0.15))
            .collect();
        let fragments = Fragmenter::default().fragment(&words);

        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].words.len(), 10);
        assert_eq!(fragments[2].words.len(), 5);
    }

    #[test]
    fn test_skips_noise_words() {
        let words = vec![
            w("", 0.0, 0.3),
            w("uh", 0.3, 0.32),
            w("real", 0.35, 0.7),
            w("words", 0.72, 1.0),
        ];
        let fragments = Fragmenter::default().fragment(&words);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].sentence, "real words");
        assert_eq!(fragments[0].start, 0.35);
    }

    #[test]
    fn test_drops_short_sentences() {
        let words = vec![w("ok", 0.0, 0.3), w("fine then", 2.0, 2.5)];
        let fragments = Fragmenter::default().fragment(&words);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].sentence, "fine then");
    }

    #[test]
    fn test_empty_transcript() {
        assert!(Fragmenter::default().fragment(&[]).is_empty());
        assert!(!Fragmenter::default().has_enough_speech(&[]));
    }

    #[test]
    fn test_speech_gate() {
        let fragmenter = Fragmenter::default();
        // Short and single-character words do not count
        assert!(!fragmenter.has_enough_speech(&[w("a", 0.0, 1.0), w("hi", 1.0, 1.05)]));
        assert!(!fragmenter.has_enough_speech(&[w("hello", 0.0, 0.2)]));
        assert!(fragmenter.has_enough_speech(&[w("hello", 0.0, 0.2), w("world", 0.3, 0.5)]));
    }
}
