//! Transcript types produced by the speech recognition service.

use serde::{Deserialize, Serialize};

/// A single recognized word with segment-relative timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptWord {
    /// Recognized text
    pub word: String,
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
}

impl TranscriptWord {
    /// Create a new word.
    pub fn new(word: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            word: word.into(),
            start,
            end,
        }
    }

    /// Duration of the word in seconds.
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// A sentence-like run of words separated from its neighbours by a pause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptFragment {
    /// Start time in seconds (segment-relative)
    pub start: f64,
    /// End time in seconds (segment-relative)
    pub end: f64,
    /// Words joined with single spaces, trimmed
    pub sentence: String,
    /// Words in spoken order
    pub words: Vec<String>,
}

impl TranscriptFragment {
    /// Build a fragment from its words.
    ///
    /// Returns `None` if the joined sentence is empty after trimming.
    pub fn from_words(start: f64, end: f64, words: Vec<String>) -> Option<Self> {
        let sentence = words.join(" ").trim().to_string();
        if sentence.is_empty() {
            return None;
        }
        Some(Self {
            start: start.min(end),
            end: end.max(start),
            sentence,
            words,
        })
    }

    /// Whether this fragment starts before `boundary` and ends after it.
    pub fn straddles(&self, boundary: f64) -> bool {
        self.start < boundary && self.end > boundary
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_from_words() {
        let frag = TranscriptFragment::from_words(
            1.0,
            2.0,
            vec!["buy".to_string(), "now".to_string()],
        )
        .unwrap();
        assert_eq!(frag.sentence, "buy now");
        assert!((frag.duration() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fragment_rejects_blank_sentence() {
        assert!(TranscriptFragment::from_words(0.0, 1.0, vec![" ".to_string()]).is_none());
        assert!(TranscriptFragment::from_words(0.0, 1.0, Vec::new()).is_none());
    }

    #[test]
    fn test_straddles() {
        let frag = TranscriptFragment::from_words(2.6, 3.3, vec!["promo".to_string()]).unwrap();
        assert!(frag.straddles(3.0));
        assert!(!frag.straddles(2.6));
        assert!(!frag.straddles(3.3));
    }

    #[test]
    fn test_word_duration_never_negative() {
        let word = TranscriptWord::new("x", 2.0, 1.0);
        assert_eq!(word.duration(), 0.0);
    }

    #[test]
    fn test_word_deserializes_from_service_json() {
        let word: TranscriptWord =
            serde_json::from_str(r#"{"word":"acme","start":0.5,"end":0.9}"#).unwrap();
        assert_eq!(word, TranscriptWord::new("acme", 0.5, 0.9));
    }
}
