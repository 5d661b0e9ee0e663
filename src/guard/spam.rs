use std::collections::HashMap;

/// A run of this many identical messages at the tail of the history flags
/// spam.
pub const SPAM_REPEAT_RUN: usize = 3;

/// Any single message text occurring more than this many times within the
/// supplied history flags spam.
pub const SPAM_MAX_DUPLICATES: usize = 5;

/// Repetition/frequency heuristics over a caller-supplied recent-message
/// history. Stateless: the caller owns and bounds the history (typically
/// the last N messages of one conversation) - no storage or eviction
/// happens here.
#[derive(Clone, Default)]
pub struct SpamDetector;

impl SpamDetector {
    pub fn new() -> Self {
        Self
    }

    /// True when either heuristic fires: the last three messages are
    /// identical, or any one message repeats more than five times in the
    /// window. The actor id identifies whose history was supplied; the
    /// heuristics themselves only look at the messages.
    pub fn is_spam(&self, recent: &[String], _actor_id: &str) -> bool {
        self.tail_run_identical(recent) || self.exceeds_duplicate_cap(recent)
    }

    fn tail_run_identical(&self, recent: &[String]) -> bool {
        if recent.len() < SPAM_REPEAT_RUN {
            return false;
        }
        let tail = &recent[recent.len() - SPAM_REPEAT_RUN..];
        tail.windows(2).all(|pair| pair[0] == pair[1])
    }

    fn exceeds_duplicate_cap(&self, recent: &[String]) -> bool {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for message in recent {
            let count = counts.entry(message.as_str()).or_insert(0);
            *count += 1;
            if *count > SPAM_MAX_DUPLICATES {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_three_identical_tail_messages_flag() {
        let detector = SpamDetector::new();
        let recent = msgs(&["hi", "buy now", "buy now", "buy now"]);
        assert!(detector.is_spam(&recent, "actor-1"));
    }

    #[test]
    fn test_two_identical_tail_messages_pass() {
        let detector = SpamDetector::new();
        let recent = msgs(&["hi", "buy now", "buy now"]);
        assert!(!detector.is_spam(&recent, "actor-1"));
    }

    #[test]
    fn test_short_history_never_flags_on_run() {
        let detector = SpamDetector::new();
        assert!(!detector.is_spam(&msgs(&["same", "same"]), "actor-1"));
        assert!(!detector.is_spam(&msgs(&["same"]), "actor-1"));
        assert!(!detector.is_spam(&[], "actor-1"));
    }

    #[test]
    fn test_six_duplicates_in_twenty_flag() {
        let detector = SpamDetector::new();
        let mut recent = Vec::new();
        for i in 0..20 {
            if i % 3 == 0 && recent.iter().filter(|m| *m == "great deal").count() < 6 {
                recent.push("great deal".to_string());
            } else {
                recent.push(format!("message {}", i));
            }
        }
        assert_eq!(recent.iter().filter(|m| *m == "great deal").count(), 6);
        assert!(detector.is_spam(&recent, "actor-1"));
    }

    #[test]
    fn test_five_duplicates_without_tail_run_pass() {
        let detector = SpamDetector::new();
        let recent = msgs(&[
            "dup", "a", "dup", "b", "dup", "c", "dup", "d", "dup", "e",
        ]);
        assert!(!detector.is_spam(&recent, "actor-1"));
    }
}
