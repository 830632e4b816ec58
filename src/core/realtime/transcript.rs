//! Incremental transcript reconstruction.
//!
//! The remote side streams text for each conversation item as ordered delta
//! fragments and then marks the item done. [`TranscriptStore`] accumulates
//! fragments per item ID so interleaved items never mix, and finalizes an
//! item into its complete text.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::TranscriptRole;

/// What happens to an item's text once it is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    /// Drop the text after surfacing it
    #[default]
    Discard,
    /// Keep finalized text in an ordered history
    Retain,
}

impl RetentionPolicy {
    /// Parse a config value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "discard" => Some(Self::Discard),
            "retain" | "keep" => Some(Self::Retain),
            _ => None,
        }
    }
}

/// A completed transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedTranscript {
    pub item_id: String,
    pub role: TranscriptRole,
    pub text: String,
}

#[derive(Debug)]
struct PendingTranscript {
    role: TranscriptRole,
    text: String,
}

/// Per-item transcript accumulator.
#[derive(Debug, Default)]
pub struct TranscriptStore {
    pending: HashMap<String, PendingTranscript>,
    history: Vec<FinalizedTranscript>,
    policy: RetentionPolicy,
}

impl TranscriptStore {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    /// Append a fragment to `item_id`, creating the entry on first use.
    ///
    /// Returns the text accumulated so far.
    pub fn append(&mut self, item_id: &str, role: TranscriptRole, fragment: &str) -> &str {
        let entry = self
            .pending
            .entry(item_id.to_string())
            .or_insert_with(|| PendingTranscript {
                role,
                text: String::new(),
            });
        entry.text.push_str(fragment);
        &entry.text
    }

    /// Finalize `item_id` and return its complete text.
    ///
    /// The accumulated fragments are authoritative; `full_text` from the done
    /// event is used when no fragments were received.
    pub fn finalize(&mut self, item_id: &str, role: TranscriptRole, full_text: &str) -> String {
        let (role, text) = match self.pending.remove(item_id) {
            Some(pending) if !pending.text.is_empty() => (pending.role, pending.text),
            Some(pending) => (pending.role, full_text.to_string()),
            None => (role, full_text.to_string()),
        };

        if !full_text.is_empty() && text != full_text {
            tracing::debug!(
                "Transcript for {} differs from done event ({} vs {} bytes)",
                item_id,
                text.len(),
                full_text.len()
            );
        }

        self.record(item_id, role, &text);
        text
    }

    /// Record an already-complete transcript (e.g. user speech).
    pub fn record(&mut self, item_id: &str, role: TranscriptRole, text: &str) {
        if self.policy == RetentionPolicy::Retain {
            self.history.push(FinalizedTranscript {
                item_id: item_id.to_string(),
                role,
                text: text.to_string(),
            });
        }
    }

    /// Text accumulated so far for an unfinished item.
    pub fn pending_text(&self, item_id: &str) -> Option<&str> {
        self.pending.get(item_id).map(|p| p.text.as_str())
    }

    /// Number of unfinished items.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Finalized transcripts, oldest first. Empty under [`RetentionPolicy::Discard`].
    pub fn history(&self) -> &[FinalizedTranscript] {
        &self.history
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconstructs_fragments() {
        let mut store = TranscriptStore::default();
        store.append("item_1", TranscriptRole::Assistant, "Hel");
        let running = store.append("item_1", TranscriptRole::Assistant, "lo");
        assert_eq!(running, "Hello");

        let text = store.finalize("item_1", TranscriptRole::Assistant, "Hello");
        assert_eq!(text, "Hello");
        assert_eq!(store.pending_count(), 0);
        assert!(store.history().is_empty());
    }

    #[test]
    fn test_interleaved_items_stay_separate() {
        let mut store = TranscriptStore::default();
        store.append("a", TranscriptRole::Assistant, "one ");
        store.append("b", TranscriptRole::Assistant, "uno ");
        store.append("a", TranscriptRole::Assistant, "two");
        store.append("b", TranscriptRole::Assistant, "dos");

        assert_eq!(store.finalize("b", TranscriptRole::Assistant, ""), "uno dos");
        assert_eq!(store.pending_text("a"), Some("one two"));
        assert_eq!(store.finalize("a", TranscriptRole::Assistant, ""), "one two");
    }

    #[test]
    fn test_done_without_fragments_uses_full_text() {
        let mut store = TranscriptStore::default();
        assert_eq!(
            store.finalize("x", TranscriptRole::Assistant, "complete"),
            "complete"
        );
    }

    #[test]
    fn test_retain_policy_keeps_history() {
        let mut store = TranscriptStore::new(RetentionPolicy::Retain);
        store.record("u1", TranscriptRole::User, "hi there");
        store.append("a1", TranscriptRole::Assistant, "hello");
        store.finalize("a1", TranscriptRole::Assistant, "hello");

        let history = store.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, TranscriptRole::User);
        assert_eq!(history[1].text, "hello");
    }

    #[test]
    fn test_retention_parse() {
        assert_eq!(RetentionPolicy::parse("RETAIN"), Some(RetentionPolicy::Retain));
        assert_eq!(RetentionPolicy::parse("discard"), Some(RetentionPolicy::Discard));
        assert_eq!(RetentionPolicy::parse("forever"), None);
    }
}
