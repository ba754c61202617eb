use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntryKind {
    User,
    Assistant,
    Code,
    Console,
}

impl EntryKind {
    pub fn label(&self) -> &'static str {
        match self {
            EntryKind::User => "User",
            EntryKind::Assistant => "AI",
            EntryKind::Code => "Code",
            EntryKind::Console => "Console",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub kind: EntryKind,
    pub text: String,
    pub sequence_index: u64,
}

/// Append-only conversation log. Entries are never edited or removed; a reset
/// replaces the whole store.
#[derive(Debug, Default)]
pub struct TranscriptStore {
    entries: Vec<TranscriptEntry>,
    next_index: u64,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, kind: EntryKind, text: impl Into<String>) -> &TranscriptEntry {
        let sequence_index = self.next_index;
        self.next_index += 1;
        self.entries.push(TranscriptEntry {
            kind,
            text: text.into(),
            sequence_index,
        });
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Entries appended at or after `sequence_index`, for incremental readers.
    pub fn since(&self, sequence_index: u64) -> &[TranscriptEntry] {
        let start = self
            .entries
            .partition_point(|e| e.sequence_index < sequence_index);
        &self.entries[start..]
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_indices_follow_append_order() {
        let mut store = TranscriptStore::new();
        store.append(EntryKind::User, "open chrome");
        store.append(EntryKind::Assistant, "On it.");
        store.append(EntryKind::Code, "import webbrowser");

        let indices: Vec<u64> = store.entries().iter().map(|e| e.sequence_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(store.last().unwrap().kind, EntryKind::Code);
    }

    #[test]
    fn since_returns_tail() {
        let mut store = TranscriptStore::new();
        for i in 0..5 {
            store.append(EntryKind::Console, format!("line {}", i));
        }
        let tail = store.since(3);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].text, "line 3");
        assert!(store.since(10).is_empty());
    }
}
