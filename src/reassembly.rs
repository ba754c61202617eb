use crate::protocol::{CodeFragment, FragmentShape};
use crate::transcript::EntryKind;
use std::collections::HashMap;

/// The `(role, kind)` pair a structured fragment declares.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub role: String,
    pub kind: String,
}

impl StreamKey {
    pub fn new(role: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            kind: kind.into(),
        }
    }

    pub fn of(fragment: &CodeFragment) -> Self {
        Self::new(fragment.role.as_str(), fragment.kind.as_str())
    }
}

/// How fragments for a key are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRoute {
    /// Accumulate start/content/end and emit one entry of this kind.
    Buffered(EntryKind),
    /// Not a recognized pair: each fragment is emitted verbatim.
    Opaque,
}

/// Recognized `(role, kind)` pairs and the entry kind each produces.
#[derive(Debug, Clone)]
pub struct StreamRegistry {
    routes: HashMap<StreamKey, EntryKind>,
}

impl StreamRegistry {
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    pub fn register(&mut self, key: StreamKey, kind: EntryKind) -> &mut Self {
        self.routes.insert(key, kind);
        self
    }

    pub fn route(&self, key: &StreamKey) -> StreamRoute {
        match self.routes.get(key) {
            Some(kind) => StreamRoute::Buffered(*kind),
            None => StreamRoute::Opaque,
        }
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register(StreamKey::new("computer", "console"), EntryKind::Console)
            .register(StreamKey::new("assistant", "code"), EntryKind::Code);
        registry
    }
}

/// What applying one fragment produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembled {
    Opened,
    Appended,
    /// `end` closed a buffer; the text is ready for the transcript.
    Completed { kind: EntryKind, text: String },
    /// Unrecognized pair; append the raw fragment as a code block.
    Opaque(String),
    /// `end` arrived with nothing open.
    Nothing,
}

#[derive(Debug, Default)]
pub struct StreamReassembler {
    registry: StreamRegistry,
    /// A key present here has an open buffer.
    buffers: HashMap<StreamKey, String>,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: StreamRegistry) -> Self {
        Self {
            registry,
            buffers: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn apply(&mut self, fragment: &CodeFragment) -> Reassembled {
        let key = StreamKey::of(fragment);
        let kind = match self.registry.route(&key) {
            StreamRoute::Buffered(kind) => kind,
            StreamRoute::Opaque => return Reassembled::Opaque(fragment.raw.clone()),
        };

        match &fragment.shape {
            FragmentShape::Start => {
                if let Some(stale) = self.buffers.insert(key, String::new()) {
                    if !stale.is_empty() {
                        log::debug!(
                            "[reassembly] start discarded {} partial bytes for {}/{}",
                            stale.len(),
                            fragment.role,
                            fragment.kind
                        );
                    }
                }
                Reassembled::Opened
            }
            FragmentShape::Content(text) => {
                // Transport ordering is not guaranteed; content before start
                // opens the buffer implicitly.
                self.buffers.entry(key).or_default().push_str(text);
                Reassembled::Appended
            }
            FragmentShape::End => match self.buffers.remove(&key) {
                Some(text) => Reassembled::Completed { kind, text },
                None => {
                    log::debug!(
                        "[reassembly] end without open buffer for {}/{}",
                        fragment.role,
                        fragment.kind
                    );
                    Reassembled::Nothing
                }
            },
        }
    }

    pub fn buffer(&self, key: &StreamKey) -> Option<&str> {
        self.buffers.get(key).map(|s| s.as_str())
    }

    pub fn is_open(&self, key: &StreamKey) -> bool {
        self.buffers.contains_key(key)
    }

    pub fn open_keys(&self) -> Vec<StreamKey> {
        self.buffers.keys().cloned().collect()
    }

    pub fn discard(&mut self, key: &StreamKey) -> Option<String> {
        self.buffers.remove(key)
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(role: &str, kind: &str, shape: FragmentShape) -> CodeFragment {
        CodeFragment {
            role: role.into(),
            kind: kind.into(),
            raw: format!("{{\"role\":\"{}\",\"type\":\"{}\"}}", role, kind),
            shape,
        }
    }

    fn content(role: &str, kind: &str, text: &str) -> CodeFragment {
        frag(role, kind, FragmentShape::Content(text.into()))
    }

    #[test]
    fn start_content_end_concatenates_exactly() {
        let mut r = StreamReassembler::new();
        let key = StreamKey::new("computer", "console");
        assert_eq!(r.apply(&frag("computer", "console", FragmentShape::Start)), Reassembled::Opened);
        r.apply(&content("computer", "console", "a"));
        r.apply(&content("computer", "console", "b"));
        assert_eq!(
            r.apply(&frag("computer", "console", FragmentShape::End)),
            Reassembled::Completed {
                kind: EntryKind::Console,
                text: "ab".into()
            }
        );
        assert!(!r.is_open(&key));
        assert!(r.buffer(&key).is_none());
    }

    #[test]
    fn content_without_start_opens_implicitly() {
        let mut r = StreamReassembler::new();
        r.apply(&content("assistant", "code", "x = 1"));
        assert_eq!(r.buffer(&StreamKey::new("assistant", "code")), Some("x = 1"));
    }

    #[test]
    fn start_discards_partial_content() {
        let mut r = StreamReassembler::new();
        r.apply(&content("assistant", "code", "stale"));
        r.apply(&frag("assistant", "code", FragmentShape::Start));
        r.apply(&content("assistant", "code", "fresh"));
        assert_eq!(
            r.apply(&frag("assistant", "code", FragmentShape::End)),
            Reassembled::Completed {
                kind: EntryKind::Code,
                text: "fresh".into()
            }
        );
    }

    #[test]
    fn interleaved_keys_stay_independent() {
        let mut r = StreamReassembler::new();
        r.apply(&frag("assistant", "code", FragmentShape::Start));
        r.apply(&frag("computer", "console", FragmentShape::Start));
        r.apply(&content("assistant", "code", "print("));
        r.apply(&content("computer", "console", "out"));
        r.apply(&content("assistant", "code", "2)"));
        r.apply(&content("computer", "console", "put"));

        assert_eq!(
            r.apply(&frag("computer", "console", FragmentShape::End)),
            Reassembled::Completed {
                kind: EntryKind::Console,
                text: "output".into()
            }
        );
        assert_eq!(
            r.apply(&frag("assistant", "code", FragmentShape::End)),
            Reassembled::Completed {
                kind: EntryKind::Code,
                text: "print(2)".into()
            }
        );
        assert!(r.open_keys().is_empty());
    }

    #[test]
    fn unknown_pair_is_opaque_and_unbuffered() {
        let mut r = StreamReassembler::new();
        let f = frag("computer", "confirmation", FragmentShape::Start);
        assert_eq!(r.apply(&f), Reassembled::Opaque(f.raw.clone()));
        assert!(r.open_keys().is_empty());
    }

    #[test]
    fn end_with_nothing_open() {
        let mut r = StreamReassembler::new();
        assert_eq!(
            r.apply(&frag("assistant", "code", FragmentShape::End)),
            Reassembled::Nothing
        );
    }

    #[test]
    fn registry_extends_without_touching_apply() {
        let mut registry = StreamRegistry::default();
        registry.register(StreamKey::new("assistant", "message"), EntryKind::Assistant);
        let mut r = StreamReassembler::with_registry(registry);
        r.apply(&content("assistant", "message", "Done."));
        assert_eq!(
            r.apply(&frag("assistant", "message", FragmentShape::End)),
            Reassembled::Completed {
                kind: EntryKind::Assistant,
                text: "Done.".into()
            }
        );
    }
}
