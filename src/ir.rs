use serde::{Deserialize, Serialize};

use crate::placeholders::PlaceholderFormat;

/// Ordered placeholder -> original markup mapping. Entry `i` backs the
/// placeholder with index `offset + i`; indices are contiguous by
/// construction and a placeholder is unique within the text it annotates.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMap {
    pub format: PlaceholderFormat,
    pub offset: usize,
    pub tags: Vec<String>,
}

impl TagMap {
    pub fn new(format: PlaceholderFormat) -> Self {
        Self {
            format,
            offset: 0,
            tags: Vec::new(),
        }
    }

    pub fn with_offset(format: PlaceholderFormat, offset: usize) -> Self {
        Self {
            format,
            offset,
            tags: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Append a tag, returning the placeholder index assigned to it.
    pub fn push(&mut self, tag: String) -> usize {
        let index = self.offset + self.tags.len();
        self.tags.push(tag);
        index
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(self.offset)
            .and_then(|i| self.tags.get(i))
            .map(String::as_str)
    }

    pub fn contains_index(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Placeholder indices covered by this map, in order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        (self.offset..).take(self.tags.len())
    }

    /// Canonical token for entry `index` (which must include the offset).
    pub fn token(&self, index: usize) -> String {
        self.format.token(index)
    }
}

/// A token-budget-bounded slice of placeholder-laden text. Local placeholder
/// indices in `text` run 0..local_tag_map.len(); `global_indices[i]` is the
/// document-wide index local placeholder `i` stands for. Several locals may
/// map to the same global when the source text repeats a placeholder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub local_tag_map: TagMap,
    pub global_offset: usize,
    pub global_indices: Vec<usize>,
}

impl Chunk {
    pub fn placeholder_count(&self) -> usize {
        self.global_indices.len()
    }
}

/// Which recovery tier produced a phase-2 result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMethod {
    /// Relative-position alignment with word-boundary snapping.
    Positional,
    /// Even proportional spacing over the translated length.
    Proportional,
    /// First prepended, last appended, rest spread by word count.
    EvenSpread,
}

impl RecoveryMethod {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Positional => "positional",
            Self::Proportional => "proportional",
            Self::EvenSpread => "even_spread",
        }
    }
}

/// Per-chunk outcome of the three-phase policy. Markup is complete in every
/// variant; only translation quality degrades down the ladder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkOutcome {
    /// Phase 1: the model preserved every placeholder within `attempts` tries.
    Translated { text: String, attempts: usize },
    /// Phase 2: placeholders were reinserted by the alignment fallback.
    Recovered { text: String, method: RecoveryMethod },
    /// Phase 3: source text kept verbatim.
    Untranslated { text: String },
}

impl ChunkOutcome {
    pub fn text(&self) -> &str {
        match self {
            Self::Translated { text, .. }
            | Self::Recovered { text, .. }
            | Self::Untranslated { text } => text,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Translated { attempts: 1, .. } => "first_try",
            Self::Translated { .. } => "retried",
            Self::Recovered { .. } => "recovered",
            Self::Untranslated { .. } => "untranslated",
        }
    }
}

/// Aggregate tallies for one document run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub chunks: usize,
    pub first_try: usize,
    pub retried: usize,
    pub recovered: usize,
    pub untranslated: usize,
    pub translator_errors: usize,
}

impl RunStats {
    pub fn record(&mut self, outcome: &ChunkOutcome) {
        self.chunks += 1;
        match outcome {
            ChunkOutcome::Translated { attempts: 1, .. } => self.first_try += 1,
            ChunkOutcome::Translated { .. } => self.retried += 1,
            ChunkOutcome::Recovered { .. } => self.recovered += 1,
            ChunkOutcome::Untranslated { .. } => self.untranslated += 1,
        }
    }

    #[must_use]
    pub fn render_summary(&self) -> String {
        format!(
            "chunks={} first_try={} retried={} recovered={} untranslated={} translator_errors={}",
            self.chunks,
            self.first_try,
            self.retried,
            self.recovered,
            self.untranslated,
            self.translator_errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placeholders::PlaceholderFormat;

    #[test]
    fn tag_map_offset_lookup() {
        let mut map = TagMap::with_offset(PlaceholderFormat::BracketId, 5);
        assert_eq!(map.push("<p>".to_string()), 5);
        assert_eq!(map.push("<b>".to_string()), 6);
        assert_eq!(map.get(5), Some("<p>"));
        assert_eq!(map.get(6), Some("<b>"));
        assert_eq!(map.get(4), None);
        assert_eq!(map.get(7), None);
        assert_eq!(map.indices().collect::<Vec<_>>(), vec![5, 6]);
    }

    #[test]
    fn stats_record_distinguishes_outcomes() {
        let mut stats = RunStats::default();
        stats.record(&ChunkOutcome::Translated {
            text: "a".into(),
            attempts: 1,
        });
        stats.record(&ChunkOutcome::Translated {
            text: "b".into(),
            attempts: 3,
        });
        stats.record(&ChunkOutcome::Recovered {
            text: "c".into(),
            method: RecoveryMethod::Positional,
        });
        stats.record(&ChunkOutcome::Untranslated { text: "d".into() });
        assert_eq!(stats.chunks, 4);
        assert_eq!(stats.first_try, 1);
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.recovered, 1);
        assert_eq!(stats.untranslated, 1);
    }
}
