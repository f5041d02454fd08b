use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::ir::ChunkOutcome;

/// One finished chunk, persisted after each chunk so an interrupted run
/// loses at most the chunk in flight.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_index: usize,
    /// Renumbered source text; resume only reuses a record when this still
    /// matches, so edits to the input or config invalidate stale records.
    pub chunk_text: String,
    /// The tagged outcome, translated text included, so a resumed run keeps
    /// its attempt counts and recovery methods.
    pub outcome: ChunkOutcome,
}

pub trait CheckpointStore {
    fn load(&self) -> anyhow::Result<Vec<ChunkRecord>>;
    fn save(&mut self, records: &[ChunkRecord]) -> anyhow::Result<()>;
}

/// Pretty-printed JSON file, rewritten whole on every save. Chunk counts
/// are small enough that atomicity beats incremental appends here.
pub struct JsonCheckpointFile {
    path: PathBuf,
}

impl JsonCheckpointFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl CheckpointStore for JsonCheckpointFile {
    fn load(&self) -> anyhow::Result<Vec<ChunkRecord>> {
        if !self.path.is_file() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("read checkpoint: {}", self.path.display()))?;
        let records: Vec<ChunkRecord> =
            serde_json::from_str(text.trim_start_matches('\u{feff}'))
                .context("parse checkpoint json")?;
        Ok(records)
    }

    fn save(&mut self, records: &[ChunkRecord]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create checkpoint dir: {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(records).context("encode checkpoint json")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("write checkpoint: {}", self.path.display()))?;
        Ok(())
    }
}

/// Test double; also handy for callers that want resume semantics without
/// touching the filesystem.
#[derive(Default)]
pub struct MemoryCheckpoint {
    pub records: Vec<ChunkRecord>,
    pub saves: usize,
}

impl CheckpointStore for MemoryCheckpoint {
    fn load(&self) -> anyhow::Result<Vec<ChunkRecord>> {
        Ok(self.records.clone())
    }

    fn save(&mut self, records: &[ChunkRecord]) -> anyhow::Result<()> {
        self.records = records.to_vec();
        self.saves += 1;
        Ok(())
    }
}
