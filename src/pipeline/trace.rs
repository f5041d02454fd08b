use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::ir::{ChunkOutcome, RecoveryMethod};

/// Debug artifact sink. Disabled instances swallow every write so call
/// sites stay unconditional.
pub struct TraceWriter {
    dir: PathBuf,
    enabled: bool,
}

impl TraceWriter {
    pub fn new(dir: PathBuf, enabled: bool) -> anyhow::Result<Self> {
        if enabled {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create trace dir: {}", dir.display()))?;
        }
        Ok(Self { dir, enabled })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_named_text(&self, name: &str, text: &str) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let path = self.dir.join(name);
        std::fs::write(&path, text).with_context(|| format!("write trace: {}", path.display()))?;
        Ok(())
    }

    /// Artifact handle for one chunk's trip through the phase ladder.
    pub fn chunk(&self, index: usize) -> ChunkTrace<'_> {
        ChunkTrace {
            writer: self,
            index,
        }
    }
}

/// Writes `chunk_000007.<step>.txt` artifacts, one per ladder step.
pub struct ChunkTrace<'a> {
    writer: &'a TraceWriter,
    index: usize,
}

impl ChunkTrace<'_> {
    fn step(&self, step: &str, text: &str) -> anyhow::Result<()> {
        self.writer
            .write_named_text(&format!("chunk_{:06}.{step}.txt", self.index), text)
    }

    /// Renumbered source text as submitted to phase 1.
    pub fn input(&self, text: &str) -> anyhow::Result<()> {
        self.step("input", text)
    }

    /// Raw model output of one phase-1 attempt, before mutation repair.
    pub fn attempt(&self, attempt: usize, text: &str) -> anyhow::Result<()> {
        self.step(&format!("attempt_{attempt}"), text)
    }

    /// Placeholder-free text submitted in phase 2.
    pub fn stripped(&self, text: &str) -> anyhow::Result<()> {
        self.step("stripped", text)
    }

    /// Alignment result, tagged with the tier that produced it.
    pub fn aligned(&self, method: RecoveryMethod, text: &str) -> anyhow::Result<()> {
        self.step(&format!("aligned_{}", method.label()), text)
    }

    /// Final per-chunk outcome.
    pub fn outcome(&self, outcome: &ChunkOutcome) -> anyhow::Result<()> {
        self.step(&format!("outcome_{}", outcome.label()), outcome.text())
    }
}
