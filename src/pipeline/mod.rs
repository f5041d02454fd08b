mod align;
mod checkpoint;
mod chunker;
mod policy;
mod renumber;
mod trace;
mod validate;

pub use align::align_and_insert_placeholders;
pub use checkpoint::{CheckpointStore, ChunkRecord, JsonCheckpointFile, MemoryCheckpoint};
pub use chunker::chunk_text;
pub use policy::{translate_chunk, ChunkTranslator, TranslationPolicy};
pub use renumber::{renumber_chunk, restore_global_indices};
pub use trace::{ChunkTrace, TraceWriter};
pub use validate::{validate_basic, validate_strict};
