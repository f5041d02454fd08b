use anyhow::bail;

use crate::config::PipelineConfig;
use crate::ir::{Chunk, ChunkOutcome, RunStats};
use crate::pipeline::align::align_and_insert_placeholders;
use crate::pipeline::checkpoint::{CheckpointStore, ChunkRecord};
use crate::pipeline::chunker::chunk_text;
use crate::pipeline::renumber::restore_global_indices;
use crate::pipeline::trace::{ChunkTrace, TraceWriter};
use crate::pipeline::validate::validate_strict;
use crate::placeholders::ensure_no_preexisting_placeholders;
use crate::preserve::{fix_mutated_placeholders, preserve_tags, restore_tags};
use crate::progress::ConsoleProgress;
use crate::textutil::TokenCounter;

/// A translation backend invoked once per chunk submission. Implementations
/// may be retried with identical input, so they must be safe to call again
/// after an error.
pub trait ChunkTranslator {
    fn translate(
        &mut self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> anyhow::Result<String>;
}

impl<F> ChunkTranslator for F
where
    F: FnMut(&str) -> anyhow::Result<String>,
{
    fn translate(&mut self, text: &str, _: &str, _: &str) -> anyhow::Result<String> {
        self(text)
    }
}

/// Three-phase ladder for one chunk. Phase 1 submits the placeholder-laden
/// text up to `max_retries` times, repairing mutated tokens before the
/// strict gate. Phase 2 submits the text with placeholders stripped and
/// reinserts them by alignment. Phase 3 keeps the source verbatim. Every
/// branch returns a markup-complete text; translator errors are tallied,
/// never propagated.
pub fn translate_chunk(
    translator: &mut dyn ChunkTranslator,
    chunk: &Chunk,
    source_lang: &str,
    target_lang: &str,
    max_retries: usize,
    stats: &mut RunStats,
    trace: &ChunkTrace<'_>,
) -> ChunkOutcome {
    let map = &chunk.local_tag_map;

    // Trace writes inside the ladder are best effort and never gate it.
    for attempt in 1..=max_retries.max(1) {
        match translator.translate(&chunk.text, source_lang, target_lang) {
            Ok(raw) => {
                let _ = trace.attempt(attempt, &raw);
                let repaired = fix_mutated_placeholders(&raw, map);
                if validate_strict(&repaired, map).is_ok() {
                    return ChunkOutcome::Translated {
                        text: repaired,
                        attempts: attempt,
                    };
                }
            }
            Err(_) => stats.translator_errors += 1,
        }
    }

    let format = map.format;
    let stripped = format.strip(&chunk.text);
    let _ = trace.stripped(&stripped);
    match translator.translate(&stripped, source_lang, target_lang) {
        Ok(raw) => {
            // The model saw no placeholders, so any token shape in the
            // output is hallucinated and must go before alignment.
            let clean = format.strip(&fix_mutated_placeholders(&raw, map));
            let (aligned, method) = align_and_insert_placeholders(&chunk.text, &clean, map);
            let _ = trace.aligned(method, &aligned);
            if validate_strict(&aligned, map).is_ok() {
                return ChunkOutcome::Recovered {
                    text: aligned,
                    method,
                };
            }
        }
        Err(_) => stats.translator_errors += 1,
    }

    ChunkOutcome::Untranslated {
        text: chunk.text.clone(),
    }
}

/// Document orchestrator: preserve, chunk, run the per-chunk ladder, then
/// reassemble and restore markup.
pub struct TranslationPolicy {
    cfg: PipelineConfig,
    progress: ConsoleProgress,
    trace: TraceWriter,
}

impl TranslationPolicy {
    pub fn new(cfg: PipelineConfig, progress: ConsoleProgress) -> anyhow::Result<Self> {
        let trace = TraceWriter::new(cfg.trace_dir.clone(), cfg.trace_outputs)?;
        Ok(Self {
            cfg,
            progress,
            trace,
        })
    }

    /// Translate one markup document. `cancel` is polled between chunks; a
    /// cancelled run persists finished chunks to `checkpoint` (when given)
    /// and errors, and the next run with the same input resumes from those
    /// records instead of re-submitting them.
    pub fn translate_document(
        &self,
        html: &str,
        translator: &mut dyn ChunkTranslator,
        counter: &dyn TokenCounter,
        mut checkpoint: Option<&mut dyn CheckpointStore>,
        cancel: &dyn Fn() -> bool,
    ) -> anyhow::Result<(String, RunStats)> {
        let format = self.cfg.format;
        ensure_no_preexisting_placeholders(html, format)?;

        let (flat, tag_map) = preserve_tags(html, format);
        let chunks = chunk_text(&flat, &tag_map, self.cfg.max_tokens, counter);
        self.progress.info(format!(
            "preserved {} tags, {} chunks",
            tag_map.len(),
            chunks.len()
        ));
        self.trace.write_named_text("document.flat.txt", &flat)?;

        let mut stats = RunStats::default();
        if chunks.is_empty() {
            // Nothing translatable; hand the input back untouched.
            return Ok((html.to_string(), stats));
        }

        let prior: Vec<ChunkRecord> = match checkpoint.as_mut() {
            Some(store) => store.load()?,
            None => Vec::new(),
        };

        let mut records: Vec<ChunkRecord> = Vec::with_capacity(chunks.len());
        let mut rewritten: Vec<String> = Vec::with_capacity(chunks.len());

        for (i, chunk) in chunks.iter().enumerate() {
            if cancel() {
                if let Some(store) = checkpoint.as_mut() {
                    store.save(&records)?;
                }
                bail!("cancelled after {} of {} chunks", i, chunks.len());
            }

            if let Some(rec) = prior
                .get(i)
                .filter(|r| r.chunk_index == i && r.chunk_text == chunk.text)
            {
                stats.record(&rec.outcome);
                rewritten.push(restore_global_indices(rec.outcome.text(), chunk));
                records.push(rec.clone());
                self.progress.progress("chunk resumed", i + 1, chunks.len());
                continue;
            }

            let trace = self.trace.chunk(i);
            trace.input(&chunk.text)?;
            let outcome = translate_chunk(
                translator,
                chunk,
                &self.cfg.source_lang,
                &self.cfg.target_lang,
                self.cfg.max_retries,
                &mut stats,
                &trace,
            );
            stats.record(&outcome);
            trace.outcome(&outcome)?;
            self.progress.chunk_done(i, chunks.len(), &outcome);

            rewritten.push(restore_global_indices(outcome.text(), chunk));
            records.push(ChunkRecord {
                chunk_index: i,
                chunk_text: chunk.text.clone(),
                outcome,
            });
            if let Some(store) = checkpoint.as_mut() {
                store.save(&records)?;
            }
        }

        let body = rewritten.concat();
        let restored = restore_tags(&body, &tag_map);
        self.progress.summary(&stats);
        Ok((restored, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::TagMap;
    use crate::pipeline::checkpoint::MemoryCheckpoint;
    use crate::pipeline::renumber::renumber_chunk;
    use crate::placeholders::PlaceholderFormat;
    use crate::textutil::HeuristicTokenCounter;

    /// Returns scripted responses in order; `None` entries are errors.
    struct Scripted {
        calls: usize,
        script: Vec<Option<&'static str>>,
    }

    impl Scripted {
        fn new(script: Vec<Option<&'static str>>) -> Self {
            Self { calls: 0, script }
        }
    }

    impl ChunkTranslator for Scripted {
        fn translate(&mut self, _: &str, _: &str, _: &str) -> anyhow::Result<String> {
            let i = self.calls;
            self.calls += 1;
            match self.script.get(i) {
                Some(Some(s)) => Ok((*s).to_string()),
                _ => Err(anyhow::anyhow!("backend_unavailable")),
            }
        }
    }

    fn one_chunk(text: &str, tags: usize) -> Chunk {
        let mut map = TagMap::new(PlaceholderFormat::BracketId);
        for i in 0..tags {
            map.push(format!("<t{i}>"));
        }
        renumber_chunk(text, &map, 0)
    }

    fn policy() -> TranslationPolicy {
        TranslationPolicy::new(PipelineConfig::default(), ConsoleProgress::new(false))
            .expect("policy")
    }

    fn policy_with_budget(max_tokens: usize) -> TranslationPolicy {
        let cfg = PipelineConfig {
            max_tokens,
            ..PipelineConfig::default()
        };
        TranslationPolicy::new(cfg, ConsoleProgress::new(false)).expect("policy")
    }

    fn quiet_trace() -> TraceWriter {
        TraceWriter::new(std::path::PathBuf::from("_trace"), false).expect("trace")
    }

    #[test]
    fn phase1_accepts_first_clean_response() {
        let chunk = one_chunk("[id0]Hello[id1]", 2);
        let mut t = Scripted::new(vec![Some("[id0]Bonjour[id1]")]);
        let mut stats = RunStats::default();
        let tw = quiet_trace();
        let outcome = translate_chunk(&mut t, &chunk, "en", "fr", 3, &mut stats, &tw.chunk(0));
        assert_eq!(
            outcome,
            ChunkOutcome::Translated {
                text: "[id0]Bonjour[id1]".to_string(),
                attempts: 1
            }
        );
        assert_eq!(stats.translator_errors, 0);
        assert_eq!(t.calls, 1);
    }

    #[test]
    fn phase1_repairs_mutated_tokens_before_gating() {
        let chunk = one_chunk("[id0]Hello[id1]", 2);
        let mut t = Scripted::new(vec![Some("[[id0]]Bonjour[ID 1]")]);
        let mut stats = RunStats::default();
        let tw = quiet_trace();
        let outcome = translate_chunk(&mut t, &chunk, "en", "fr", 3, &mut stats, &tw.chunk(0));
        assert_eq!(outcome.text(), "[id0]Bonjour[id1]");
        assert_eq!(outcome.label(), "first_try");
    }

    #[test]
    fn phase1_retries_after_dropped_placeholder() {
        let chunk = one_chunk("[id0]Hello[id1]", 2);
        let mut t = Scripted::new(vec![Some("Bonjour[id1]"), Some("[id0]Bonjour[id1]")]);
        let mut stats = RunStats::default();
        let tw = quiet_trace();
        let outcome = translate_chunk(&mut t, &chunk, "en", "fr", 3, &mut stats, &tw.chunk(0));
        assert_eq!(
            outcome,
            ChunkOutcome::Translated {
                text: "[id0]Bonjour[id1]".to_string(),
                attempts: 2
            }
        );
    }

    #[test]
    fn phase2_realigns_when_retries_are_exhausted() {
        let chunk = one_chunk("[id0]Hello[id1] world[id2]", 3);
        // Two phase-1 responses lose tokens, then the stripped submission.
        let mut t = Scripted::new(vec![
            Some("Bonjour monde"),
            Some("Bonjour monde"),
            Some("Bonjour monde"),
        ]);
        let mut stats = RunStats::default();
        let tw = quiet_trace();
        let outcome = translate_chunk(&mut t, &chunk, "en", "fr", 2, &mut stats, &tw.chunk(0));
        let ChunkOutcome::Recovered { text, .. } = &outcome else {
            panic!("expected recovery, got {outcome:?}");
        };
        assert!(validate_strict(text, &chunk.local_tag_map).is_ok());
        assert!(text.contains("Bonjour"));
        assert_eq!(t.calls, 3);
    }

    #[test]
    fn phase2_strips_hallucinated_tokens_from_output() {
        let chunk = one_chunk("[id0]Hello[id1]", 2);
        let mut t = Scripted::new(vec![Some("junk"), Some("[id0][id0]Bonjour[id7]")]);
        let mut stats = RunStats::default();
        let tw = quiet_trace();
        let outcome = translate_chunk(&mut t, &chunk, "en", "fr", 1, &mut stats, &tw.chunk(0));
        let ChunkOutcome::Recovered { text, .. } = &outcome else {
            panic!("expected recovery, got {outcome:?}");
        };
        assert!(validate_strict(text, &chunk.local_tag_map).is_ok());
    }

    #[test]
    fn phase3_keeps_source_when_backend_is_down() {
        let chunk = one_chunk("[id0]Hello[id1]", 2);
        let mut t = Scripted::new(vec![]);
        let mut stats = RunStats::default();
        let tw = quiet_trace();
        let outcome = translate_chunk(&mut t, &chunk, "en", "fr", 3, &mut stats, &tw.chunk(0));
        assert_eq!(
            outcome,
            ChunkOutcome::Untranslated {
                text: "[id0]Hello[id1]".to_string()
            }
        );
        // Three phase-1 attempts plus the stripped phase-2 submission.
        assert_eq!(stats.translator_errors, 4);
    }

    #[test]
    fn document_roundtrips_with_identity_translator() {
        let html = "<p>Hello <b>world</b></p>\n<p>Second paragraph here.</p>";
        let policy = policy();
        let mut identity = |text: &str| -> anyhow::Result<String> { Ok(text.to_string()) };
        let (out, stats) = policy
            .translate_document(html, &mut identity, &HeuristicTokenCounter, None, &|| false)
            .expect("translate");
        assert_eq!(out, html);
        assert_eq!(stats.first_try, stats.chunks);
        assert_eq!(stats.untranslated, 0);
    }

    #[test]
    fn document_translates_text_and_restores_markup() {
        let html = "<p>Hello <b>world</b></p>";
        let policy = policy();
        let mut t = |text: &str| -> anyhow::Result<String> {
            Ok(text.replace("Hello", "Bonjour").replace("world", "monde"))
        };
        let (out, _) = policy
            .translate_document(html, &mut t, &HeuristicTokenCounter, None, &|| false)
            .expect("translate");
        assert_eq!(out, "<p>Bonjour <b>monde</b></p>");
    }

    #[test]
    fn whitespace_only_document_passes_through() {
        let policy = policy();
        let mut t = |_: &str| -> anyhow::Result<String> { panic!("must not be called") };
        let (out, stats) = policy
            .translate_document("  \n\t ", &mut t, &HeuristicTokenCounter, None, &|| false)
            .expect("translate");
        assert_eq!(out, "  \n\t ");
        assert_eq!(stats.chunks, 0);
    }

    #[test]
    fn preexisting_placeholder_in_input_is_rejected() {
        let policy = policy();
        let mut identity = |text: &str| -> anyhow::Result<String> { Ok(text.to_string()) };
        let err = policy
            .translate_document(
                "<p>already has [id3] inside</p>",
                &mut identity,
                &HeuristicTokenCounter,
                None,
                &|| false,
            )
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("preexisting_placeholder_in_input"));
    }

    #[test]
    fn cancellation_persists_finished_chunks() {
        // Word-count budget of 4 forces the two paragraphs into two chunks.
        let html = "<p>one two three</p>\n<p>four five six</p>";
        let counter = |s: &str| s.split_whitespace().count();
        let policy = policy_with_budget(4);
        let mut identity = |text: &str| -> anyhow::Result<String> { Ok(text.to_string()) };
        let mut store = MemoryCheckpoint::default();

        let polled = std::cell::Cell::new(0usize);
        let cancel = || {
            let n = polled.get();
            polled.set(n + 1);
            n >= 1
        };
        let err = policy
            .translate_document(html, &mut identity, &counter, Some(&mut store), &cancel)
            .unwrap_err();
        assert!(err.to_string().starts_with("cancelled"));
        assert_eq!(store.records.len(), 1);
        assert_eq!(store.records[0].chunk_index, 0);
    }

    #[test]
    fn resume_skips_checkpointed_chunks() {
        let html = "<p>one two three</p>\n<p>four five six</p>";
        let counter = |s: &str| s.split_whitespace().count();
        let policy = policy_with_budget(4);
        let mut store = MemoryCheckpoint::default();

        let mut identity = |text: &str| -> anyhow::Result<String> { Ok(text.to_string()) };
        let (first, _) = policy
            .translate_document(html, &mut identity, &counter, Some(&mut store), &|| false)
            .expect("first run");
        assert!(store.records.len() >= 2);

        // Backend is gone; the second run must come entirely from records.
        let mut down = |_: &str| -> anyhow::Result<String> { Err(anyhow::anyhow!("down")) };
        let (second, stats) = policy
            .translate_document(html, &mut down, &counter, Some(&mut store), &|| false)
            .expect("resumed run");
        assert_eq!(second, first);
        assert_eq!(stats.translator_errors, 0);
        assert_eq!(stats.untranslated, 0);
    }

    #[test]
    fn resume_preserves_recovery_outcome() {
        let html = "<p>Hello world</p>";
        let policy = policy();
        let mut store = MemoryCheckpoint::default();

        // A backend that always drops the placeholders forces phase 2.
        let mut lossy = |_: &str| -> anyhow::Result<String> { Ok("Bonjour monde".to_string()) };
        let (first, stats) = policy
            .translate_document(html, &mut lossy, &HeuristicTokenCounter, Some(&mut store), &|| {
                false
            })
            .expect("first run");
        assert_eq!(stats.recovered, 1);

        // The resumed run must replay the recovered outcome, not rebucket it.
        let mut down = |_: &str| -> anyhow::Result<String> { Err(anyhow::anyhow!("down")) };
        let (second, resumed) = policy
            .translate_document(html, &mut down, &HeuristicTokenCounter, Some(&mut store), &|| {
                false
            })
            .expect("resumed run");
        assert_eq!(second, first);
        assert_eq!(resumed.recovered, 1);
        assert_eq!(resumed.untranslated, 0);
        assert_eq!(resumed.translator_errors, 0);
    }

    #[test]
    fn stale_checkpoint_records_are_not_reused() {
        let html = "<p>Hello</p>";
        let policy = policy();
        let mut store = MemoryCheckpoint::default();
        store.records.push(ChunkRecord {
            chunk_index: 0,
            chunk_text: "[id0]Different source[id1]".to_string(),
            outcome: ChunkOutcome::Translated {
                text: "[id0]stale[id1]".to_string(),
                attempts: 1,
            },
        });
        let mut t =
            |text: &str| -> anyhow::Result<String> { Ok(text.replace("Hello", "Bonjour")) };
        let (out, _) = policy
            .translate_document(html, &mut t, &HeuristicTokenCounter, Some(&mut store), &|| {
                false
            })
            .expect("translate");
        assert_eq!(out, "<p>Bonjour</p>");
    }
}
