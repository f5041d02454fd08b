use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::ir::TagMap;
use crate::placeholders::PlaceholderFormat;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("tag regex"));

// Mangled shapes LLMs produce for each token syntax: doubled or fullwidth
// brackets, inserted spaces, case drift, extra/missing repeat characters.
// Each matches its canonical form too; a hit only counts as a mutation when
// the matched text differs from the canonical token for that index.
static BRACKET_MUTATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\[+|【)\s*[iI][dD][-_ ]?\s*(\d+)\s*(?:\]+|】)").expect("bracket mutation regex")
});
static BRACE_MUTATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{{1,3}\s*(\d+)\s*\}{1,3}").expect("brace mutation regex"));
static UNDERSCORE_MUTATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_{1,4}\s*(\d+)\s*_{1,4}").expect("underscore mutation regex"));

fn mutation_regex(format: PlaceholderFormat) -> &'static Regex {
    match format {
        PlaceholderFormat::BracketId => &BRACKET_MUTATION_RE,
        PlaceholderFormat::DoubleBrace => &BRACE_MUTATION_RE,
        PlaceholderFormat::Underscore => &UNDERSCORE_MUTATION_RE,
    }
}

/// Replace every markup tag with a placeholder token, counters assigned in
/// order of first occurrence. Identical tags repeated in the source still
/// get distinct counters, keeping indices contiguous and tokens unique.
/// Returns the placeholder-laden text and the map needed to undo it; there
/// is no instance state, so concurrent documents cannot interfere.
pub fn preserve_tags(html: &str, format: PlaceholderFormat) -> (String, TagMap) {
    let mut map = TagMap::new(format);
    if html.is_empty() {
        return (String::new(), map);
    }
    let mut out = String::with_capacity(html.len());
    let mut pos = 0usize;
    for m in TAG_RE.find_iter(html) {
        out.push_str(&html[pos..m.start()]);
        let index = map.push(m.as_str().to_string());
        out.push_str(&map.token(index));
        pos = m.end();
    }
    out.push_str(&html[pos..]);
    (out, map)
}

/// Replace placeholders back with their original markup. Matching is
/// whole-token, resolved per match, so `[id1]` can never be taken for the
/// head of `[id10]`. Tokens outside the map are left verbatim.
pub fn restore_tags(text: &str, map: &TagMap) -> String {
    if map.is_empty() || text.is_empty() {
        return text.to_string();
    }
    map.format
        .rewrite(text, |index| map.get(index).map(str::to_string))
}

/// Outcome of checking a translated text against its expected placeholders.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaceholderReport {
    /// Expected indices with no verbatim and no recognizable mutated form.
    pub missing: Vec<usize>,
    /// Expected indices present only in a mutated form.
    pub mutated: Vec<usize>,
}

impl PlaceholderReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.mutated.is_empty()
    }
}

/// Report which expected placeholders are absent, distinguishing the ones
/// that survive in a recognizable mutated shape from the truly lost.
pub fn validate_placeholders(text: &str, map: &TagMap) -> PlaceholderReport {
    let mut report = PlaceholderReport::default();
    if map.is_empty() {
        return report;
    }
    let mut mutated_indices: Vec<usize> = Vec::new();
    let mut mutated_spans: Vec<(usize, usize)> = Vec::new();
    for caps in mutation_regex(map.format).captures_iter(text) {
        let Some(index) = captured_index(&caps) else {
            continue;
        };
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if whole.as_str() != map.token(index) {
            mutated_indices.push(index);
            mutated_spans.push((whole.start(), whole.end()));
        }
    }
    // Verbatim presence means a whole-token match outside every mutated
    // span: the canonical token embedded in a doubled-bracket form belongs
    // to the mutation, not to a clean occurrence.
    let verbatim: Vec<usize> = map
        .format
        .find_all(text)
        .into_iter()
        .filter(|hit| {
            !mutated_spans
                .iter()
                .any(|&(s, e)| hit.start >= s && hit.end <= e)
        })
        .map(|hit| hit.index)
        .collect();
    for index in map.indices() {
        if verbatim.contains(&index) {
            continue;
        }
        if mutated_indices.contains(&index) {
            report.mutated.push(index);
        } else {
            report.missing.push(index);
        }
    }
    report
}

/// Rewrite recognized mutated placeholder shapes back to canonical form.
/// Only indices the map knows about are touched; anything else is left as
/// the model produced it.
pub fn fix_mutated_placeholders(text: &str, map: &TagMap) -> String {
    if map.is_empty() || text.is_empty() {
        return text.to_string();
    }
    mutation_regex(map.format)
        .replace_all(text, |caps: &Captures<'_>| {
            let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            match captured_index(caps) {
                Some(index) if map.contains_index(index) => map.token(index),
                _ => whole.to_string(),
            }
        })
        .into_owned()
}

fn captured_index(caps: &Captures<'_>) -> Option<usize> {
    (1..caps.len())
        .find_map(|i| caps.get(i))
        .and_then(|m| m.as_str().parse().ok())
}
