use anyhow::{anyhow, Result};

use crate::ir::{RecoveryMethod, TagMap};
use crate::textutil::is_word_boundary;

/// Reinsert placeholders an LLM dropped from its translation.
///
/// Exact cross-language alignment is impossible, so position is re-derived
/// proportionally: each placeholder's relative offset over the
/// placeholder-stripped `original` is mapped onto `translated` and snapped to
/// a word boundary. Three tiers escalate from that positional scheme through
/// plain proportional spacing down to an even spread that cannot fail.
///
/// Guarantee: the output contains each of `map`'s placeholders exactly once,
/// in the relative order they hold in `original`, for any inputs (empty
/// translated text and zero placeholders included). Never errors, never
/// panics.
pub fn align_and_insert_placeholders(
    original: &str,
    translated: &str,
    map: &TagMap,
) -> (String, RecoveryMethod) {
    let tokens = ordered_tokens(original, map);
    if tokens.is_empty() {
        return (translated.to_string(), RecoveryMethod::Positional);
    }

    if let Ok(out) = positional(original, translated, map, &tokens) {
        return (out, RecoveryMethod::Positional);
    }
    if let Ok(out) = proportional(translated, map, &tokens) {
        return (out, RecoveryMethod::Proportional);
    }
    (
        even_spread(translated, map, &tokens),
        RecoveryMethod::EvenSpread,
    )
}

/// Placeholder indices in the order they appear in `original`. Expected
/// indices absent from the original (a malformed chunk) are appended at the
/// end so the exactly-once guarantee still covers them.
fn ordered_tokens(original: &str, map: &TagMap) -> Vec<usize> {
    let mut order: Vec<usize> = Vec::with_capacity(map.len());
    for hit in map.format.find_all(original) {
        if map.contains_index(hit.index) && !order.contains(&hit.index) {
            order.push(hit.index);
        }
    }
    for index in map.indices() {
        if !order.contains(&index) {
            order.push(index);
        }
    }
    order
}

/// Tier 1: relative offsets over the stripped original, snapped outward to
/// the nearest word boundary in the translated text.
fn positional(original: &str, translated: &str, map: &TagMap, tokens: &[usize]) -> Result<String> {
    let rels = relative_offsets(original, map, tokens);
    let chars: Vec<char> = translated.chars().collect();
    let total = chars.len();

    let mut positions: Vec<usize> = rels
        .iter()
        .map(|rel| {
            let raw = (rel * total as f64).round() as usize;
            snap_to_boundary(&chars, raw.min(total))
        })
        .collect();
    enforce_monotonic(&mut positions);

    let out = insert_at_positions(translated, tokens, &positions, map);
    verify_order(&out, map, tokens)?;
    Ok(out)
}

/// Tier 2: even fractions of the translated length, char-boundary only.
fn proportional(translated: &str, map: &TagMap, tokens: &[usize]) -> Result<String> {
    let total = translated.chars().count();
    let n = tokens.len();
    let mut positions: Vec<usize> = (0..n)
        .map(|i| (total as f64 * (i + 1) as f64 / (n + 1) as f64).round() as usize)
        .map(|p| p.min(total))
        .collect();
    enforce_monotonic(&mut positions);
    let out = insert_at_positions(translated, tokens, &positions, map);
    verify_order(&out, map, tokens)?;
    Ok(out)
}

/// Tier 3: first token prepended, last appended, the rest spread over the
/// translated text by word count. Monotonic positions and rank-stable
/// insertion make the order guarantee hold by construction.
fn even_spread(translated: &str, map: &TagMap, tokens: &[usize]) -> String {
    let total = translated.chars().count();
    let n = tokens.len();
    let word_ends = word_end_positions(translated);
    let w = word_ends.len();

    let mut positions: Vec<usize> = Vec::with_capacity(n);
    for i in 0..n {
        let pos = if i == 0 {
            0
        } else if i == n - 1 {
            total
        } else if w > 1 {
            let idx = (i * w) / (n - 1);
            word_ends[idx.clamp(1, w) - 1]
        } else {
            (total * i) / (n - 1)
        };
        positions.push(pos);
    }
    if n == 1 {
        positions[0] = 0;
    }
    enforce_monotonic(&mut positions);
    insert_at_positions(translated, tokens, &positions, map)
}

/// Char positions just past each whitespace-delimited word.
fn word_end_positions(text: &str) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut in_word = false;
    let mut count = 0usize;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if in_word {
                ends.push(count);
            }
            in_word = false;
        } else {
            in_word = true;
        }
        count += 1;
    }
    if in_word {
        ends.push(count);
    }
    ends
}

/// Char offset of each requested placeholder inside the placeholder-stripped
/// original, normalized to 0.0..=1.0.
fn relative_offsets(original: &str, map: &TagMap, tokens: &[usize]) -> Vec<f64> {
    let hits = map.format.find_all(original);
    let mut offsets: Vec<(usize, usize)> = Vec::with_capacity(hits.len());
    let mut cursor = 0usize;
    let mut chars_before = 0usize;
    for hit in &hits {
        chars_before += original[cursor..hit.start].chars().count();
        offsets.push((hit.index, chars_before));
        cursor = hit.end;
    }
    let stripped_len = chars_before + original[cursor..].chars().count();

    tokens
        .iter()
        .map(|index| {
            let offset = offsets
                .iter()
                .find(|(i, _)| i == index)
                .map(|(_, o)| *o)
                // Indices appended by ordered_tokens sit at the far end.
                .unwrap_or(stripped_len);
            if stripped_len == 0 {
                0.0
            } else {
                offset as f64 / stripped_len as f64
            }
        })
        .collect()
}

/// Search symmetrically outward from `raw` for an insertion point adjacent
/// to a word boundary (space, punctuation, CJK punctuation). Text ends
/// always qualify. A text with no boundary at all keeps the raw position.
fn snap_to_boundary(chars: &[char], raw: usize) -> usize {
    let total = chars.len();
    let ok = |p: usize| -> bool {
        p == 0
            || p == total
            || is_word_boundary(chars[p - 1])
            || chars.get(p).map(|&c| is_word_boundary(c)).unwrap_or(true)
    };
    if ok(raw) {
        return raw;
    }
    for k in 1..=total {
        if raw >= k && ok(raw - k) {
            return raw - k;
        }
        if raw + k <= total && ok(raw + k) {
            return raw + k;
        }
    }
    raw.min(total)
}

/// Boundary snapping can reorder nearby targets; clamping each position to
/// its predecessor preserves the source-relative order invariant.
fn enforce_monotonic(positions: &mut [usize]) {
    for i in 1..positions.len() {
        if positions[i] < positions[i - 1] {
            positions[i] = positions[i - 1];
        }
    }
}

/// Insert tokens at char positions in descending order so earlier insertions
/// never shift later indices. Tokens grouped on the same snapped position
/// keep their source order.
fn insert_at_positions(
    translated: &str,
    tokens: &[usize],
    positions: &[usize],
    map: &TagMap,
) -> String {
    let byte_at: Vec<usize> = {
        let mut v: Vec<usize> = translated.char_indices().map(|(b, _)| b).collect();
        v.push(translated.len());
        v
    };

    let mut order: Vec<(usize, usize)> = positions.iter().copied().zip(0..tokens.len()).collect();
    order.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));

    let mut out = translated.to_string();
    for (pos, rank) in order {
        let byte = byte_at.get(pos).copied().unwrap_or(translated.len());
        out.insert_str(byte, &map.token(tokens[rank]));
    }
    out
}

/// The output must contain exactly the requested tokens, once each, in the
/// requested order.
fn verify_order(out: &str, map: &TagMap, tokens: &[usize]) -> Result<()> {
    let found: Vec<usize> = map
        .format
        .find_all(out)
        .into_iter()
        .map(|h| h.index)
        .collect();
    if found == tokens {
        Ok(())
    } else {
        Err(anyhow!(
            "alignment_order_violation expected={tokens:?} got={found:?}"
        ))
    }
}
