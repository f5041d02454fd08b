use crate::ir::{Chunk, TagMap};
use crate::pipeline::renumber::renumber_chunk;
use crate::placeholders::PlaceholderFormat;
use crate::textutil::{is_sentence_end, is_strong_punct, TokenCounter};

/// How far the forced-split whitespace snap looks around the budget cut.
/// When the window holds no whitespace the search extends left to the piece
/// start; only a prefix that is one unbroken token gets cut mid-word.
const SNAP_WINDOW_CHARS: usize = 50;

/// Block boundary classes, most preferred split first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum BlockPriority {
    Heading,
    Section,
    Paragraph,
    OtherBlock,
}

const PRIORITY_LEVELS: [BlockPriority; 4] = [
    BlockPriority::Heading,
    BlockPriority::Section,
    BlockPriority::Paragraph,
    BlockPriority::OtherBlock,
];

fn block_priority(name: &str) -> Option<BlockPriority> {
    match name {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => Some(BlockPriority::Heading),
        "section" | "article" | "main" | "header" | "footer" | "nav" | "aside" | "table"
        | "figure" => Some(BlockPriority::Section),
        "p" | "div" | "blockquote" | "pre" | "ul" | "ol" | "dl" => Some(BlockPriority::Paragraph),
        "li" | "tr" | "td" | "th" | "dt" | "dd" | "hr" | "br" | "caption" | "thead" | "tbody"
        | "tfoot" | "figcaption" => Some(BlockPriority::OtherBlock),
        _ => None,
    }
}

/// Parse a stored markup tag into (is_closing, block priority). Inline tags
/// and anything unparseable return None and never become split points.
fn classify_tag(tag: &str) -> Option<(bool, BlockPriority)> {
    let inner = tag.strip_prefix('<')?.strip_suffix('>')?.trim();
    let closing = inner.starts_with('/');
    let name: String = inner
        .trim_start_matches('/')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    block_priority(&name).map(|p| (closing, p))
}

#[derive(Clone, Copy, Debug)]
struct SplitPoint {
    /// Byte offset; the split falls immediately before the opening tag.
    pos: usize,
    priority: BlockPriority,
}

/// Positions between a block-closing placeholder and the next block-opening
/// placeholder, ranked by the more important of the two tags.
fn split_candidates(text: &str, map: &TagMap) -> Vec<SplitPoint> {
    let hits = map.format.find_all(text);
    let mut points = Vec::new();
    for pair in hits.windows(2) {
        let close_tag = map.get(pair[0].index).and_then(classify_tag);
        let open_tag = map.get(pair[1].index).and_then(classify_tag);
        let (Some((true, close_prio)), Some((false, open_prio))) = (close_tag, open_tag) else {
            continue;
        };
        points.push(SplitPoint {
            pos: pair[1].start,
            priority: close_prio.min(open_prio),
        });
    }
    points
}

/// Split placeholder-laden text into token-budget-bounded chunks, each
/// renumbered to a local placeholder space. Segment boundaries prefer
/// high-priority block edges; oversized placeholder-free segments degrade
/// through sentence, punctuation, newline, and forced splitting. The budget
/// is a soft bound: forced cuts snap to whitespace, so a chunk may exceed
/// `max_tokens` by a word.
pub fn chunk_text(
    text: &str,
    map: &TagMap,
    max_tokens: usize,
    counter: &dyn TokenCounter,
) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let max_tokens = max_tokens.max(1);
    let segments = block_split(text, map, counter, max_tokens, 0);

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0usize;
    let mut global_offset = 0usize;

    let mut flush = |current: &mut String, global_offset: &mut usize, chunks: &mut Vec<Chunk>| {
        if current.is_empty() {
            return;
        }
        let chunk = renumber_chunk(current, map, *global_offset);
        *global_offset += chunk.placeholder_count();
        chunks.push(chunk);
        current.clear();
    };

    for segment in segments {
        let tokens = counter.count(&segment);
        if !current.is_empty() && current_tokens + tokens > max_tokens {
            flush(&mut current, &mut global_offset, &mut chunks);
            current_tokens = 0;
        }
        current.push_str(&segment);
        current_tokens += tokens;
    }
    flush(&mut current, &mut global_offset, &mut chunks);
    chunks
}

/// Recursive block-boundary splitting: try the highest-priority class first,
/// re-splitting oversized pieces at the next class down. Pieces with no
/// block candidates left fall through to the oversized cascade.
fn block_split(
    text: &str,
    map: &TagMap,
    counter: &dyn TokenCounter,
    max_tokens: usize,
    level: usize,
) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if counter.count(text) <= max_tokens {
        return vec![text.to_string()];
    }
    if level >= PRIORITY_LEVELS.len() {
        return subdivide_oversized(text, map.format, counter, max_tokens, 0);
    }
    let wanted = PRIORITY_LEVELS[level];
    let points: Vec<usize> = split_candidates(text, map)
        .into_iter()
        .filter(|p| p.priority == wanted)
        .map(|p| p.pos)
        .collect();
    if points.is_empty() {
        return block_split(text, map, counter, max_tokens, level + 1);
    }

    let mut out = Vec::new();
    let mut start = 0usize;
    for pos in points.into_iter().chain(std::iter::once(text.len())) {
        if pos > start {
            out.extend(block_split(&text[start..pos], map, counter, max_tokens, level + 1));
            start = pos;
        }
    }
    out
}

/// Ordered cascade for a segment over budget on its own: sentence ends,
/// strong punctuation, newlines, then a forced binary-search cut. Each
/// strategy partitions the text exactly; concatenating the pieces always
/// reproduces the input.
fn subdivide_oversized(
    text: &str,
    format: PlaceholderFormat,
    counter: &dyn TokenCounter,
    max_tokens: usize,
    strategy: usize,
) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if counter.count(text) <= max_tokens {
        return vec![text.to_string()];
    }

    let split: Option<Vec<String>> = match strategy {
        0 => split_after(text, |ch, next| {
            is_sentence_end(ch) && next.map(char::is_whitespace).unwrap_or(true)
        }),
        1 => split_after(text, |ch, _| is_strong_punct(ch)),
        2 => split_after(text, |ch, _| ch == '\n'),
        _ => None,
    };

    match split {
        Some(pieces) if pieces.len() > 1 => pieces
            .iter()
            .flat_map(|p| subdivide_oversized(p, format, counter, max_tokens, strategy + 1))
            .collect(),
        Some(_) | None if strategy < 3 => {
            subdivide_oversized(text, format, counter, max_tokens, strategy + 1)
        }
        _ => forced_split(text, format, counter, max_tokens),
    }
}

/// Partition after every char where `pred(ch, next_ch)` holds. Returns None
/// when no boundary exists.
fn split_after(text: &str, pred: impl Fn(char, Option<char>) -> bool) -> Option<Vec<String>> {
    let mut pieces = Vec::new();
    let mut start = 0usize;
    let mut iter = text.char_indices().peekable();
    while let Some((i, ch)) = iter.next() {
        let next = iter.peek().map(|&(_, c)| c);
        if pred(ch, next) {
            let end = i + ch.len_utf8();
            if end < text.len() {
                pieces.push(text[start..end].to_string());
                start = end;
            }
        }
    }
    if pieces.is_empty() {
        return None;
    }
    pieces.push(text[start..].to_string());
    Some(pieces)
}

/// Last resort: walk the text with a cursor, cutting off the largest
/// budget-sized prefix at each step, snapped to whitespace and kept out of
/// placeholder tokens. Iterative, so the piece count never grows the stack;
/// the prefix search gallops, so each step's counting work tracks the cut
/// size rather than the remainder.
fn forced_split(
    text: &str,
    format: PlaceholderFormat,
    counter: &dyn TokenCounter,
    max_tokens: usize,
) -> Vec<String> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let total = chars.len();
    let byte_of =
        |char_pos: usize| -> usize { chars.get(char_pos).map(|&(b, _)| b).unwrap_or(text.len()) };

    let mut out = Vec::new();
    let mut start = 0usize;
    while start < total {
        let remaining = total - start;
        if remaining <= 1 {
            out.push(text[byte_of(start)..].to_string());
            break;
        }

        // Largest char count whose prefix stays within budget: exponential
        // search for an upper bound, then bisect. fits(remaining) covers
        // the whole remainder and ends the walk.
        let fits =
            |n: usize| counter.count(&text[byte_of(start)..byte_of(start + n)]) <= max_tokens;
        let mut lo = 1usize;
        let mut hi = 1usize;
        while hi < remaining && fits(hi) {
            lo = hi;
            hi = (hi * 2).min(remaining);
        }
        if fits(hi) {
            out.push(text[byte_of(start)..].to_string());
            break;
        }
        while lo + 1 < hi {
            let mid = (lo + hi) / 2;
            if fits(mid) {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        let cut = snap_cut(text, &chars, start, lo, format).clamp(1, remaining - 1);
        out.push(text[byte_of(start)..byte_of(start + cut)].to_string());
        start += cut;
    }
    out
}

/// Snap a char cut (relative to `origin`) to the nearest whitespace within
/// the window, extending left when the window has none, and push it off any
/// placeholder token it would sever. Returns the snapped cut, still relative
/// to `origin`.
fn snap_cut(
    text: &str,
    chars: &[(usize, char)],
    origin: usize,
    cut: usize,
    format: PlaceholderFormat,
) -> usize {
    let remaining = chars.len() - origin;
    let near_ws = |p: usize| -> bool {
        let a = origin + p;
        (p > 0 && chars[a - 1].1.is_whitespace())
            || (a < chars.len() && chars[a].1.is_whitespace())
    };

    let mut snapped = cut;
    if !near_ws(cut) {
        let mut found = None;
        for k in 1..=SNAP_WINDOW_CHARS {
            if cut >= k && near_ws(cut - k) {
                found = Some(cut - k);
                break;
            }
            if cut + k < remaining && near_ws(cut + k) {
                found = Some(cut + k);
                break;
            }
        }
        if found.is_none() {
            // Window exhausted: keep walking left so an overlong unbroken
            // token (a URL, say) is cut only when it fills the whole prefix.
            found = (1..cut.saturating_sub(SNAP_WINDOW_CHARS))
                .rev()
                .find(|&p| near_ws(p));
        }
        snapped = found.unwrap_or(cut);
    }

    // Never sever a placeholder token.
    let snapped_byte = chars
        .get(origin + snapped)
        .map(|&(b, _)| b)
        .unwrap_or(text.len());
    for hit in format.find_all(text) {
        if snapped_byte > hit.start && snapped_byte < hit.end {
            let start_chars = chars.partition_point(|&(b, _)| b < hit.start);
            let end_chars = chars.partition_point(|&(b, _)| b < hit.end);
            return if start_chars > origin {
                start_chars - origin
            } else {
                end_chars - origin
            };
        }
    }
    snapped
}
