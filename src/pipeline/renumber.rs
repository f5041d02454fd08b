use crate::ir::{Chunk, TagMap};

/// Rewrite a chunk's global placeholders into a fresh local 0..n-1 space.
///
/// Every occurrence gets its own local index, assigned by first character
/// position (not numeric value), so a repeated global placeholder yields as
/// many distinct locals as it has occurrences. The text is rebuilt by
/// position-ordered splicing over exact token matches; numerically
/// overlapping tokens (`[id1]` / `[id10]`) cannot corrupt each other the way
/// sequential string replacement would.
///
/// A global index absent from `global_map` still gets a local slot, backed
/// by an empty-string tag, so the chunk invariant
/// `local_tag_map.len() == global_indices.len()` holds unconditionally.
pub fn renumber_chunk(text: &str, global_map: &TagMap, global_offset: usize) -> Chunk {
    let format = global_map.format;
    let hits = format.find_all(text);

    let mut local_map = TagMap::new(format);
    let mut global_indices = Vec::with_capacity(hits.len());
    let mut out = String::with_capacity(text.len());
    let mut pos = 0usize;

    for hit in &hits {
        out.push_str(&text[pos..hit.start]);
        let tag = global_map.get(hit.index).unwrap_or_default().to_string();
        let local = local_map.push(tag);
        global_indices.push(hit.index);
        out.push_str(&format.token(local));
        pos = hit.end;
    }
    out.push_str(&text[pos..]);

    Chunk {
        text: out,
        local_tag_map: local_map,
        global_offset,
        global_indices,
    }
}

/// Inverse rewrite for reassembly: local tokens in `text` become the global
/// tokens recorded in `chunk.global_indices`. Locals outside the chunk's
/// range are left verbatim; reassembly never invents indices.
pub fn restore_global_indices(text: &str, chunk: &Chunk) -> String {
    let format = chunk.local_tag_map.format;
    format.rewrite(text, |local| {
        chunk
            .global_indices
            .get(local)
            .map(|&global| format.token(global))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placeholders::PlaceholderFormat;

    fn map_with(tags: &[(usize, &str)]) -> TagMap {
        let offset = tags.first().map(|(i, _)| *i).unwrap_or(0);
        let mut map = TagMap::with_offset(PlaceholderFormat::BracketId, offset);
        for (_, tag) in tags {
            map.push((*tag).to_string());
        }
        map
    }

    #[test]
    fn offset_run_renumbers_to_local_zero_space() {
        let map = map_with(&[(5, "<p>"), (6, "<b>"), (7, "</b></p>")]);
        let chunk = renumber_chunk("[id5]Hello[id6]world[id7]", &map, 0);
        assert_eq!(chunk.text, "[id0]Hello[id1]world[id2]");
        assert_eq!(chunk.local_tag_map.tags, vec!["<p>", "<b>", "</b></p>"]);
        assert_eq!(chunk.global_indices, vec![5, 6, 7]);
    }

    #[test]
    fn local_order_follows_position_not_numeric_value() {
        let map = map_with(&[(0, "<a>"), (1, "<b>"), (2, "<c>")]);
        let chunk = renumber_chunk("[id2]x[id0]y[id1]", &map, 0);
        assert_eq!(chunk.text, "[id0]x[id1]y[id2]");
        assert_eq!(chunk.global_indices, vec![2, 0, 1]);
        assert_eq!(chunk.local_tag_map.tags, vec!["<c>", "<a>", "<b>"]);
    }

    #[test]
    fn duplicates_get_distinct_locals_mapping_to_same_global() {
        let map = map_with(&[(0, "<br/>")]);
        let chunk = renumber_chunk("a[id0]b[id0]c", &map, 0);
        assert_eq!(chunk.text, "a[id0]b[id1]c");
        assert_eq!(chunk.global_indices, vec![0, 0]);
        assert_eq!(chunk.local_tag_map.tags, vec!["<br/>", "<br/>"]);
        let back = restore_global_indices(&chunk.text, &chunk);
        assert_eq!(back, "a[id0]b[id0]c");
    }

    #[test]
    fn missing_global_yields_empty_tag_not_error() {
        let map = map_with(&[(0, "<p>")]);
        let chunk = renumber_chunk("[id0]x[id99]", &map, 0);
        assert_eq!(chunk.text, "[id0]x[id1]");
        assert_eq!(chunk.local_tag_map.tags, vec!["<p>", ""]);
        assert_eq!(chunk.global_indices, vec![0, 99]);
    }

    #[test]
    fn numerically_overlapping_globals_survive() {
        let mut map = TagMap::new(PlaceholderFormat::BracketId);
        for i in 0..12 {
            map.push(format!("<t{i}>"));
        }
        let chunk = renumber_chunk("[id10][id1][id11]", &map, 0);
        assert_eq!(chunk.text, "[id0][id1][id2]");
        assert_eq!(chunk.global_indices, vec![10, 1, 11]);
        assert_eq!(
            restore_global_indices(&chunk.text, &chunk),
            "[id10][id1][id11]"
        );
    }

    #[test]
    fn text_without_placeholders_passes_through() {
        let map = map_with(&[(0, "<p>")]);
        let chunk = renumber_chunk("plain text", &map, 3);
        assert_eq!(chunk.text, "plain text");
        assert!(chunk.local_tag_map.is_empty());
        assert!(chunk.global_indices.is_empty());
        assert_eq!(chunk.global_offset, 3);
    }
}
