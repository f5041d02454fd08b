use anyhow::{anyhow, Result};

use crate::ir::TagMap;

/// Loose gate: every expected placeholder occurs at least once as a whole
/// token. Duplicates and stray extra tokens are tolerated.
pub fn validate_basic(text: &str, map: &TagMap) -> bool {
    let found: Vec<usize> = map.format.find_all(text).iter().map(|h| h.index).collect();
    map.indices().all(|i| found.contains(&i))
}

/// Strict gate for raw LLM output: the number of placeholder occurrences
/// equals the map size and the found indices are exactly the map's index
/// range, each once. The error reason is consumed by the phase policy to
/// decide on fallback; it never propagates as a failure of the run.
pub fn validate_strict(text: &str, map: &TagMap) -> Result<()> {
    let hits = map.format.find_all(text);
    if hits.len() != map.len() {
        return Err(anyhow!(
            "placeholder_count_mismatch expected={} got={}",
            map.len(),
            hits.len()
        ));
    }

    let mut seen = vec![false; map.len()];
    for hit in &hits {
        let Some(slot) = hit
            .index
            .checked_sub(map.offset)
            .filter(|&s| s < map.len())
        else {
            return Err(anyhow!("unexpected_placeholder:{}", map.token(hit.index)));
        };
        if seen[slot] {
            return Err(anyhow!("duplicated_placeholder:{}", map.token(hit.index)));
        }
        seen[slot] = true;
    }
    if let Some(slot) = seen.iter().position(|&s| !s) {
        return Err(anyhow!(
            "missing_placeholder:{}",
            map.token(map.offset + slot)
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placeholders::PlaceholderFormat;

    fn local_map(n: usize) -> TagMap {
        let mut map = TagMap::new(PlaceholderFormat::BracketId);
        for i in 0..n {
            map.push(format!("<t{i}>"));
        }
        map
    }

    #[test]
    fn strict_accepts_exact_set() {
        let map = local_map(3);
        assert!(validate_strict("[id0]Bonjour[id1] monde[id2]", &map).is_ok());
        assert!(validate_basic("[id0]Bonjour[id1] monde[id2]", &map));
    }

    #[test]
    fn strict_rejects_missing() {
        let map = local_map(3);
        let err = validate_strict("[id0]Bonjour[id2]", &map).unwrap_err();
        assert!(err.to_string().starts_with("placeholder_count_mismatch"));
    }

    #[test]
    fn strict_rejects_duplicate() {
        let map = local_map(2);
        let err = validate_strict("[id0]a[id0]", &map).unwrap_err();
        assert!(err.to_string().starts_with("duplicated_placeholder"));
    }

    #[test]
    fn strict_rejects_hallucinated_index() {
        let map = local_map(2);
        let err = validate_strict("[id0]a[id7]", &map).unwrap_err();
        assert_eq!(err.to_string(), "unexpected_placeholder:[id7]");
    }

    #[test]
    fn basic_requires_whole_token_matches() {
        let map = local_map(2);
        assert!(validate_basic("[id0] then [id1]", &map));
        // [id10] is not an occurrence of [id1].
        assert!(!validate_basic("[id0] then [id10]", &map));
    }

    #[test]
    fn basic_tolerates_duplicates_strict_does_not() {
        let map = local_map(1);
        let text = "[id0]a[id0]";
        assert!(validate_basic(text, &map));
        assert!(validate_strict(text, &map).is_err());
    }

    #[test]
    fn empty_map_accepts_any_text_without_tokens() {
        let map = local_map(0);
        assert!(validate_strict("anything at all", &map).is_ok());
        assert!(validate_basic("anything at all", &map));
        // A stray token is still a strict failure.
        assert!(validate_strict("x[id0]y", &map).is_err());
    }

    #[test]
    fn strict_respects_map_offset() {
        let mut map = TagMap::with_offset(PlaceholderFormat::BracketId, 5);
        map.push("<p>".into());
        map.push("</p>".into());
        assert!(validate_strict("[id5]ok[id6]", &map).is_ok());
        assert!(validate_strict("[id0]ok[id1]", &map).is_err());
    }
}
