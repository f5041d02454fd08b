/// Token counting is a collaborator: the real count depends on the model's
/// tokenizer, which lives outside this crate. The heuristic below is the
/// default used when no exact counter is injected.
pub trait TokenCounter {
    fn count(&self, text: &str) -> usize;
}

impl<F: Fn(&str) -> usize> TokenCounter for F {
    fn count(&self, text: &str) -> usize {
        self(text)
    }
}

/// CJK characters tokenize roughly one per character; everything else at
/// about four characters per token. Close enough for budget packing, which
/// is a soft bound anyway.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> usize {
        let mut tokens = 0usize;
        let mut run = 0usize;
        for ch in text.chars() {
            if ch.is_whitespace() {
                tokens += run.div_ceil(4);
                run = 0;
            } else if is_cjk(ch) {
                tokens += run.div_ceil(4) + 1;
                run = 0;
            } else {
                run += 1;
            }
        }
        tokens + run.div_ceil(4)
    }
}

pub fn is_cjk(ch: char) -> bool {
    let u = ch as u32;
    (0x3400..=0x4DBF).contains(&u)
        || (0x4E00..=0x9FFF).contains(&u)
        || (0xF900..=0xFAFF).contains(&u)
        || (0x3040..=0x30FF).contains(&u)
        || (0xAC00..=0xD7AF).contains(&u)
}

pub fn is_cjk_punct(ch: char) -> bool {
    matches!(
        ch,
        '。' | '，'
            | '、'
            | '；'
            | '：'
            | '！'
            | '？'
            | '（'
            | '）'
            | '「'
            | '」'
            | '『'
            | '』'
            | '《'
            | '》'
            | '…'
            | '—'
            | '·'
    )
}

/// Characters the alignment fallback accepts as insertion points: anything
/// that already separates words in either script family.
pub fn is_word_boundary(ch: char) -> bool {
    ch.is_whitespace() || ch.is_ascii_punctuation() || is_cjk_punct(ch)
}

/// Sentence-final characters for the first tier of oversized-segment splits.
pub fn is_sentence_end(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?' | '。' | '！' | '？')
}

/// Strong mid-sentence punctuation, second split tier.
pub fn is_strong_punct(ch: char) -> bool {
    matches!(ch, ';' | ':' | ',' | '；' | '：' | '，' | '、')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_counts_ascii_by_word_length() {
        let counter = HeuristicTokenCounter;
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("word"), 1);
        assert_eq!(counter.count("hello world"), 4); // ceil(5/4) + ceil(5/4)
    }

    #[test]
    fn heuristic_counts_cjk_per_char() {
        let counter = HeuristicTokenCounter;
        assert_eq!(counter.count("你好世界"), 4);
        assert_eq!(counter.count("ab你好"), 3);
    }

    #[test]
    fn closures_are_counters() {
        let by_char = |s: &str| s.chars().count();
        assert_eq!(TokenCounter::count(&by_char, "abc"), 3);
    }

    #[test]
    fn boundary_classes() {
        assert!(is_word_boundary(' '));
        assert!(is_word_boundary(','));
        assert!(is_word_boundary('。'));
        assert!(!is_word_boundary('a'));
        assert!(is_sentence_end('!'));
        assert!(is_strong_punct('；'));
    }
}
