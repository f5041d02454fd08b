use anyhow::{anyhow, bail};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One placeholder occurrence located in a text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaceholderHit {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

/// Closed set of placeholder syntaxes. One compiled pattern per variant;
/// the format is fixed for a process run and must match across all
/// components, so it is parsed once at config time and passed by value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlaceholderFormat {
    /// `[id7]`
    #[default]
    BracketId,
    /// `{{7}}`
    DoubleBrace,
    /// `__7__`
    Underscore,
}

static BRACKET_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[id(\d+)\]").expect("bracket re"));
static DOUBLE_BRACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(\d+)\}\}").expect("brace re"));
static UNDERSCORE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"__(\d+)__").expect("underscore re"));

impl PlaceholderFormat {
    pub fn parse_name(name: &str) -> anyhow::Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "bracket-id" | "bracket_id" => Ok(Self::BracketId),
            "double-brace" | "double_brace" => Ok(Self::DoubleBrace),
            "underscore" => Ok(Self::Underscore),
            other => bail!("unknown_placeholder_format:{other}"),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::BracketId => "bracket-id",
            Self::DoubleBrace => "double-brace",
            Self::Underscore => "underscore",
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Self::BracketId => "[id",
            Self::DoubleBrace => "{{",
            Self::Underscore => "__",
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Self::BracketId => "]",
            Self::DoubleBrace => "}}",
            Self::Underscore => "__",
        }
    }

    pub fn token(&self, index: usize) -> String {
        format!("{}{index}{}", self.prefix(), self.suffix())
    }

    pub fn regex(&self) -> &'static Regex {
        match self {
            Self::BracketId => &BRACKET_ID_RE,
            Self::DoubleBrace => &DOUBLE_BRACE_RE,
            Self::Underscore => &UNDERSCORE_RE,
        }
    }

    /// Parse a single exact token back to its index.
    pub fn parse_token(&self, token: &str) -> Option<usize> {
        let caps = self.regex().captures(token)?;
        let m = caps.get(0)?;
        if m.start() != 0 || m.end() != token.len() {
            return None;
        }
        caps.get(1)?.as_str().parse().ok()
    }

    /// All occurrences in text order. Indices may repeat and need not be
    /// contiguous; callers decide what shape they require.
    pub fn find_all(&self, text: &str) -> Vec<PlaceholderHit> {
        self.regex()
            .captures_iter(text)
            .filter_map(|caps| {
                let m = caps.get(0)?;
                let index: usize = caps.get(1)?.as_str().parse().ok()?;
                Some(PlaceholderHit {
                    index,
                    start: m.start(),
                    end: m.end(),
                })
            })
            .collect()
    }

    /// Remove every placeholder token, leaving the surrounding text intact.
    pub fn strip(&self, text: &str) -> String {
        self.regex().replace_all(text, "").into_owned()
    }

    /// Rewrite every token through `map(index)`; tokens for which `map`
    /// returns None are kept verbatim. Whole-token matching, so numerically
    /// overlapping indices (`[id1]` vs `[id10]`) can never cross-contaminate.
    pub fn rewrite(&self, text: &str, mut map: impl FnMut(usize) -> Option<String>) -> String {
        self.regex()
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
                let index: Option<usize> = caps.get(1).and_then(|m| m.as_str().parse().ok());
                match index.and_then(&mut map) {
                    Some(repl) => repl,
                    None => whole.to_string(),
                }
            })
            .into_owned()
    }
}

/// Startup check: a text that already contains placeholder-shaped substrings
/// would collide with generated tokens once tags are preserved.
pub fn ensure_no_preexisting_placeholders(
    text: &str,
    format: PlaceholderFormat,
) -> anyhow::Result<()> {
    if let Some(hit) = format.find_all(text).first() {
        return Err(anyhow!(
            "preexisting_placeholder_in_input:{}",
            format.token(hit.index)
        ));
    }
    Ok(())
}
