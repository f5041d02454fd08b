use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::placeholders::PlaceholderFormat;

pub const DEFAULT_CONFIG_NAME: &str = "markup-translator.toml";

const DEFAULT_MAX_TOKENS: usize = 800;
const DEFAULT_MAX_RETRIES: usize = 3;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PipelineSection {
    /// Soft per-chunk token budget.
    #[serde(default)]
    pub max_tokens: Option<usize>,

    /// Phase-1 submissions per chunk before escalating to alignment recovery.
    #[serde(default)]
    pub max_retries: Option<usize>,

    /// Placeholder syntax name: "bracket-id" (default), "double-brace",
    /// "underscore". Must match across every component of a run, so it is
    /// resolved once here and an unknown name fails at startup.
    #[serde(default)]
    pub placeholder_format: Option<String>,

    #[serde(default)]
    pub source_lang: Option<String>,
    #[serde(default)]
    pub target_lang: Option<String>,

    #[serde(default)]
    pub trace_dir: Option<String>,
    #[serde(default)]
    pub trace_outputs: Option<bool>,

    /// Optional chunk checkpoint file; runs resume from it when present.
    #[serde(default)]
    pub checkpoint_path: Option<String>,
}

/// Everything the pipeline needs, resolved from file + CLI overrides.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub format: PlaceholderFormat,
    pub max_tokens: usize,
    pub max_retries: usize,
    pub source_lang: String,
    pub target_lang: String,
    pub trace_dir: PathBuf,
    pub trace_outputs: bool,
    pub checkpoint_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            format: PlaceholderFormat::default(),
            max_tokens: DEFAULT_MAX_TOKENS,
            max_retries: DEFAULT_MAX_RETRIES,
            source_lang: "en".to_string(),
            target_lang: "zh".to_string(),
            trace_dir: PathBuf::from("_trace"),
            trace_outputs: false,
            checkpoint_path: None,
        }
    }
}

impl PipelineConfig {
    /// Merge a loaded config file with CLI overrides. A bad placeholder
    /// format name is a configuration defect and errors here, never per
    /// chunk.
    pub fn resolve(
        file_cfg: &AppConfig,
        format_override: Option<&str>,
        max_tokens_override: Option<usize>,
        source_lang: Option<String>,
        target_lang: Option<String>,
    ) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let p = &file_cfg.pipeline;

        let format_name = format_override
            .map(str::to_string)
            .or_else(|| p.placeholder_format.clone())
            .unwrap_or_default();
        let format = PlaceholderFormat::parse_name(&format_name)?;

        Ok(Self {
            format,
            max_tokens: max_tokens_override
                .or(p.max_tokens)
                .filter(|&n| n > 0)
                .unwrap_or(defaults.max_tokens),
            max_retries: p.max_retries.unwrap_or(defaults.max_retries).max(1),
            source_lang: source_lang
                .or_else(|| p.source_lang.clone())
                .unwrap_or(defaults.source_lang),
            target_lang: target_lang
                .or_else(|| p.target_lang.clone())
                .unwrap_or(defaults.target_lang),
            trace_dir: p
                .trace_dir
                .clone()
                .map(PathBuf::from)
                .unwrap_or(defaults.trace_dir),
            trace_outputs: p.trace_outputs.unwrap_or(defaults.trace_outputs),
            checkpoint_path: p.checkpoint_path.clone().map(PathBuf::from),
        })
    }
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

pub fn find_default_config(workdir: &Path) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, DEFAULT_CONFIG_NAME, 8) {
            return Some(p);
        }
    }
    find_file_upwards(workdir, DEFAULT_CONFIG_NAME, 8)
}

pub fn find_file_upwards(start: &Path, filename: &str, max_depth: usize) -> Option<PathBuf> {
    let mut dir = Some(start.to_path_buf());
    for _ in 0..max_depth {
        let d = dir?;
        let cand = d.join(filename);
        if cand.is_file() {
            return Some(cand);
        }
        dir = d.parent().map(|p| p.to_path_buf());
    }
    None
}

const DEFAULT_CONFIG_TOML: &str = r#"[pipeline]
# Soft per-chunk token budget.
max_tokens = 800
# Phase-1 attempts before alignment recovery.
max_retries = 3
# Placeholder syntax: bracket-id | double-brace | underscore.
placeholder_format = "bracket-id"
source_lang = "en"
target_lang = "zh"
# trace_dir = "_trace"
# trace_outputs = true
# checkpoint_path = "chunks.checkpoint.json"
"#;

/// Write a commented default config, refusing to clobber without `force`.
pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    let path = dir.join(DEFAULT_CONFIG_NAME);
    if path.exists() && !force {
        anyhow::bail!("config already exists: {} (use --force)", path.display());
    }
    std::fs::create_dir_all(dir).with_context(|| format!("create dir: {}", dir.display()))?;
    std::fs::write(&path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", path.display()))?;
    Ok(path)
}
