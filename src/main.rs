use std::path::PathBuf;

use anyhow::Context;
use clap::{CommandFactory, Parser};

use markup_translator::config::{
    find_default_config, init_default_config, load_config, AppConfig, PipelineConfig,
};
use markup_translator::pipeline::{chunk_text, TranslationPolicy};
use markup_translator::placeholders::ensure_no_preexisting_placeholders;
use markup_translator::preserve::preserve_tags;
use markup_translator::progress::ConsoleProgress;
use markup_translator::textutil::HeuristicTokenCounter;

#[derive(Parser, Debug)]
#[command(name = "markup-translator")]
#[command(about = "Placeholder-preserving chunking pipeline for markup translation", long_about = None)]
struct Args {
    /// Generate a default config file, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write the config file (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite an existing config file when used with --init-config
    #[arg(long)]
    force: bool,

    /// Input HTML/markup file
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// Write the reassembled document here after a roundtrip check
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Preserve + chunk the input and dump the chunk records as JSON
    #[arg(long, value_name = "JSON")]
    chunks_json: Option<PathBuf>,

    /// Soft per-chunk token budget (overrides config)
    #[arg(long)]
    max_tokens: Option<usize>,

    /// Placeholder syntax: bracket-id | double-brace | underscore
    #[arg(long)]
    placeholder_format: Option<String>,

    /// Config file path (default: search for markup-translator.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let progress = ConsoleProgress::new(true);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let Some(input) = args.input else {
        let mut cmd = Args::command();
        cmd.print_help().context("print help")?;
        eprintln!(
            "\n\nUSAGE:\n  markup-translator <input.html> [--chunks-json out.json]\n"
        );
        return Ok(());
    };

    let file_cfg: AppConfig = match args.config.or_else(|| {
        find_default_config(input.parent().unwrap_or_else(|| std::path::Path::new(".")))
    }) {
        Some(path) => load_config(&path)?,
        None => AppConfig::default(),
    };
    let cfg = PipelineConfig::resolve(
        &file_cfg,
        args.placeholder_format.as_deref(),
        args.max_tokens,
        None,
        None,
    )
    .context("build config")?;

    let html = std::fs::read_to_string(&input)
        .with_context(|| format!("read input: {}", input.display()))?;

    if let Some(chunks_path) = args.chunks_json {
        ensure_no_preexisting_placeholders(&html, cfg.format)?;
        let (flat, map) = preserve_tags(&html, cfg.format);
        let chunks = chunk_text(&flat, &map, cfg.max_tokens, &HeuristicTokenCounter);
        progress.info(format!(
            "preserved {} tags, {} chunks",
            map.len(),
            chunks.len()
        ));
        let json = serde_json::to_string_pretty(&chunks).context("encode chunks json")?;
        std::fs::write(&chunks_path, json)
            .with_context(|| format!("write chunks json: {}", chunks_path.display()))?;
        return Ok(());
    }

    // Default mode: run the full pipeline with an identity backend and
    // verify the reassembled document matches the input byte for byte.
    let policy = TranslationPolicy::new(cfg, progress)?;
    let mut identity = |text: &str| -> anyhow::Result<String> { Ok(text.to_string()) };
    let (restored, stats) =
        policy.translate_document(&html, &mut identity, &HeuristicTokenCounter, None, &|| false)?;
    if restored != html {
        anyhow::bail!("roundtrip_mismatch: reassembled output differs from input");
    }
    eprintln!("roundtrip ok ({})", stats.render_summary());

    if let Some(output) = args.output {
        std::fs::write(&output, &restored)
            .with_context(|| format!("write output: {}", output.display()))?;
    }
    Ok(())
}
