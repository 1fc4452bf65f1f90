use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use gadacz::config::{init_default_config, Overrides, RunConfig};
use gadacz::models::{GenerationParams, NativeCompletionModel, NativeModelConfig};
use gadacz::pipeline::AskPipeline;
use gadacz::progress::ConsoleProgress;
use gadacz::translate::HttpTranslator;
use gadacz::tts::GoogleSpeech;

#[derive(Parser, Debug)]
#[command(name = "gadacz")]
#[command(about = "Ask a local model a question in Polish and hear the answer", long_about = None)]
struct Args {
    /// The question, given as free words
    #[arg(value_name = "WORDS", trailing_var_arg = true)]
    words: Vec<String>,

    /// Config file path (default: search for gadacz.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model GGUF path (overrides config)
    #[arg(long, value_name = "GGUF")]
    model: Option<PathBuf>,

    /// Threads for llama.cpp (default: -1 = auto)
    #[arg(long)]
    threads: Option<i32>,

    /// GPU layers for llama.cpp (default: -1 = offload as much as possible)
    #[arg(long)]
    gpu_layers: Option<i32>,

    /// Generation token budget
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Query language code (default: pl)
    #[arg(long)]
    source_lang: Option<String>,

    /// Model language code (default: en)
    #[arg(long)]
    target_lang: Option<String>,

    /// Debug text output path (default: debug.txt)
    #[arg(long, value_name = "PATH")]
    debug_out: Option<PathBuf>,

    /// Audio output path (default: file.mp3)
    #[arg(long, value_name = "PATH")]
    audio_out: Option<PathBuf>,

    /// Skip speech synthesis
    #[arg(long)]
    no_speech: bool,

    /// Suppress progress output on stderr
    #[arg(long, short = 'q')]
    quiet: bool,

    /// Generate a default config file, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write the config file (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite an existing config file when used with --init-config
    #[arg(long)]
    force: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let progress = ConsoleProgress::new(!args.quiet);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    // No input validation: an empty word list becomes an empty query and is
    // handed to the translator as-is.
    let cfg = RunConfig::from_overrides(Overrides {
        config: args.config,
        model: args.model,
        threads: args.threads,
        gpu_layers: args.gpu_layers,
        max_tokens: args.max_tokens,
        source_lang: args.source_lang,
        target_lang: args.target_lang,
        debug_out: args.debug_out,
        audio_out: args.audio_out,
        no_speech: args.no_speech,
    })
    .context("build config")?;

    let mut translator = HttpTranslator::new(cfg.translate_endpoint.clone(), cfg.api_key.clone());
    let mut speech = GoogleSpeech::new(cfg.speech_endpoint.clone());

    progress.info(format!("Load model: {}", cfg.model_path.display()));
    let mut model = NativeCompletionModel::load(
        NativeModelConfig {
            model_path: cfg.model_path.clone(),
            ctx_size: cfg.ctx_size,
            threads: cfg.threads,
            gpu_layers: cfg.gpu_layers,
            batch_size: cfg.batch_size,
            seed: cfg.seed,
        },
        GenerationParams {
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
            top_p: cfg.top_p,
            top_k: cfg.top_k,
            repeat_penalty: cfg.repeat_penalty,
            stop: cfg.stop.clone(),
        },
    )
    .context("load completion model")?;

    let words = args.words;
    let pipeline = AskPipeline::new(cfg, progress);
    pipeline.run(&words, &mut translator, &mut model, &mut speech)?;

    // Model, context and backend are released here, after the final write.
    drop(model);
    Ok(())
}
