use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use serde::Deserialize;

pub const CONFIG_FILENAME: &str = "gadacz.toml";
pub const CONFIG_ENV_VAR: &str = "GADACZ_CONFIG";

pub const DEFAULT_MODEL_FILENAME: &str = "model.gguf";
pub const DEFAULT_DEBUG_PATH: &str = "debug.txt";
pub const DEFAULT_AUDIO_PATH: &str = "file.mp3";
pub const DEFAULT_TRANSLATE_ENDPOINT: &str = "https://translate.argosopentech.com";
pub const DEFAULT_SPEECH_ENDPOINT: &str = "https://translate.google.com/translate_tts";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub generation: GenerationSection,
    #[serde(default)]
    pub translate: TranslateSection,
    #[serde(default)]
    pub speech: SpeechSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ModelSection {
    /// GGUF path. Relative paths are resolved against the config dir,
    /// the current dir and the exe dir, in that order.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub ctx_size: Option<u32>,
    #[serde(default)]
    pub threads: Option<i32>,
    #[serde(default)]
    pub gpu_layers: Option<i32>,
    #[serde(default)]
    pub batch_size: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct GenerationSection {
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub repeat_penalty: Option<f32>,
    #[serde(default)]
    pub seed: Option<u32>,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TranslateSection {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub source_lang: Option<String>,
    #[serde(default)]
    pub target_lang: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct SpeechSection {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub audio_path: Option<PathBuf>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PipelineSection {
    #[serde(default)]
    pub debug_path: Option<PathBuf>,
}

/// Fully merged run settings: CLI overrides > config file > built-in defaults.
/// Defaults reproduce the fixed-path, fixed-length behavior of a bare run.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub config_path: Option<PathBuf>,

    pub model_path: PathBuf,
    pub ctx_size: u32,
    pub threads: i32,
    pub gpu_layers: i32,
    pub batch_size: Option<u32>,

    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: Option<u32>,
    pub repeat_penalty: Option<f32>,
    pub seed: u32,
    pub stop: Vec<String>,

    pub translate_endpoint: String,
    pub api_key: Option<String>,
    pub source_lang: String,
    pub target_lang: String,

    pub speech_endpoint: String,
    pub speech_lang: String,
    pub audio_path: PathBuf,
    pub speech_enabled: bool,

    pub debug_path: PathBuf,
}

/// CLI-side overrides, handed in by `main`.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub model: Option<PathBuf>,
    pub threads: Option<i32>,
    pub gpu_layers: Option<i32>,
    pub max_tokens: Option<u32>,
    pub source_lang: Option<String>,
    pub target_lang: Option<String>,
    pub debug_out: Option<PathBuf>,
    pub audio_out: Option<PathBuf>,
    pub no_speech: bool,
}

impl RunConfig {
    pub fn from_overrides(ov: Overrides) -> anyhow::Result<Self> {
        let cfg_file = ov
            .config
            .clone()
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
            .or_else(find_default_config);

        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
            } else if ov.config.is_some() {
                return Err(anyhow!("config not found: {}", p.display()));
            }
        }
        let config_dir = cfg_file
            .as_ref()
            .and_then(|p| p.parent())
            .map(|p| p.to_path_buf());

        let model_path = match ov.model {
            Some(p) => p,
            None => {
                let configured = file_cfg
                    .model
                    .path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_FILENAME));
                resolve_model_path(&configured, config_dir.as_deref())?
            }
        };

        let g = &file_cfg.generation;
        let t = &file_cfg.translate;
        let s = &file_cfg.speech;

        Ok(Self {
            config_path: cfg_file.clone(),
            model_path,
            ctx_size: file_cfg.model.ctx_size.unwrap_or(2048),
            threads: ov.threads.or(file_cfg.model.threads).unwrap_or(-1),
            gpu_layers: ov.gpu_layers.or(file_cfg.model.gpu_layers).unwrap_or(-1),
            batch_size: file_cfg.model.batch_size,

            max_tokens: ov.max_tokens.or(g.max_tokens).unwrap_or(64),
            temperature: g.temperature.unwrap_or(0.8),
            top_p: g.top_p.unwrap_or(0.95),
            top_k: Some(g.top_k.unwrap_or(40)),
            repeat_penalty: Some(g.repeat_penalty.unwrap_or(1.1)),
            seed: g.seed.unwrap_or(1234),
            stop: g
                .stop
                .clone()
                .unwrap_or_else(|| vec![crate::qa::STOP_SEQUENCE.to_string()]),

            translate_endpoint: t
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_TRANSLATE_ENDPOINT.to_string()),
            api_key: t.api_key.clone().filter(|k| !k.trim().is_empty()),
            source_lang: ov
                .source_lang
                .or_else(|| t.source_lang.clone())
                .unwrap_or_else(|| "pl".to_string()),
            target_lang: ov
                .target_lang
                .or_else(|| t.target_lang.clone())
                .unwrap_or_else(|| "en".to_string()),

            speech_endpoint: s
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_SPEECH_ENDPOINT.to_string()),
            speech_lang: s.lang.clone().unwrap_or_else(|| "pl".to_string()),
            audio_path: ov
                .audio_out
                .or_else(|| s.audio_path.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_AUDIO_PATH)),
            speech_enabled: !ov.no_speech && s.enabled.unwrap_or(true),

            debug_path: ov
                .debug_out
                .or_else(|| file_cfg.pipeline.debug_path.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DEBUG_PATH)),
        })
    }
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config() -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, CONFIG_FILENAME, 8) {
            return Some(p);
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, CONFIG_FILENAME, 8) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

/// Resolve a (possibly relative) model path against the usual search dirs.
/// Missing models fail here with the searched locations spelled out, instead
/// of deep inside the loader.
pub fn resolve_model_path(configured: &Path, config_dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    if configured.is_absolute() {
        if configured.exists() {
            return Ok(configured.to_path_buf());
        }
        return Err(anyhow!("model not found: {}", configured.display()));
    }

    let mut search_dirs: Vec<PathBuf> = Vec::new();
    if let Some(d) = config_dir {
        search_dirs.push(d.to_path_buf());
    }
    if let Ok(cwd) = std::env::current_dir() {
        search_dirs.push(cwd);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            search_dirs.push(dir.to_path_buf());
        }
    }

    for dir in &search_dirs {
        let cand = dir.join(configured);
        if cand.exists() {
            return Ok(cand);
        }
    }

    Err(anyhow!(
        "model not found: {} (searched: {})",
        configured.display(),
        search_dirs
            .iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join("; ")
    ))
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILENAME);
    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

pub const DEFAULT_CONFIG_TOML: &str = r#"[model]
path = "model.gguf"
ctx_size = 2048
threads = -1
gpu_layers = -1

[generation]
max_tokens = 64
temperature = 0.8
top_p = 0.95
top_k = 40
repeat_penalty = 1.1
seed = 1234
stop = ["Q:"]

[translate]
endpoint = "https://translate.argosopentech.com"
# api_key = ""
source_lang = "pl"
target_lang = "en"

[speech]
endpoint = "https://translate.google.com/translate_tts"
lang = "pl"
audio_path = "file.mp3"
enabled = true

[pipeline]
debug_path = "debug.txt"
"#;
