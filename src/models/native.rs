use std::num::NonZeroU32;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use encoding_rs::UTF_8;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::DecodeError;

#[derive(Clone, Debug)]
pub struct NativeModelConfig {
    pub model_path: PathBuf,
    pub ctx_size: u32,
    pub threads: i32,
    pub gpu_layers: i32,
    pub batch_size: Option<u32>,
    pub seed: u32,
}

#[derive(Clone, Debug)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: Option<u32>,
    pub repeat_penalty: Option<f32>,
    /// Generation halts before the first occurrence of any of these; the
    /// stop text itself is not part of the output.
    pub stop: Vec<String>,
}

/// Raw-prompt completion over a local GGUF model.
///
/// Owns the llama backend (logs voided, so inference stays quiet on stderr),
/// the model and the context for the duration of one pipeline run; everything
/// is released in order when the value is dropped.
pub struct NativeCompletionModel {
    pub model_path: PathBuf,
    pub ctx_size: u32,
    params: GenerationParams,
    model: Option<Box<LlamaModel>>,
    ctx: Option<LlamaContext<'static>>,
    seed: u32,
    _backend: LlamaBackend,
}

impl NativeCompletionModel {
    pub fn load(cfg: NativeModelConfig, params: GenerationParams) -> anyhow::Result<Self> {
        if !cfg.model_path.exists() {
            return Err(anyhow!("model not found: {}", cfg.model_path.display()));
        }

        let mut backend = LlamaBackend::init().context("init llama backend")?;
        backend.void_logs();

        let mut model_params = LlamaModelParams::default();
        if cfg.gpu_layers == -1 {
            // -1 means "offload as many layers as possible" (llama.cpp treats values > n_layer as all layers).
            model_params = model_params.with_n_gpu_layers(9999);
        } else if cfg.gpu_layers >= 0 {
            model_params = model_params.with_n_gpu_layers(cfg.gpu_layers as u32);
        }

        let model = Box::new(
            LlamaModel::load_from_file(&backend, &cfg.model_path, &model_params)
                .with_context(|| format!("load model {}", cfg.model_path.display()))?,
        );
        // Self-referential: `LlamaContext` borrows `LlamaModel`. We keep the model in a `Box`
        // (stable address) and extend the lifetime to `'static` for the context.
        // SAFETY:
        // - The model allocation remains valid as long as `self.model` is `Some`.
        // - We drop `ctx` before `model` in `Drop`.
        let model_ptr: *const LlamaModel = &*model;
        let model_ref: &'static LlamaModel = unsafe { &*model_ptr };

        let ctx_train = model_ref.n_ctx_train();
        let mut ctx_size = cfg.ctx_size;
        if ctx_size == 0 {
            ctx_size = ctx_train.max(2048);
        }
        if ctx_train > 0 && ctx_size > ctx_train {
            ctx_size = ctx_train;
        }
        if ctx_size < 256 {
            ctx_size = 256;
        }

        let mut ctx_params = LlamaContextParams::default().with_n_ctx(NonZeroU32::new(ctx_size));
        let n_batch: u32 = cfg.batch_size.unwrap_or(512).clamp(8, 65536);
        ctx_params = ctx_params.with_n_batch(n_batch).with_n_ubatch(n_batch);
        if cfg.threads > 0 {
            ctx_params = ctx_params.with_n_threads(cfg.threads);
            ctx_params = ctx_params.with_n_threads_batch(cfg.threads);
        }
        let ctx = model_ref
            .new_context(&backend, ctx_params)
            .context("create model context")?;

        Ok(Self {
            model_path: cfg.model_path,
            ctx_size,
            params,
            model: Some(model),
            ctx: Some(ctx),
            seed: cfg.seed,
            _backend: backend,
        })
    }

    /// Run one completion and return the echoed prompt followed by the
    /// generated continuation.
    pub fn complete(&mut self, prompt: &str) -> anyhow::Result<String> {
        let generated = self.generate(prompt)?;
        Ok(format!("{prompt}{generated}"))
    }

    fn generate(&mut self, prompt: &str) -> anyhow::Result<String> {
        self.ctx_mut().clear_kv_cache();

        let prompt_tokens = self
            .model_ref()
            .str_to_token(prompt, AddBos::Always)
            .context("tokenize prompt")?;
        if prompt_tokens.is_empty() {
            return Err(anyhow!("empty prompt tokens"));
        }

        let n_ctx = self.ctx_ref().n_ctx() as usize;
        if prompt_tokens.len() + 1 >= n_ctx {
            return Err(anyhow!(
                "prompt_too_long: prompt_tokens={} n_ctx={}",
                prompt_tokens.len(),
                n_ctx
            ));
        }
        let available = n_ctx.saturating_sub(prompt_tokens.len() + 1);
        let max_tokens = (self.params.max_tokens as usize).min(available);

        let n_batch = self.ctx_ref().n_batch() as usize;
        if n_batch == 0 {
            return Err(anyhow!("invalid n_batch=0"));
        }

        let last_index = prompt_tokens.len() - 1;
        let mut chunk_start = 0;
        while chunk_start < prompt_tokens.len() {
            let chunk_end = (chunk_start + n_batch).min(prompt_tokens.len());
            let chunk = &prompt_tokens[chunk_start..chunk_end];

            let mut batch = LlamaBatch::new(chunk.len().max(512), 1);
            for (i, token) in chunk.iter().copied().enumerate() {
                let pos = (chunk_start + i) as i32;
                let is_last = (chunk_start + i) == last_index;
                batch
                    .add(token, pos, &[0], is_last)
                    .context("batch.add(prompt)")?;
            }

            self.decode_checked(&mut batch, "decode prompt")?;
            chunk_start = chunk_end;
        }

        let mut samplers: Vec<LlamaSampler> = Vec::new();
        if let Some(rp) = self.params.repeat_penalty {
            samplers.push(LlamaSampler::penalties(64, rp, 0.0, 0.0));
        }
        samplers.push(LlamaSampler::temp(self.params.temperature));
        if let Some(k) = self.params.top_k {
            samplers.push(LlamaSampler::top_k(k as i32));
        }
        samplers.push(LlamaSampler::top_p(self.params.top_p, 1));
        samplers.push(if self.params.temperature <= 0.0 {
            LlamaSampler::greedy()
        } else {
            LlamaSampler::dist(self.seed)
        });
        let mut sampler = LlamaSampler::chain_simple(samplers);
        sampler.accept_many(&prompt_tokens);

        let stop = self.params.stop.clone();
        let mut decoder = UTF_8.new_decoder();
        let mut out = String::new();

        let mut batch = LlamaBatch::new(512, 1);
        let mut n_cur: i32 = prompt_tokens.len() as i32;
        'gen: for _ in 0..max_tokens {
            let token = sampler.sample(self.ctx_ref(), -1);

            if self.model_ref().is_eog_token(token) {
                break;
            }

            let bytes = self
                .model_ref()
                .token_to_bytes(token, Special::Tokenize)
                .context("token_to_bytes")?;
            let mut piece = String::with_capacity(32);
            let _ = decoder.decode_to_string(&bytes, &mut piece, false);
            out.push_str(&piece);

            // Stop sequences apply to the generated text only, never to the
            // echoed prompt.
            for s in &stop {
                if let Some(idx) = out.find(s.as_str()) {
                    out.truncate(idx);
                    break 'gen;
                }
            }

            batch.clear();
            batch
                .add(token, n_cur, &[0], true)
                .context("batch.add(gen)")?;
            n_cur += 1;
            self.decode_checked(&mut batch, "decode(gen)")?;
        }

        // Flush decoder state.
        let mut tail = String::new();
        let _ = decoder.decode_to_string(&[], &mut tail, true);
        out.push_str(&tail);

        Ok(out)
    }

    fn decode_checked(&mut self, batch: &mut LlamaBatch, stage: &str) -> anyhow::Result<()> {
        self.ctx_mut().decode(batch).map_err(|err| match err {
            DecodeError::Unknown(-2) => anyhow!(
                "llama_decode threw a foreign exception (likely OOM) (model={}, stage={})",
                self.model_path.display(),
                stage
            ),
            other => anyhow!(other),
        })?;
        Ok(())
    }

    fn model_ref(&self) -> &LlamaModel {
        self.ctx_ref().model
    }

    fn ctx_ref(&self) -> &LlamaContext<'static> {
        self.ctx
            .as_ref()
            .expect("NativeCompletionModel ctx missing (use-after-drop)")
    }

    fn ctx_mut(&mut self) -> &mut LlamaContext<'static> {
        self.ctx
            .as_mut()
            .expect("NativeCompletionModel ctx missing (use-after-drop)")
    }
}

impl Drop for NativeCompletionModel {
    fn drop(&mut self) {
        // `LlamaContext` holds a reference to `LlamaModel`.
        // Drop the context first, then the model; the backend field goes last.
        let _ = self.ctx.take();
        let _ = self.model.take();
    }
}
