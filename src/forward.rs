//! Decoder-only transformer forward pass for next-token scoring
//!
//! One implementation covers the Qwen2 and LLaMA families. They differ only
//! in whether the Q/K/V projections carry a bias, in a few config defaults,
//! and in whether the LM head is tied to the token embeddings.
//!
//! The audit projects only the last position onto the vocabulary; sentence
//! scoring projects every position.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_nn::{embedding, linear_b, linear_no_bias, Embedding, Linear, RmsNorm, VarBuilder};
use hf_hub::api::sync::ApiRepo;
use tracing::info;

use crate::masks::create_causal_mask;
use crate::model::ModelArchitecture;

/// Subset of a HuggingFace `config.json` the forward pass needs
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DecoderConfig {
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_attention_heads: usize,
    #[serde(default)]
    pub num_key_value_heads: Option<usize>,
    pub num_hidden_layers: usize,
    pub vocab_size: usize,
    #[serde(default)]
    pub rope_theta: Option<f64>,
    #[serde(default)]
    pub rms_norm_eps: Option<f64>,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    #[serde(default)]
    pub tie_word_embeddings: Option<bool>,
    #[serde(default)]
    pub attention_bias: Option<bool>,
}

fn default_max_position_embeddings() -> usize {
    32768
}

impl DecoderConfig {
    fn kv_heads(&self) -> usize {
        self.num_key_value_heads.unwrap_or(self.num_attention_heads)
    }

    fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }
}

/// Config values after filling architecture defaults
#[derive(Debug, Clone, Copy)]
struct Resolved {
    rope_theta: f64,
    rms_norm_eps: f64,
    tie_word_embeddings: bool,
    qkv_bias: bool,
}

impl Resolved {
    fn new(config: &DecoderConfig, architecture: ModelArchitecture) -> Self {
        match architecture {
            ModelArchitecture::Qwen2 => Self {
                rope_theta: config.rope_theta.unwrap_or(1_000_000.0),
                rms_norm_eps: config.rms_norm_eps.unwrap_or(1e-6),
                tie_word_embeddings: config.tie_word_embeddings.unwrap_or(true),
                qkv_bias: config.attention_bias.unwrap_or(true),
            },
            ModelArchitecture::Llama => Self {
                rope_theta: config.rope_theta.unwrap_or(10_000.0),
                rms_norm_eps: config.rms_norm_eps.unwrap_or(1e-5),
                tie_word_embeddings: config.tie_word_embeddings.unwrap_or(false),
                qkv_bias: config.attention_bias.unwrap_or(false),
            },
        }
    }
}

/// Rotary position embeddings, half-split (non-interleaved) layout
struct RotaryEmbedding {
    cos: Tensor,
    sin: Tensor,
}

impl RotaryEmbedding {
    fn new(
        dim: usize,
        max_seq_len: usize,
        theta: f64,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let inv_freq: Vec<f32> = (0..dim)
            .step_by(2)
            .map(|i| (1.0 / theta.powf(i as f64 / dim as f64)) as f32)
            .collect();
        let inv_freq = Tensor::new(inv_freq, device)?;
        let positions: Vec<f32> = (0..max_seq_len).map(|i| i as f32).collect();
        let positions = Tensor::new(positions, device)?;

        // [seq_len, dim/2], computed in f32 so long positions keep precision
        let freqs = positions.unsqueeze(1)?.matmul(&inv_freq.unsqueeze(0)?)?;
        Ok(Self {
            cos: freqs.cos()?.to_dtype(dtype)?,
            sin: freqs.sin()?.to_dtype(dtype)?,
        })
    }

    fn apply(&self, q: &Tensor, k: &Tensor) -> Result<(Tensor, Tensor)> {
        let seq_len = q.dim(2)?;
        let cos = self.cos.i(..seq_len)?;
        let sin = self.sin.i(..seq_len)?;
        let q = candle_nn::rotary_emb::rope(&q.contiguous()?, &cos, &sin)?;
        let k = candle_nn::rotary_emb::rope(&k.contiguous()?, &cos, &sin)?;
        Ok((q, k))
    }
}

fn repeat_kv(x: Tensor, n_rep: usize) -> Result<Tensor> {
    if n_rep == 1 {
        return Ok(x);
    }
    let (b, num_kv_heads, seq_len, head_dim) = x.dims4()?;
    let x = x.unsqueeze(2)?;
    let x = x.expand((b, num_kv_heads, n_rep, seq_len, head_dim))?;
    Ok(x.reshape((b, num_kv_heads * n_rep, seq_len, head_dim))?)
}

/// Grouped-query self-attention
struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
}

impl Attention {
    fn load(vb: VarBuilder, config: &DecoderConfig, qkv_bias: bool) -> Result<Self> {
        let head_dim = config.head_dim();
        let kv_dim = config.kv_heads() * head_dim;
        let q_proj = linear_b(
            config.hidden_size,
            config.num_attention_heads * head_dim,
            qkv_bias,
            vb.pp("q_proj"),
        )?;
        let k_proj = linear_b(config.hidden_size, kv_dim, qkv_bias, vb.pp("k_proj"))?;
        let v_proj = linear_b(config.hidden_size, kv_dim, qkv_bias, vb.pp("v_proj"))?;
        let o_proj = linear_no_bias(
            config.num_attention_heads * head_dim,
            config.hidden_size,
            vb.pp("o_proj"),
        )?;

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            num_heads: config.num_attention_heads,
            num_kv_heads: config.kv_heads(),
            head_dim,
        })
    }

    fn forward(&self, x: &Tensor, rotary: &RotaryEmbedding) -> Result<Tensor> {
        let (b, seq_len, _) = x.dims3()?;

        let q = self
            .q_proj
            .forward(x)?
            .reshape((b, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;
        let k = self
            .k_proj
            .forward(x)?
            .reshape((b, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?;
        let v = self
            .v_proj
            .forward(x)?
            .reshape((b, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?;

        let (q, k) = rotary.apply(&q, &k)?;

        let n_rep = self.num_heads / self.num_kv_heads;
        let k = repeat_kv(k, n_rep)?.contiguous()?;
        let v = repeat_kv(v, n_rep)?.contiguous()?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?)? * scale)?;
        let mask = create_causal_mask(seq_len, x.device(), x.dtype())?;
        let scores = scores.broadcast_add(&mask)?;

        let weights = candle_nn::ops::softmax_last_dim(&scores)?;
        let out = weights.matmul(&v)?;
        let out = out.transpose(1, 2)?.reshape((b, seq_len, ()))?;
        Ok(self.o_proj.forward(&out)?)
    }
}

/// SwiGLU feed-forward block
struct Mlp {
    gate_proj: Linear,
    up_proj: Linear,
    down_proj: Linear,
}

impl Mlp {
    fn load(vb: VarBuilder, config: &DecoderConfig) -> Result<Self> {
        Ok(Self {
            gate_proj: linear_no_bias(
                config.hidden_size,
                config.intermediate_size,
                vb.pp("gate_proj"),
            )?,
            up_proj: linear_no_bias(
                config.hidden_size,
                config.intermediate_size,
                vb.pp("up_proj"),
            )?,
            down_proj: linear_no_bias(
                config.intermediate_size,
                config.hidden_size,
                vb.pp("down_proj"),
            )?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let gate = candle_nn::ops::silu(&self.gate_proj.forward(x)?)?;
        let up = self.up_proj.forward(x)?;
        Ok(self.down_proj.forward(&(gate * up)?)?)
    }
}

/// Pre-norm decoder layer
struct DecoderLayer {
    self_attn: Attention,
    mlp: Mlp,
    input_layernorm: RmsNorm,
    post_attention_layernorm: RmsNorm,
}

impl DecoderLayer {
    fn load(vb: VarBuilder, config: &DecoderConfig, resolved: Resolved) -> Result<Self> {
        Ok(Self {
            self_attn: Attention::load(vb.pp("self_attn"), config, resolved.qkv_bias)?,
            mlp: Mlp::load(vb.pp("mlp"), config)?,
            input_layernorm: candle_nn::rms_norm(
                config.hidden_size,
                resolved.rms_norm_eps,
                vb.pp("input_layernorm"),
            )?,
            post_attention_layernorm: candle_nn::rms_norm(
                config.hidden_size,
                resolved.rms_norm_eps,
                vb.pp("post_attention_layernorm"),
            )?,
        })
    }

    fn forward(&self, x: &Tensor, rotary: &RotaryEmbedding) -> Result<Tensor> {
        let residual = x;
        let h = self.input_layernorm.forward(x)?;
        let h = self.self_attn.forward(&h, rotary)?;
        let x = (residual + h)?;

        let residual = &x;
        let h = self.post_attention_layernorm.forward(&x)?;
        let h = self.mlp.forward(&h)?;
        Ok((residual + h)?)
    }
}

/// Safetensors index for sharded checkpoints
#[derive(Debug, serde::Deserialize)]
struct SafetensorsIndex {
    weight_map: HashMap<String, String>,
}

/// Resolve the weight files of a repository, sharded or single-file
pub fn weight_files(repo: &ApiRepo) -> Result<Vec<PathBuf>> {
    if let Ok(index_path) = repo.get("model.safetensors.index.json") {
        let index_str = std::fs::read_to_string(&index_path).context("Failed to read index")?;
        let index: SafetensorsIndex = serde_json::from_str(&index_str)?;

        let mut shard_names: Vec<String> = index.weight_map.values().cloned().collect();
        shard_names.sort();
        shard_names.dedup();

        info!("Downloading {} shard files...", shard_names.len());
        shard_names
            .iter()
            .map(|name| {
                repo.get(name)
                    .with_context(|| format!("Failed to download {name}"))
            })
            .collect()
    } else {
        let path = repo
            .get("model.safetensors")
            .context("Failed to download model.safetensors")?;
        Ok(vec![path])
    }
}

/// Decoder-only transformer returning last-position logits
pub struct DecoderTransformer {
    embed_tokens: Embedding,
    layers: Vec<DecoderLayer>,
    norm: RmsNorm,
    /// Separate head when embeddings are untied; otherwise logits use embed_tokens^T
    lm_head: Option<Linear>,
    rotary: RotaryEmbedding,
    vocab_size: usize,
}

impl DecoderTransformer {
    /// Build from a var builder rooted at the checkpoint top level
    pub fn new(
        config: &DecoderConfig,
        architecture: ModelArchitecture,
        vb: VarBuilder,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let resolved = Resolved::new(config, architecture);
        let vb_model = vb.pp("model");

        let embed_tokens = embedding(
            config.vocab_size,
            config.hidden_size,
            vb_model.pp("embed_tokens"),
        )?;

        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for i in 0..config.num_hidden_layers {
            if (i + 1) % 10 == 0 || i == 0 {
                info!("Loading layer {}/{}", i + 1, config.num_hidden_layers);
            }
            layers.push(DecoderLayer::load(
                vb_model.pp(format!("layers.{i}")),
                config,
                resolved,
            )?);
        }

        let norm = candle_nn::rms_norm(
            config.hidden_size,
            resolved.rms_norm_eps,
            vb_model.pp("norm"),
        )?;

        let lm_head = if resolved.tie_word_embeddings {
            None
        } else {
            Some(linear_no_bias(
                config.hidden_size,
                config.vocab_size,
                vb.pp("lm_head"),
            )?)
        };

        let rotary = RotaryEmbedding::new(
            config.head_dim(),
            config.max_position_embeddings,
            resolved.rope_theta,
            device,
            dtype,
        )?;

        Ok(Self {
            embed_tokens,
            layers,
            norm,
            lm_head,
            rotary,
            vocab_size: config.vocab_size,
        })
    }

    /// Download config and weights from the hub and build the model
    pub fn load(
        repo: &ApiRepo,
        architecture: ModelArchitecture,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let config_path = repo
            .get("config.json")
            .context("Failed to download config.json")?;
        let config_str = std::fs::read_to_string(&config_path).context("Failed to read config")?;
        let config: DecoderConfig = serde_json::from_str(&config_str)?;
        info!(
            "Model config: {} layers, {} hidden, {} vocab",
            config.num_hidden_layers, config.hidden_size, config.vocab_size
        );

        let weights_paths = weight_files(repo)?;
        info!("Loading weights from {} file(s)...", weights_paths.len());
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&weights_paths, dtype, device)? };

        Self::new(&config, architecture, vb, device, dtype)
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    /// Final-norm hidden states, shape `[batch, seq, hidden]`
    fn hidden_states(&self, input_ids: &Tensor) -> Result<Tensor> {
        let mut hidden = self.embed_tokens.forward(input_ids)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, &self.rotary)?;
        }
        Ok(self.norm.forward(&hidden)?)
    }

    fn project(&self, hidden: &Tensor) -> Result<Tensor> {
        let logits = match &self.lm_head {
            Some(head) => head.forward(hidden)?,
            None => hidden.broadcast_matmul(&self.embed_tokens.embeddings().t()?)?,
        };
        Ok(logits)
    }

    /// Logits for the token after the last input position, shape `[batch, vocab]`
    pub fn forward(&self, input_ids: &Tensor) -> Result<Tensor> {
        let hidden = self.hidden_states(input_ids)?;
        let seq_len = hidden.dim(1)?;
        self.project(&hidden.i((.., seq_len - 1, ..))?)
    }

    /// Logits at every position, shape `[batch, seq, vocab]`.
    ///
    /// Row `i` is the distribution over the token following input `i`.
    pub fn forward_all(&self, input_ids: &Tensor) -> Result<Tensor> {
        let hidden = self.hidden_states(input_ids)?;
        self.project(&hidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> DecoderConfig {
        serde_json::from_str(
            r#"{
                "hidden_size": 8,
                "intermediate_size": 16,
                "num_attention_heads": 2,
                "num_key_value_heads": 1,
                "num_hidden_layers": 2,
                "vocab_size": 11,
                "max_position_embeddings": 64
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_config_defaults_by_architecture() {
        let config = tiny_config();
        let qwen = Resolved::new(&config, ModelArchitecture::Qwen2);
        assert!(qwen.qkv_bias && qwen.tie_word_embeddings);
        assert_eq!(qwen.rms_norm_eps, 1e-6);

        let llama = Resolved::new(&config, ModelArchitecture::Llama);
        assert!(!llama.qkv_bias && !llama.tie_word_embeddings);
        assert_eq!(llama.rms_norm_eps, 1e-5);
    }

    #[test]
    fn test_forward_shapes_with_zero_weights() {
        let config = tiny_config();
        let device = Device::Cpu;
        for arch in [ModelArchitecture::Qwen2, ModelArchitecture::Llama] {
            let vb = VarBuilder::zeros(DType::F32, &device);
            let model = DecoderTransformer::new(&config, arch, vb, &device, DType::F32).unwrap();
            assert_eq!(model.n_layers(), 2);

            let ids = Tensor::new(&[1u32, 4, 7][..], &device)
                .unwrap()
                .unsqueeze(0)
                .unwrap();
            let logits = model.forward(&ids).unwrap();
            assert_eq!(logits.dims(), &[1, 11]);
            let values: Vec<f32> = logits.squeeze(0).unwrap().to_vec1().unwrap();
            assert!(values.iter().all(|v| v.is_finite()));

            let all = model.forward_all(&ids).unwrap();
            assert_eq!(all.dims(), &[1, 3, 11]);
            let last: Vec<f32> = all.i((0, 2)).unwrap().to_vec1().unwrap();
            assert_eq!(last, values);
        }
    }

    #[test]
    fn test_repeat_kv() {
        let x = Tensor::zeros((1, 2, 3, 4), DType::F32, &Device::Cpu).unwrap();
        let y = repeat_kv(x, 3).unwrap();
        assert_eq!(y.dims(), &[1, 6, 3, 4]);
    }
}
