//! AuditModel: a pretrained causal LM behind the `NextTokenModel` seam
//!
//! Loads tokenizer and weights from the HuggingFace hub and exposes two
//! operations: next-token logits after a context string, and per-position
//! logits over a whole text for sentence metrics.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use hf_hub::{api::sync::Api, Repo, RepoType};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::audit::{NextTokenLogits, NextTokenModel};
use crate::classifier::TokenDecoder;
use crate::forward::DecoderTransformer;
use crate::metrics::{SequenceLogits, SequenceModel};

/// Supported model architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelArchitecture {
    /// Qwen2 / Qwen2.5 (Alibaba)
    Qwen2,
    /// LLaMA family (Meta), also TinyLlama and similar
    Llama,
}

impl ModelArchitecture {
    /// Detect architecture from model ID
    pub fn from_model_id(model_id: &str) -> Self {
        let model_lower = model_id.to_lowercase();
        if model_lower.contains("qwen") {
            ModelArchitecture::Qwen2
        } else if model_lower.contains("llama") {
            ModelArchitecture::Llama
        } else {
            info!(
                "Unknown model architecture for '{}', defaulting to Qwen2",
                model_id
            );
            ModelArchitecture::Qwen2
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelArchitecture::Qwen2 => "qwen2",
            ModelArchitecture::Llama => "llama",
        }
    }
}

/// Pretrained model plus tokenizer, ready for next-token scoring
pub struct AuditModel {
    model: DecoderTransformer,
    tokenizer: Tokenizer,
    device: Device,
    architecture: ModelArchitecture,
    model_id: String,
}

impl AuditModel {
    /// Load with automatic device selection
    pub fn from_pretrained(model_id: &str) -> Result<Self> {
        Self::from_pretrained_with_device(model_id, false)
    }

    /// Load, optionally forcing CPU even when CUDA is present
    pub fn from_pretrained_with_device(model_id: &str, force_cpu: bool) -> Result<Self> {
        let architecture = ModelArchitecture::from_model_id(model_id);
        let (device, dtype) = if force_cpu {
            info!("Forcing CPU mode");
            (Device::Cpu, DType::F32)
        } else {
            match Device::cuda_if_available(0) {
                Ok(dev) if dev.is_cuda() => {
                    info!("Using CUDA device");
                    (dev, DType::BF16)
                }
                _ => {
                    info!("CUDA not available, using CPU");
                    (Device::Cpu, DType::F32)
                }
            }
        };

        info!("Loading model: {}", model_id);
        info!("Architecture: {:?}", architecture);
        info!("Device: {:?}", device);
        info!("Dtype: {:?}", dtype);

        let api = Api::new()?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));
        let tokenizer_path = repo
            .get("tokenizer.json")
            .context("Failed to download tokenizer.json")?;
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Tokenizer error: {e}"))?;

        let model = DecoderTransformer::load(&repo, architecture, &device, dtype)?;
        info!(
            "Loaded {} layers, vocab {}",
            model.n_layers(),
            model.vocab_size()
        );

        Ok(Self {
            model,
            tokenizer,
            device,
            architecture,
            model_id: model_id.to_string(),
        })
    }

    pub fn architecture(&self) -> ModelArchitecture {
        self.architecture
    }

    /// Token ids of `text`, without special tokens
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Tokenization error: {e}"))?;
        Ok(encoding.get_ids().to_vec())
    }
}

impl NextTokenModel for AuditModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn architecture_label(&self) -> Option<String> {
        Some(self.architecture().as_str().to_string())
    }

    fn decoder(&self) -> &dyn TokenDecoder {
        &self.tokenizer
    }

    fn predict_next(&self, context: &str) -> Result<NextTokenLogits> {
        let ids = self.encode(context)?;
        if ids.is_empty() {
            anyhow::bail!("Context {context:?} encodes to zero tokens");
        }
        let token_count = ids.len();
        debug!("Scoring {} tokens", token_count);

        let input = Tensor::new(ids.as_slice(), &self.device)?.unsqueeze(0)?;
        let logits = self.model.forward(&input)?;
        let logits: Vec<f32> = logits.squeeze(0)?.to_dtype(DType::F32)?.to_vec1()?;

        Ok(NextTokenLogits {
            logits,
            token_count,
        })
    }
}

impl SequenceModel for AuditModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn score_sequence(&self, text: &str) -> Result<SequenceLogits> {
        let encoding = self
            .tokenizer
            .encode_char_offsets(text, false)
            .map_err(|e| anyhow::anyhow!("Tokenization error: {e}"))?;
        let ids = encoding.get_ids().to_vec();
        if ids.is_empty() {
            anyhow::bail!("Text {text:?} encodes to zero tokens");
        }
        debug!("Scoring all {} positions", ids.len());

        let input = Tensor::new(ids.as_slice(), &self.device)?.unsqueeze(0)?;
        let logits = self.model.forward_all(&input)?;
        let logits: Vec<Vec<f32>> = logits.squeeze(0)?.to_dtype(DType::F32)?.to_vec2()?;

        Ok(SequenceLogits {
            ids,
            offsets: encoding.get_offsets().to_vec(),
            logits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_architecture_detection() {
        assert_eq!(
            ModelArchitecture::from_model_id("Qwen/Qwen2.5-0.5B"),
            ModelArchitecture::Qwen2
        );
        assert_eq!(
            ModelArchitecture::from_model_id("TinyLlama/TinyLlama-1.1B-Chat-v1.0"),
            ModelArchitecture::Llama
        );
        assert_eq!(
            ModelArchitecture::from_model_id("meta-llama/Llama-3.2-1B"),
            ModelArchitecture::Llama
        );
        assert_eq!(
            ModelArchitecture::from_model_id("someone/mystery-model"),
            ModelArchitecture::Qwen2
        );
        assert_eq!(ModelArchitecture::Llama.as_str(), "llama");
    }
}
