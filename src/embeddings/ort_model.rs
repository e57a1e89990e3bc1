// ONNX Runtime embedding model.
//
// One session per loaded model, with the platform's best execution provider:
// CUDA on Linux, DirectML on Windows, optimized CPU on macOS (CoreML's
// transformer coverage is too thin to beat it). MILLER_FORCE_CPU=1 skips GPU
// registration entirely.

use anyhow::{Context, Result};
use ndarray::{Array2, Axis};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use std::path::Path;
use tokenizers::Tokenizer;
use tracing::{debug, info};

/// Which device the session ended up on; drives batch sizing and the
/// gpu_memory status report. macOS runs on optimized CPU (CoreML covers too
/// few transformer ops to win), so there is no Metal kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Cuda,
    DirectMl,
    Cpu,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Cuda => "cuda",
            DeviceKind::DirectMl => "directml",
            DeviceKind::Cpu => "cpu",
        }
    }

    /// Batch size derived from what the device class can typically hold.
    pub fn default_batch_size(&self) -> usize {
        match self {
            DeviceKind::Cuda => 64,
            DeviceKind::DirectMl => 32,
            DeviceKind::Cpu => 16,
        }
    }
}

pub struct OrtEmbeddingModel {
    session: Session,
    tokenizer: Tokenizer,
    dimensions: usize,
    model_name: String,
    device: DeviceKind,
}

impl OrtEmbeddingModel {
    pub fn new(
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
        model_name: &str,
    ) -> Result<Self> {
        let mut tokenizer = Tokenizer::from_file(tokenizer_path.as_ref()).map_err(|e| {
            anyhow::anyhow!(
                "failed to load tokenizer from {:?}: {e}",
                tokenizer_path.as_ref()
            )
        })?;

        use tokenizers::{
            PaddingDirection, PaddingParams, PaddingStrategy, TruncationParams, TruncationStrategy,
        };
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            direction: PaddingDirection::Right,
            pad_id: 0,
            pad_type_id: 0,
            pad_token: "[PAD]".to_string(),
            pad_to_multiple_of: None,
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: 512,
                strategy: TruncationStrategy::LongestFirst,
                stride: 0,
                direction: tokenizers::TruncationDirection::Right,
            }))
            .map_err(|e| anyhow::anyhow!("failed to configure truncation: {e}"))?;

        let (session, device) = Self::create_session(model_path.as_ref())
            .context("failed to create ONNX Runtime session")?;

        info!(
            model = model_name,
            device = device.as_str(),
            "embedding model loaded"
        );

        Ok(Self {
            session,
            tokenizer,
            dimensions: 384, // BGE-Small-EN-V1.5
            model_name: model_name.to_string(),
            device,
        })
    }

    fn force_cpu() -> bool {
        std::env::var("MILLER_FORCE_CPU")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    #[allow(unused_mut)]
    fn create_session(model_path: &Path) -> Result<(Session, DeviceKind)> {
        let force_cpu = Self::force_cpu();
        let mut builder = Session::builder()
            .context("failed to create SessionBuilder")?
            .with_optimization_level(GraphOptimizationLevel::Level3)?;

        let mut device = DeviceKind::Cpu;

        #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
        {
            if !force_cpu {
                use ort::execution_providers::CUDAExecutionProvider;
                builder = builder
                    .with_execution_providers([CUDAExecutionProvider::default().build()])?;
                device = DeviceKind::Cuda;
                debug!("CUDA execution provider registered");
            }
        }

        #[cfg(target_os = "windows")]
        {
            if !force_cpu {
                use ort::execution_providers::DirectMLExecutionProvider;
                builder = builder
                    .with_execution_providers([DirectMLExecutionProvider::default().build()])?;
                device = DeviceKind::DirectMl;
                debug!("DirectML execution provider registered");
            }
        }

        #[cfg(target_os = "macos")]
        {
            // CoreML runs only a fraction of BERT ops on the Neural Engine and
            // pays dispatch overhead for the rest; plain CPU wins.
            let _ = force_cpu;
            debug!("macOS: using optimized CPU execution");
        }

        let session = builder
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load ONNX model from {model_path:?}"))?;
        Ok((session, device))
    }

    /// Encode a batch of texts into L2-normalized embeddings.
    pub fn encode_batch(&mut self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts, true)
            .map_err(|e| anyhow::anyhow!("failed to tokenize inputs: {e}"))?;

        let batch_size = encodings.len();
        let seq_length = encodings[0].len();

        let mut input_ids = Vec::with_capacity(batch_size * seq_length);
        let mut attention_mask = Vec::with_capacity(batch_size * seq_length);
        let mut token_type_ids = Vec::with_capacity(batch_size * seq_length);
        for encoding in &encodings {
            input_ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
            attention_mask.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
            token_type_ids.extend(encoding.get_type_ids().iter().map(|&t| t as i64));
        }

        let input_ids = Array2::from_shape_vec((batch_size, seq_length), input_ids)
            .context("failed to shape input_ids")?;
        let attention_mask = Array2::from_shape_vec((batch_size, seq_length), attention_mask)
            .context("failed to shape attention_mask")?;
        let token_type_ids = Array2::from_shape_vec((batch_size, seq_length), token_type_ids)
            .context("failed to shape token_type_ids")?;

        let outputs = self
            .session
            .run(ort::inputs![
                "input_ids" => Tensor::from_array(input_ids)?,
                "attention_mask" => Tensor::from_array(attention_mask)?,
                "token_type_ids" => Tensor::from_array(token_type_ids)?,
            ])
            .map_err(|e| anyhow::anyhow!("ONNX inference failed: {e}"))?;

        // BGE models use the CLS token as the sentence representation
        let hidden = outputs["last_hidden_state"]
            .try_extract_array::<f32>()
            .context("failed to extract output tensor")?;

        let mut embeddings = Vec::with_capacity(batch_size);
        for i in 0..batch_size {
            let mut cls: Vec<f32> = hidden
                .index_axis(Axis(0), i)
                .index_axis(Axis(0), 0)
                .to_owned()
                .into_raw_vec_and_offset()
                .0;
            let magnitude: f32 = cls.iter().map(|x| x * x).sum::<f32>().sqrt();
            if magnitude > 0.0 {
                for value in &mut cls {
                    *value /= magnitude;
                }
            }
            embeddings.push(cls);
        }
        Ok(embeddings)
    }

    pub fn encode_single(&mut self, text: String) -> Result<Vec<f32>> {
        self.encode_batch(vec![text])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("no embedding returned"))
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn device(&self) -> DeviceKind {
        self.device
    }
}
