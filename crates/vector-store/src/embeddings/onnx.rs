use super::{normalize, EmbeddingProvider};
use crate::config::EmbeddingConfig;
use crate::error::{Result, VectorStoreError};
use ndarray::{Array, ArrayD, ArrayView2, Axis, Dimension, Ix2, Ix3, IxDyn};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider, ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Input, Session, SessionInputs};
use ort::tensor::TensorElementType;
use ort::value::{DynTensor, Tensor};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tokenizers::{Encoding, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

const MANIFEST_FILE_NAME: &str = "manifest.json";
const MANIFEST_SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
struct ModelSpec {
    id: String,
    onnx_rel_path: PathBuf,
    tokenizer_rel_path: PathBuf,
    dimension: usize,
    max_length: usize,
    max_batch: usize,
}

impl ModelSpec {
    /// Built-in spec used when no manifest exists.
    fn builtin(id: &str) -> Option<Self> {
        let (dimension, max_length) = match id {
            "all-minilm-l6-v2" => (384, 256),
            "bge-small" => (384, 512),
            _ => return None,
        };
        Some(Self {
            id: id.to_string(),
            onnx_rel_path: PathBuf::from("model.onnx"),
            tokenizer_rel_path: PathBuf::from("tokenizer.json"),
            dimension,
            max_length,
            max_batch: 32,
        })
    }

    fn model_path(&self, model_dir: &Path) -> PathBuf {
        model_dir.join(&self.id).join(&self.onnx_rel_path)
    }

    fn tokenizer_path(&self, model_dir: &Path) -> PathBuf {
        model_dir.join(&self.id).join(&self.tokenizer_rel_path)
    }
}

#[derive(Debug, Deserialize)]
struct ModelsManifest {
    schema_version: u32,
    models: Vec<ManifestModel>,
}

#[derive(Debug, Deserialize)]
struct ManifestModel {
    id: String,
    dimension: usize,
    max_length: usize,
    max_batch: usize,
    #[serde(default)]
    assets: Vec<ManifestAsset>,
}

#[derive(Debug, Deserialize)]
struct ManifestAsset {
    path: String,
}

fn normalize_model_id(raw: &str) -> String {
    let id = raw.trim().to_ascii_lowercase();
    match id.as_str() {
        "sentence-transformers/all-minilm-l6-v2" | "all-minilm-l6" => {
            "all-minilm-l6-v2".to_string()
        }
        "bge-small-en-v1.5" => "bge-small".to_string(),
        _ => id,
    }
}

fn resolve_spec(model_dir: &Path, raw_id: &str) -> Result<ModelSpec> {
    let wanted = normalize_model_id(raw_id);
    let manifest_path = model_dir.join(MANIFEST_FILE_NAME);
    if !manifest_path.exists() {
        return ModelSpec::builtin(&wanted).ok_or_else(|| {
            VectorStoreError::Config(format!(
                "Unknown embedding model id '{wanted}' and no models manifest found at {}",
                manifest_path.display()
            ))
        });
    }

    let raw = std::fs::read_to_string(&manifest_path).map_err(|e| {
        VectorStoreError::Config(format!(
            "Failed to read models manifest {}: {e}",
            manifest_path.display()
        ))
    })?;
    let manifest: ModelsManifest = serde_json::from_str(&raw).map_err(|e| {
        VectorStoreError::Config(format!(
            "Invalid models manifest {}: {e}",
            manifest_path.display()
        ))
    })?;
    if manifest.schema_version != MANIFEST_SCHEMA_VERSION {
        return Err(VectorStoreError::Config(format!(
            "Unsupported models manifest schema_version {} (expected {MANIFEST_SCHEMA_VERSION})",
            manifest.schema_version
        )));
    }

    let model = manifest
        .models
        .iter()
        .find(|m| m.id.eq_ignore_ascii_case(&wanted))
        .ok_or_else(|| {
            let available = manifest
                .models
                .iter()
                .map(|m| m.id.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            VectorStoreError::Config(format!(
                "Unknown embedding model id '{wanted}'. Available: {available}"
            ))
        })?;

    let mut onnx_rel_path = None;
    let mut tokenizer_rel_path = None;
    for asset in &model.assets {
        let rel = safe_rel_path(&model.id, &asset.path)?;
        if onnx_rel_path.is_none()
            && rel
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"))
        {
            onnx_rel_path = Some(rel.clone());
        }
        if tokenizer_rel_path.is_none()
            && rel
                .file_name()
                .is_some_and(|name| name.eq_ignore_ascii_case("tokenizer.json"))
        {
            tokenizer_rel_path = Some(rel);
        }
    }

    Ok(ModelSpec {
        id: model.id.to_ascii_lowercase(),
        onnx_rel_path: onnx_rel_path.unwrap_or_else(|| PathBuf::from("model.onnx")),
        tokenizer_rel_path: tokenizer_rel_path.unwrap_or_else(|| PathBuf::from("tokenizer.json")),
        dimension: model.dimension,
        max_length: model.max_length,
        max_batch: model.max_batch.max(1),
    })
}

/// Asset paths are relative to the model's own directory and may not escape it.
fn safe_rel_path(model_id: &str, rel: &str) -> Result<PathBuf> {
    let path = Path::new(rel);
    let mut has_component = false;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::ParentDir => {
                return Err(VectorStoreError::Config(format!(
                    "Invalid models manifest asset path for model '{model_id}': '{rel}'"
                )));
            }
            Component::CurDir => {}
            Component::Normal(_) => has_component = true,
        }
    }
    if !has_component {
        return Err(VectorStoreError::Config(format!(
            "Empty models manifest asset path for model '{model_id}'"
        )));
    }
    Ok(path.to_path_buf())
}

/// Sentence embedding model running on ONNX Runtime.
///
/// Output vectors are mean-pooled over the attention mask and L2-normalized.
pub struct OnnxEmbedder {
    model_id: String,
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    max_length: usize,
    max_batch: usize,
    dimension: usize,
}

impl OnnxEmbedder {
    pub fn load(config: &EmbeddingConfig) -> Result<Self> {
        let spec = resolve_spec(&config.model_dir, &config.model_id)?;
        let model_path = spec.model_path(&config.model_dir);
        let tokenizer_path = spec.tokenizer_path(&config.model_dir);
        if !model_path.exists() || !tokenizer_path.exists() {
            return Err(VectorStoreError::provider(format!(
                "Model files for '{}' are missing. Expected ONNX at {} and tokenizer at {} (set RAG_MODEL_DIR).",
                spec.id,
                model_path.display(),
                tokenizer_path.display(),
            )));
        }

        if !tokenizers::utils::parallelism::is_parallelism_configured() {
            tokenizers::utils::parallelism::set_parallelism(false);
        }
        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| VectorStoreError::provider(format!("Tokenizer load failed: {e}")))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..PaddingParams::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: spec.max_length,
                ..TruncationParams::default()
            }))
            .map_err(|e| VectorStoreError::provider(format!("Tokenizer truncation failed: {e}")))?;

        let session = Session::builder()
            .map_err(ort_error)?
            .with_intra_threads(default_intra_threads())
            .map_err(ort_error)?
            .with_intra_op_spinning(false)
            .map_err(ort_error)?
            .with_execution_providers(execution_providers(config.use_cuda))
            .map_err(ort_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort_error)?
            .commit_from_file(&model_path)
            .map_err(|e| VectorStoreError::provider(format!("Failed to load ONNX model: {e}")))?;

        log::info!(
            "Loaded ONNX model '{}' (dim {}, max_length {}, batch {})",
            spec.id,
            spec.dimension,
            spec.max_length,
            spec.max_batch
        );

        Ok(Self {
            model_id: spec.id,
            session: Mutex::new(session),
            tokenizer,
            max_length: spec.max_length,
            max_batch: spec.max_batch,
            dimension: spec.dimension,
        })
    }

    fn run_batch(&self, batch: &[&str]) -> Result<Vec<Vec<f32>>> {
        let inputs: Vec<String> = batch.iter().map(|s| (*s).to_string()).collect();
        let encodings = self
            .tokenizer
            .encode_batch(inputs, true)
            .map_err(|e| VectorStoreError::provider(format!("Tokenization failed: {e}")))?;
        if encodings.is_empty() {
            return Ok(vec![]);
        }

        let seq_len = encodings[0].len();
        if seq_len > self.max_length || encodings.iter().any(|e| e.len() != seq_len) {
            return Err(VectorStoreError::provider(format!(
                "Inconsistent tokenized batch (seq_len {seq_len}, max_length {})",
                self.max_length
            )));
        }
        let (ids, masks, type_ids, mask_rows) = build_flat_tensors(&encodings, seq_len);

        let shape = (batch.len(), seq_len);
        let ids_array = Array::from_shape_vec(shape, ids)
            .map_err(|e| VectorStoreError::provider(format!("IDs shape error: {e}")))?;
        let mask_array = Array::from_shape_vec(shape, masks)
            .map_err(|e| VectorStoreError::provider(format!("Mask shape error: {e}")))?;
        let type_array = Array::from_shape_vec(shape, type_ids)
            .map_err(|e| VectorStoreError::provider(format!("Types shape error: {e}")))?;
        let ids_shape = ids_array.raw_dim().into_dyn();

        let mut available: HashMap<&str, DynTensor> = HashMap::new();
        available.insert(
            "input_ids",
            Tensor::from_array(ids_array.into_dyn())
                .map_err(ort_error)?
                .upcast(),
        );
        available.insert(
            "attention_mask",
            Tensor::from_array(mask_array.into_dyn())
                .map_err(ort_error)?
                .upcast(),
        );
        available.insert(
            "token_type_ids",
            Tensor::from_array(type_array.into_dyn())
                .map_err(ort_error)?
                .upcast(),
        );

        let output = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| VectorStoreError::provider("Failed to lock ONNX session"))?;

            let mut feed: HashMap<String, DynTensor> = HashMap::new();
            for input in &session.inputs {
                let tensor = match available.remove(input.name.as_str()) {
                    Some(tensor) => tensor,
                    None => zero_tensor(&ids_shape, input)?,
                };
                feed.insert(input.name.clone(), tensor);
            }

            let outputs = session
                .run(SessionInputs::from(feed))
                .map_err(|e| VectorStoreError::provider(format!("ONNX forward failed: {e}")))?;
            if outputs.len() == 0 {
                return Err(VectorStoreError::provider("ONNX returned no outputs"));
            }
            let array = outputs[0]
                .try_extract_array::<f32>()
                .map_err(|e| {
                    VectorStoreError::provider(format!("Failed to decode ONNX output: {e}"))
                })?
                .to_owned();
            drop(outputs);
            drop(session);
            array
        };

        embeddings_from_output(output, &mask_rows, self.dimension)
    }
}

impl EmbeddingProvider for OnnxEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        self.encode_batch(&[text])?
            .pop()
            .ok_or_else(|| VectorStoreError::provider("Empty embedding result"))
    }

    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.max_batch) {
            results.extend(self.run_batch(batch)?);
        }
        Ok(results)
    }
}

fn ort_error(error: impl std::fmt::Display) -> VectorStoreError {
    VectorStoreError::provider(format!("ONNX Runtime error: {error}"))
}

fn default_intra_threads() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    match cpus {
        0..=4 => 1,
        5..=12 => 2,
        _ => 4,
    }
}

fn execution_providers(use_cuda: bool) -> Vec<ExecutionProviderDispatch> {
    if use_cuda {
        let cuda = CUDAExecutionProvider::default();
        match cuda.is_available() {
            Ok(true) => return vec![cuda.build()],
            Ok(false) => log::warn!("CUDA execution provider not available, using CPU"),
            Err(err) => log::warn!("CUDA execution provider check failed, using CPU: {err}"),
        }
    }
    vec![CPUExecutionProvider::default().build()]
}

fn build_flat_tensors(
    encodings: &[Encoding],
    seq_len: usize,
) -> (Vec<i64>, Vec<i64>, Vec<i64>, Vec<Vec<i64>>) {
    let mut ids = Vec::with_capacity(encodings.len() * seq_len);
    let mut masks = Vec::with_capacity(encodings.len() * seq_len);
    let mut type_ids = Vec::with_capacity(encodings.len() * seq_len);
    let mut mask_rows = Vec::with_capacity(encodings.len());

    for encoding in encodings {
        let encoding_ids = encoding.get_ids();
        let encoding_masks = encoding.get_attention_mask();
        let encoding_types = encoding.get_type_ids();
        for idx in 0..seq_len {
            ids.push(i64::from(*encoding_ids.get(idx).unwrap_or(&0)));
            masks.push(i64::from(*encoding_masks.get(idx).unwrap_or(&0)));
            type_ids.push(i64::from(*encoding_types.get(idx).unwrap_or(&0)));
        }
        mask_rows.push(
            encoding_masks
                .iter()
                .take(seq_len)
                .map(|v| i64::from(*v))
                .collect(),
        );
    }

    (ids, masks, type_ids, mask_rows)
}

fn zero_tensor(shape: &IxDyn, input: &Input) -> Result<DynTensor> {
    let unsupported =
        || VectorStoreError::provider(format!("Unsupported ONNX input '{}'", input.name));
    match &input.input_type {
        ort::value::ValueType::Tensor { ty, .. } => match ty {
            TensorElementType::Int64 => {
                Ok(Tensor::from_array(Array::<i64, _>::zeros(shape.clone()))
                    .map_err(ort_error)?
                    .upcast())
            }
            TensorElementType::Float32 => {
                Ok(Tensor::from_array(Array::<f32, _>::zeros(shape.clone()))
                    .map_err(ort_error)?
                    .upcast())
            }
            _ => Err(unsupported()),
        },
        _ => Err(unsupported()),
    }
}

fn embeddings_from_output(
    array: ArrayD<f32>,
    mask_rows: &[Vec<i64>],
    expected_dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    let bad_shape = |e: ndarray::ShapeError| {
        VectorStoreError::provider(format!("Bad ONNX output shape: {e}"))
    };
    let mut out = Vec::new();
    match array.ndim() {
        // Already pooled: [batch, hidden]
        2 => {
            let embeddings = array.into_dimensionality::<Ix2>().map_err(bad_shape)?;
            for row in embeddings.outer_iter() {
                out.push(row.to_vec());
            }
        }
        // Token states: [batch, tokens, hidden]
        3 => {
            let hidden = array.into_dimensionality::<Ix3>().map_err(bad_shape)?;
            for (idx, sample) in hidden.outer_iter().enumerate() {
                let attn = mask_rows
                    .get(idx)
                    .cloned()
                    .unwrap_or_else(|| vec![1; sample.len_of(Axis(0))]);
                out.push(mean_pool(sample, &attn));
            }
        }
        _ => {
            return Err(VectorStoreError::provider(format!(
                "Unexpected ONNX output dims: {:?}",
                array.shape()
            )));
        }
    }

    for emb in &mut out {
        if emb.len() != expected_dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: expected_dimension,
                actual: emb.len(),
            });
        }
        normalize(emb);
    }
    Ok(out)
}

fn mean_pool(sample: ArrayView2<'_, f32>, mask: &[i64]) -> Vec<f32> {
    let hidden = sample.len_of(Axis(1));
    let mut sum = vec![0.0f32; hidden];
    let mut count = 0.0f32;

    for (token_idx, token) in sample.outer_iter().enumerate() {
        if *mask.get(token_idx).unwrap_or(&0) == 0 {
            continue;
        }
        count += 1.0;
        for (dim, value) in token.iter().enumerate() {
            sum[dim] += value;
        }
    }

    if count > 0.0 {
        for value in &mut sum {
            *value /= count;
        }
    }
    sum
}
