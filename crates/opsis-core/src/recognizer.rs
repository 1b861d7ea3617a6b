//! Face embedding extraction via ONNX Runtime.
//!
//! Each aligned crop is normalized to `(p - 127.5) / 128.0` per RGB channel
//! and run through a MobileFaceNet-style model. Per-crop vectors are averaged
//! and the mean is L2-normalized into the attempt's single embedding.

use crate::types::{AlignedFace, Embedding};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 112;
const INPUT_MEAN: f32 = 127.5;
const INPUT_STD: f32 = 128.0;
/// Norms below this are treated as zero and left unnormalized.
const MIN_NORM: f32 = 1e-10;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("need at least {required} face samples, got {got}")]
    InsufficientSamples { got: usize, required: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Memory layout of the model's input tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[1, H, W, 3]`, as exported by TFLite converters.
    #[default]
    Nhwc,
    /// `[1, 3, H, W]`.
    Nchw,
}

/// Maps one aligned crop to a raw (unnormalized) feature vector.
pub trait FaceEmbedder {
    fn embed(&mut self, face: &AlignedFace) -> Result<Vec<f32>, RecognizerError>;
}

/// ONNX face embedding model.
pub struct OnnxEmbedder {
    session: Session,
    layout: TensorLayout,
}

impl OnnxEmbedder {
    /// Load the embedding model from `model_path`.
    pub fn load(model_path: &str, layout: TensorLayout) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            ?layout,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Self { session, layout })
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn embed(&mut self, face: &AlignedFace) -> Result<Vec<f32>, RecognizerError> {
        let input = preprocess(face.image(), self.layout);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.is_empty() {
            return Err(RecognizerError::InferenceFailed(
                "model returned an empty embedding".into(),
            ));
        }
        Ok(raw.to_vec())
    }
}

/// Convert a crop into the model's input tensor, resizing to 112×112 first
/// if it is any other size.
fn preprocess(image: &RgbImage, layout: TensorLayout) -> Array4<f32> {
    let image = if image.dimensions() == (INPUT_SIZE, INPUT_SIZE) {
        Cow::Borrowed(image)
    } else {
        Cow::Owned(imageops::resize(image, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle))
    };

    let size = INPUT_SIZE as usize;
    let mut tensor = match layout {
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, size, size, 3)),
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, size, size)),
    };

    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let value = (pixel[c] as f32 - INPUT_MEAN) / INPUT_STD;
            match layout {
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = value,
                TensorLayout::Nchw => tensor[[0, c, y, x]] = value,
            }
        }
    }

    tensor
}

/// Componentwise mean of equal-length vectors. `None` if `vectors` is empty
/// or lengths differ.
pub fn average_embeddings(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let dim = first.len();
    if vectors.iter().any(|v| v.len() != dim) {
        return None;
    }

    let mut sum = vec![0.0f32; dim];
    for vector in vectors {
        for (acc, v) in sum.iter_mut().zip(vector) {
            *acc += v;
        }
    }
    let count = vectors.len() as f32;
    Some(sum.into_iter().map(|v| v / count).collect())
}

/// Scale to unit length. Near-zero vectors are returned unchanged.
pub fn l2_normalize(mut values: Vec<f32>) -> Vec<f32> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm < MIN_NORM {
        return values;
    }
    for v in &mut values {
        *v /= norm;
    }
    values
}

/// Embed every crop, average, and normalize into one embedding.
///
/// Fewer than `min_samples` crops means the capture stage handed over an
/// incomplete attempt and is reported as [`RecognizerError::InsufficientSamples`].
pub fn extract_embedding<E: FaceEmbedder + ?Sized>(
    embedder: &mut E,
    samples: &[AlignedFace],
    min_samples: usize,
) -> Result<Embedding, RecognizerError> {
    if samples.len() < min_samples {
        tracing::error!(
            got = samples.len(),
            required = min_samples,
            "embedding requested with too few samples"
        );
        return Err(RecognizerError::InsufficientSamples {
            got: samples.len(),
            required: min_samples,
        });
    }

    let vectors = samples
        .iter()
        .map(|face| embedder.embed(face))
        .collect::<Result<Vec<_>, _>>()?;

    let mean = average_embeddings(&vectors).ok_or_else(|| {
        RecognizerError::InferenceFailed("per-sample embeddings differ in length".into())
    })?;

    let embedding = Embedding::new(l2_normalize(mean));
    tracing::debug!(
        samples = samples.len(),
        dim = embedding.values.len(),
        "embedding extracted"
    );
    Ok(embedding)
}
