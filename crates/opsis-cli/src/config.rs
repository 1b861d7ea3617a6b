use anyhow::{Context, Result};
use opsis_core::{CaptureConfig, TensorLayout};
use std::path::{Path, PathBuf};

/// CLI configuration: capture tunables from an optional TOML file, runtime
/// settings from `OPSIS_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// ONNX embedding model.
    pub model_path: PathBuf,
    /// Input tensor layout the model expects.
    pub tensor_layout: TensorLayout,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Length of the model's embedding vector; stored blobs must match.
    pub embedding_dim: usize,
    /// Preview surface the recorded sessions were framed against.
    pub screen_width: f32,
    pub screen_height: f32,
    /// Gate, liveness, sampling and matching tunables.
    pub capture: CaptureConfig,
    /// The TOML file `capture` was read from, if any.
    pub source: Option<PathBuf>,
}

impl Config {
    /// Load from the process environment.
    pub fn load() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using `var` for environment lookups.
    pub fn load_with(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| home(&var).join(".local/share"))
            .join("opsis");

        let source = match var("OPSIS_CONFIG") {
            Some(path) => Some(PathBuf::from(path)),
            None => {
                let default = var("XDG_CONFIG_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| home(&var).join(".config"))
                    .join("opsis/config.toml");
                default.exists().then_some(default)
            }
        };

        let mut capture = match &source {
            Some(path) => read_capture_config(path)?,
            None => CaptureConfig::default(),
        };
        if let Some(threshold) = parse(&var, "OPSIS_SIMILARITY_THRESHOLD") {
            capture.similarity_threshold = threshold;
        }

        let tensor_layout = match var("OPSIS_TENSOR_LAYOUT").as_deref() {
            None => TensorLayout::default(),
            Some(v) if v.eq_ignore_ascii_case("nhwc") => TensorLayout::Nhwc,
            Some(v) if v.eq_ignore_ascii_case("nchw") => TensorLayout::Nchw,
            Some(other) => anyhow::bail!("OPSIS_TENSOR_LAYOUT must be nhwc or nchw, got {other:?}"),
        };

        Ok(Self {
            model_path: var("OPSIS_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("models/mobilefacenet.onnx")),
            tensor_layout,
            db_path: var("OPSIS_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("identities.db")),
            embedding_dim: parse(&var, "OPSIS_EMBEDDING_DIM").unwrap_or(192),
            screen_width: parse(&var, "OPSIS_SCREEN_WIDTH").unwrap_or(1080.0),
            screen_height: parse(&var, "OPSIS_SCREEN_HEIGHT").unwrap_or(2000.0),
            capture,
            source,
        })
    }
}

fn read_capture_config(path: &Path) -> Result<CaptureConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let capture = toml::from_str(&text)
        .with_context(|| format!("invalid config {}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded capture config");
    Ok(capture)
}

fn home(var: &impl Fn(&str) -> Option<String>) -> PathBuf {
    PathBuf::from(var("HOME").unwrap_or_else(|| "/tmp".to_string()))
}

fn parse<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}
