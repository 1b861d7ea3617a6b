use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use opsis_core::feedback::FeedbackCooldowns;
use opsis_core::flow::FlowError;
use opsis_core::mapping::ScreenSize;
use opsis_core::{
    run_capture, spawn_engine, AlignedFace, CapturePipeline, FaceFlow, IdentityStore, OnnxEmbedder,
    Verification,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

mod config;
mod replay;
mod store;

use config::Config;
use replay::{spawn_playback, RecordedSession};
use store::IdentityDb;

#[derive(Parser)]
#[command(name = "opsis", about = "Face enrollment and verification from recorded capture sessions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enroll the face in a recorded session
    Enroll {
        /// Session directory containing session.jsonl
        #[arg(long)]
        session: PathBuf,
        /// Display name (default: User_<yyyyMMdd_HHmm>)
        #[arg(long)]
        name: Option<String>,
    },
    /// Verify the face in a recorded session against enrolled identities
    Verify {
        #[arg(long)]
        session: PathBuf,
    },
    /// List enrolled identities
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Remove an enrolled identity by ID
    Remove { id: String },
    /// Remove every enrolled identity
    Clear,
    /// Show configuration and store status
    Status,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;
    let out = &mut std::io::stdout();

    match cli.command {
        Command::Enroll { session, name } => {
            let flow = open_flow(&config).await?;
            enroll(&flow, &config, &session, name.as_deref(), out).await
        }
        Command::Verify { session } => {
            let flow = open_flow(&config).await?;
            verify(&flow, &config, &session, out).await
        }
        Command::List { json } => list(&open_store(&config).await?, json, out).await,
        Command::Remove { id } => remove(&open_store(&config).await?, &id, out).await,
        Command::Clear => clear(&open_store(&config).await?, out).await,
        Command::Status => status(&config, out).await,
    }
}

async fn open_store(config: &Config) -> Result<IdentityDb> {
    IdentityDb::open(&config.db_path, config.embedding_dim)
        .await
        .with_context(|| format!("failed to open database {}", config.db_path.display()))
}

async fn open_flow(config: &Config) -> Result<FaceFlow<IdentityDb>> {
    let model_path = config.model_path.to_string_lossy();
    let embedder = OnnxEmbedder::load(&model_path, config.tensor_layout)
        .context("failed to load embedding model")?;
    let engine = spawn_engine(embedder, config.capture.min_embedding_samples)?;
    let store = open_store(config).await?;
    Ok(FaceFlow::new(
        engine,
        store,
        config.capture.similarity_threshold,
    ))
}

/// Replay a recorded session through the capture loop, printing feedback.
async fn capture(config: &Config, session_dir: &Path) -> Result<Vec<AlignedFace>> {
    let session = Arc::new(
        RecordedSession::load(session_dir)
            .with_context(|| format!("failed to load session {}", session_dir.display()))?,
    );
    let records = session.records();
    let span_ms = match (records.first(), records.last()) {
        (Some(first), Some(last)) => last.timestamp_ms.saturating_sub(first.timestamp_ms),
        _ => 0,
    };
    tracing::info!(frames = session.len(), span_ms, "replaying session");

    let screen = ScreenSize::new(config.screen_width, config.screen_height);
    let mut pipeline = CapturePipeline::new(&config.capture, screen);
    let mut detector = session.detector();

    let (frame_tx, frame_rx) = watch::channel(None);
    let (feedback_tx, mut feedback_rx) = mpsc::channel(16);
    let printer = tokio::spawn(async move {
        while let Some(signal) = feedback_rx.recv().await {
            println!("  {signal}");
        }
    });

    let playback = spawn_playback(Arc::clone(&session), frame_tx);
    let result = run_capture(
        &mut detector,
        &mut pipeline,
        frame_rx,
        &feedback_tx,
        FeedbackCooldowns::new(&config.capture),
    )
    .await;

    drop(feedback_tx);
    printer.await.ok();
    playback.abort();

    result.context("session ended before enough face samples were captured")
}

async fn enroll<S: IdentityStore>(
    flow: &FaceFlow<S>,
    config: &Config,
    session: &Path,
    name: Option<&str>,
    out: &mut impl Write,
) -> Result<ExitCode> {
    let samples = capture(config, session).await?;
    let pending = flow.prepare_enrollment(samples).await?;

    match flow
        .complete_enrollment(pending, name.unwrap_or_default())
        .await
    {
        Ok(identity) => {
            writeln!(out, "Enrolled {} ({})", identity.display_name, identity.id)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(FlowError::NameConflict(name)) => {
            writeln!(
                out,
                "An identity named {name:?} is already enrolled; choose another name."
            )?;
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e).context("enrollment failed"),
    }
}

async fn verify<S: IdentityStore>(
    flow: &FaceFlow<S>,
    config: &Config,
    session: &Path,
    out: &mut impl Write,
) -> Result<ExitCode> {
    let samples = capture(config, session).await?;

    match flow.verify(samples).await.context("verification failed")? {
        Verification::Matched {
            identity,
            similarity,
        } => {
            writeln!(
                out,
                "Verified: {} ({}) similarity {similarity:.3}",
                identity.display_name, identity.id
            )?;
            Ok(ExitCode::SUCCESS)
        }
        Verification::NoMatch { best_similarity } => {
            writeln!(
                out,
                "No match (best similarity {best_similarity:.3}, threshold {:.2})",
                config.capture.similarity_threshold
            )?;
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn list(store: &IdentityDb, json: bool, out: &mut impl Write) -> Result<ExitCode> {
    let identities = store.list_info().await?;
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&identities)?)?;
    } else if identities.is_empty() {
        writeln!(out, "No identities enrolled.")?;
    } else {
        writeln!(out, "{:<36}  {:<25}  CREATED", "ID", "NAME")?;
        for identity in &identities {
            writeln!(
                out,
                "{:<36}  {:<25}  {}",
                identity.id, identity.display_name, identity.created_at
            )?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn remove(store: &IdentityDb, id: &str, out: &mut impl Write) -> Result<ExitCode> {
    if store.remove(id).await? {
        writeln!(out, "Removed {id}")?;
        Ok(ExitCode::SUCCESS)
    } else {
        writeln!(out, "No identity with ID {id}")?;
        Ok(ExitCode::FAILURE)
    }
}

async fn clear(store: &IdentityDb, out: &mut impl Write) -> Result<ExitCode> {
    let removed = store.remove_all().await?;
    writeln!(out, "Removed {removed} identities")?;
    Ok(ExitCode::SUCCESS)
}

async fn status(config: &Config, out: &mut impl Write) -> Result<ExitCode> {
    let model_present = config.model_path.exists();
    writeln!(
        out,
        "config:     {}",
        config
            .source
            .as_deref()
            .map_or_else(|| "(defaults)".to_string(), |p| p.display().to_string())
    )?;
    writeln!(
        out,
        "model:      {} ({})",
        config.model_path.display(),
        if model_present { "present" } else { "missing" }
    )?;
    writeln!(out, "layout:     {:?}", config.tensor_layout)?;
    writeln!(out, "database:   {}", config.db_path.display())?;
    writeln!(out, "enrolled:   {}", open_store(config).await?.count_all().await?)?;
    writeln!(out, "threshold:  {:.2}", config.capture.similarity_threshold)?;
    writeln!(
        out,
        "capture:    {} samples, {} ms dwell, {} ms liveness timeout",
        config.capture.target_samples,
        config.capture.stable_duration_ms,
        config.capture.liveness_timeout_ms
    )?;
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use opsis_core::recognizer::RecognizerError;
    use opsis_core::{CaptureConfig, FaceEmbedder, TensorLayout};

    /// Embeds a crop as its mean color.
    struct MeanColor;

    impl FaceEmbedder for MeanColor {
        fn embed(&mut self, face: &AlignedFace) -> Result<Vec<f32>, RecognizerError> {
            let image = face.image();
            let n = (image.width() * image.height()) as f32;
            let mut mean = vec![0.0f32; 3];
            for pixel in image.pixels() {
                for (m, c) in mean.iter_mut().zip(pixel.0) {
                    *m += c as f32 / n;
                }
            }
            Ok(mean)
        }
    }

    fn test_config() -> Config {
        Config {
            model_path: PathBuf::from("/nonexistent/model.onnx"),
            tensor_layout: TensorLayout::Nhwc,
            db_path: PathBuf::from(":memory:"),
            embedding_dim: 3,
            screen_width: 240.0,
            screen_height: 240.0,
            capture: CaptureConfig::default(),
            source: None,
        }
    }

    async fn test_flow() -> FaceFlow<IdentityDb> {
        let config = test_config();
        let engine = spawn_engine(MeanColor, config.capture.min_embedding_samples).unwrap();
        FaceFlow::new(
            engine,
            open_store(&config).await.unwrap(),
            config.capture.similarity_threshold,
        )
    }

    /// Write a recorded session of `frames` 240×240 checkerboard frames,
    /// 50 ms apart, with one centered face that blinks at 800-1000 ms.
    fn record_session(name: &str, frames: u64, color: fn(u8) -> [u8; 3]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("opsis-cli-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let image = RgbImage::from_fn(240, 240, |x, y| {
            Rgb(color(if (x + y) % 2 == 0 { 60 } else { 180 }))
        });
        image.save(dir.join("frame.png")).unwrap();

        let mut index = String::new();
        for i in 0..frames {
            let t = i * 50;
            let open = if (800..1000).contains(&t) { 0.1 } else { 0.9 };
            let line = serde_json::json!({
                "frame": "frame.png",
                "timestamp_ms": t,
                "faces": [{
                    "bounding_box": {"left": 60.0, "top": 80.0, "right": 180.0, "bottom": 200.0},
                    "tracking_id": 1,
                    "left_eye": {"x": 102.0, "y": 120.0},
                    "right_eye": {"x": 138.0, "y": 120.0},
                    "left_eye_open": open,
                    "right_eye_open": open
                }]
            });
            index.push_str(&line.to_string());
            index.push('\n');
        }
        std::fs::write(dir.join("session.jsonl"), index).unwrap();
        dir
    }

    fn warm(v: u8) -> [u8; 3] {
        [v, v / 2, 255 - v]
    }

    fn blue(v: u8) -> [u8; 3] {
        [0, 0, v]
    }

    fn text(out: Vec<u8>) -> String {
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_enroll_then_verify_recorded_sessions() {
        let config = test_config();
        let flow = test_flow().await;
        let alice = record_session("alice", 40, warm);
        let stranger = record_session("stranger", 40, blue);

        let mut out = Vec::new();
        let code = enroll(&flow, &config, &alice, Some("Alice"), &mut out).await.unwrap();
        assert_eq!(code, ExitCode::SUCCESS);
        assert!(text(out).starts_with("Enrolled Alice ("));

        let mut out = Vec::new();
        let code = verify(&flow, &config, &alice, &mut out).await.unwrap();
        assert_eq!(code, ExitCode::SUCCESS);
        assert!(text(out).starts_with("Verified: Alice"));

        let mut out = Vec::new();
        let code = verify(&flow, &config, &stranger, &mut out).await.unwrap();
        assert_eq!(code, ExitCode::FAILURE);
        assert!(text(out).starts_with("No match"));

        std::fs::remove_dir_all(alice).ok();
        std::fs::remove_dir_all(stranger).ok();
    }

    #[tokio::test]
    async fn test_enroll_duplicate_name_fails() {
        let config = test_config();
        let flow = test_flow().await;
        let session = record_session("duplicate", 40, warm);

        enroll(&flow, &config, &session, Some("Bob"), &mut Vec::new()).await.unwrap();
        let mut out = Vec::new();
        let code = enroll(&flow, &config, &session, Some("Bob"), &mut out).await.unwrap();
        assert_eq!(code, ExitCode::FAILURE);
        assert!(text(out).contains("already enrolled"));
        assert_eq!(flow.store().count_all().await.unwrap(), 1);

        std::fs::remove_dir_all(session).ok();
    }

    #[tokio::test]
    async fn test_short_session_is_an_error() {
        let config = test_config();
        let flow = test_flow().await;
        // Ends before the dwell time elapses.
        let session = record_session("short", 5, warm);

        let result = enroll(&flow, &config, &session, None, &mut Vec::new()).await;
        assert!(result.is_err());
        assert_eq!(flow.store().count_all().await.unwrap(), 0);

        std::fs::remove_dir_all(session).ok();
    }

    #[tokio::test]
    async fn test_list_remove_clear_output() {
        let config = test_config();
        let flow = test_flow().await;
        let session = record_session("manage", 40, warm);
        enroll(&flow, &config, &session, Some("Carol"), &mut Vec::new()).await.unwrap();
        let store = flow.store();

        let mut out = Vec::new();
        list(store, false, &mut out).await.unwrap();
        let table = text(out);
        assert!(table.starts_with("ID"));
        assert!(table.contains("Carol"));

        let mut out = Vec::new();
        list(store, true, &mut out).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json[0]["display_name"], "Carol");
        let id = json[0]["id"].as_str().unwrap().to_string();

        let mut out = Vec::new();
        assert_eq!(remove(store, "missing", &mut out).await.unwrap(), ExitCode::FAILURE);
        assert_eq!(text(out), "No identity with ID missing\n");

        let mut out = Vec::new();
        assert_eq!(remove(store, &id, &mut out).await.unwrap(), ExitCode::SUCCESS);
        assert_eq!(text(out), format!("Removed {id}\n"));

        let mut out = Vec::new();
        list(store, false, &mut out).await.unwrap();
        assert_eq!(text(out), "No identities enrolled.\n");

        enroll(&flow, &config, &session, Some("Dan"), &mut Vec::new()).await.unwrap();
        let mut out = Vec::new();
        clear(store, &mut out).await.unwrap();
        assert_eq!(text(out), "Removed 1 identities\n");

        std::fs::remove_dir_all(session).ok();
    }
}
