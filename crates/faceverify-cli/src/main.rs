use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use faceverify_core::{
    decode, similarity, DetectorKind, DistanceMetric, EmbedderOptions, Embedding, FaceEmbedder, ImageBuffer,
    ModelKind, OnnxEmbedder,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "faceverify", about = "Face embedding and verification from the command line")]
struct Cli {
    #[command(flatten)]
    models: ModelArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ModelArgs {
    /// Directory containing the ONNX model files
    #[arg(long, global = true, env = "FACEVERIFY_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Recognition model (sface, arcface)
    #[arg(long, global = true, default_value = "sface")]
    model: ModelKind,

    /// Face detector (scrfd, skip)
    #[arg(long, global = true, default_value = "scrfd")]
    detector: DetectorKind,

    /// ONNX Runtime intra-op threads
    #[arg(long, global = true, default_value_t = 2)]
    threads: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the embedding of the face in an image as a JSON array
    Embed {
        /// Image file
        image: PathBuf,
        /// Embed the whole image when no face is found instead of failing
        #[arg(long)]
        no_enforce: bool,
    },
    /// Check whether the face in an image matches a stored embedding
    Compare {
        /// Image file
        image: PathBuf,
        /// Stored embedding: a JSON array, or @path to a file holding one
        #[arg(short, long)]
        embedding: String,
        /// Distance metric (cosine, euclidean, euclidean_l2)
        #[arg(long, default_value = "cosine")]
        metric: DistanceMetric,
        /// Match threshold; defaults to the model's tuned value
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Distance between the faces in two images
    Distance {
        a: PathBuf,
        b: PathBuf,
        #[arg(long, default_value = "cosine")]
        metric: DistanceMetric,
    },
}

impl ModelArgs {
    fn load(&self) -> Result<OnnxEmbedder> {
        let options = EmbedderOptions {
            model_dir: self.model_dir.clone().unwrap_or_else(faceverify_core::default_model_dir),
            model: self.model,
            detector: self.detector,
            intra_threads: self.threads,
        };
        tracing::debug!(model_dir = %options.model_dir.display(), model = %options.model, "loading models");
        OnnxEmbedder::load(&options).context("failed to load face models")
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Embed { image, no_enforce } => {
            let mut embedder = cli.models.load()?;
            let embedding = embedder.embed(&read_image(&image)?, !no_enforce)?;
            println!("{}", serde_json::to_string(embedding.values())?);
        }
        Commands::Compare {
            image,
            embedding,
            metric,
            threshold,
        } => {
            let mut embedder = cli.models.load()?;
            let reference = read_embedding(&embedding, embedder.dimension())?;
            let threshold = threshold.unwrap_or_else(|| cli.models.model.default_threshold(metric));
            let result = embedder.compare(&read_image(&image)?, &reference, metric, threshold)?;
            println!(
                "{}",
                serde_json::json!({
                    "is_match": result.matched,
                    "distance": result.distance,
                    "threshold": result.threshold,
                    "metric": result.metric,
                    "model": embedder.model_name(),
                })
            );
        }
        Commands::Distance { a, b, metric } => {
            let mut embedder = cli.models.load()?;
            let first = embedder.embed(&read_image(&a)?, true)?;
            let second = embedder.embed(&read_image(&b)?, true)?;
            let distance = similarity::distance(&first, &second, metric)?;
            println!("{distance:.6}");
        }
    }

    Ok(())
}

fn read_image(path: &Path) -> Result<ImageBuffer> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    decode::decode_bytes(&bytes).with_context(|| format!("failed to decode {}", path.display()))
}

fn read_embedding(arg: &str, dimension: usize) -> Result<Embedding> {
    let raw = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?,
        None => arg.to_string(),
    };
    if raw.trim().is_empty() {
        bail!("stored embedding is empty");
    }
    Ok(Embedding::from_json(&raw, dimension)?)
}
