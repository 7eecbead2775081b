use faceverify_core::{
    DistanceMetric, EmbedError, Embedding, FaceEmbedder, ImageBuffer, VerificationResult,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Side length of the blank image used for warm-up inference.
const WARMUP_IMAGE_SIZE: u32 = 112;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error("warm-up inference failed: {0}")]
    Warmup(EmbedError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Embed {
        image: ImageBuffer,
        reply: oneshot::Sender<Result<Embedding, EmbedError>>,
    },
    Compare {
        image: ImageBuffer,
        reference: Embedding,
        metric: DistanceMetric,
        threshold: f64,
        reply: oneshot::Sender<Result<VerificationResult, EmbedError>>,
    },
}

impl EngineRequest {
    /// The caller timed out or disconnected while the request sat in the queue.
    fn is_abandoned(&self) -> bool {
        match self {
            EngineRequest::Embed { reply, .. } => reply.is_closed(),
            EngineRequest::Compare { reply, .. } => reply.is_closed(),
        }
    }
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    model: String,
    dimension: usize,
}

impl EngineHandle {
    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed the primary face in `image`, enforcing detection.
    pub async fn embed(&self, image: ImageBuffer) -> Result<Embedding, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Embed {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Embed `image` and compare it against a stored reference.
    pub async fn compare(
        &self,
        image: ImageBuffer,
        reference: Embedding,
        metric: DistanceMetric,
        threshold: f64,
    ) -> Result<VerificationResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Compare {
                image,
                reference,
                metric,
                threshold,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Warm the embedder up and move it onto a dedicated OS thread.
///
/// The embedder is owned by that thread alone, so inference is serialised
/// without locking. Requests queue on a channel of `queue_depth` slots.
/// Fails fast if warm-up inference errors.
pub fn spawn_engine(
    mut embedder: Box<dyn FaceEmbedder>,
    queue_depth: usize,
) -> Result<EngineHandle, EngineError> {
    warm_up(embedder.as_mut())?;

    let model = embedder.model_name().to_string();
    let dimension = embedder.dimension();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("faceverify-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                if req.is_abandoned() {
                    tracing::debug!("skipping request whose caller has gone away");
                    continue;
                }
                match req {
                    EngineRequest::Embed { image, reply } => {
                        let result = embedder.embed(&image, true);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Compare {
                        image,
                        reference,
                        metric,
                        threshold,
                        reply,
                    } => {
                        let result = embedder.compare(&image, &reference, metric, threshold);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    tracing::info!(model = %model, dimension, queue_depth, "engine ready");
    Ok(EngineHandle { tx, model, dimension })
}

/// Run one inference on a blank image so lazy backend initialisation
/// happens before the first request. A missing face is the expected outcome.
fn warm_up(embedder: &mut dyn FaceEmbedder) -> Result<(), EngineError> {
    let Some(blank) = ImageBuffer::blank(WARMUP_IMAGE_SIZE, WARMUP_IMAGE_SIZE) else {
        return Ok(());
    };
    let started = std::time::Instant::now();
    match embedder.embed(&blank, true) {
        Ok(_) | Err(EmbedError::NoFaceDetected) => {
            tracing::info!(
                model = embedder.model_name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "warm-up inference complete"
            );
            Ok(())
        }
        Err(e) => Err(EngineError::Warmup(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faceverify_core::{similarity, DistanceMetric};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Counting {
        calls: Arc<AtomicUsize>,
        broken: bool,
        delay: Duration,
    }

    impl FaceEmbedder for Counting {
        fn model_name(&self) -> &str {
            "counting"
        }

        fn dimension(&self) -> usize {
            2
        }

        fn embed(&mut self, image: &ImageBuffer, _enforce: bool) -> Result<Embedding, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.broken {
                return Err(EmbedError::InvalidOutput("broken backend".into()));
            }
            Ok(Embedding::new(vec![image.width() as f64, image.height() as f64]))
        }
    }

    fn counting(broken: bool) -> (Box<dyn FaceEmbedder>, Arc<AtomicUsize>) {
        slow_counting(broken, Duration::ZERO)
    }

    fn slow_counting(broken: bool, delay: Duration) -> (Box<dyn FaceEmbedder>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(Counting {
                calls: calls.clone(),
                broken,
                delay,
            }),
            calls,
        )
    }

    #[tokio::test]
    async fn test_spawn_runs_warmup_once() {
        let (embedder, calls) = counting(false);
        let handle = spawn_engine(embedder, 2).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.model_name(), "counting");
        assert_eq!(handle.dimension(), 2);
    }

    #[tokio::test]
    async fn test_embed_and_compare_roundtrip() {
        let (embedder, _) = counting(false);
        let handle = spawn_engine(embedder, 2).unwrap();

        let image = ImageBuffer::blank(4, 2).unwrap();
        let embedding = handle.embed(image.clone()).await.unwrap();
        assert_eq!(embedding.values(), &[4.0, 2.0]);

        let result = handle
            .compare(image, Embedding::new(vec![8.0, 4.0]), DistanceMetric::Cosine, 0.1)
            .await
            .unwrap();
        assert!(result.matched);
        assert!(similarity::is_match(result.distance, 1e-9));
    }

    #[tokio::test]
    async fn test_abandoned_request_is_skipped() {
        let (embedder, calls) = slow_counting(false, Duration::from_millis(200));
        let handle = spawn_engine(embedder, 4).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let busy = tokio::spawn({
            let handle = handle.clone();
            async move { handle.embed(ImageBuffer::blank(2, 2).unwrap()).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Queued behind the busy request, then given up on.
        let gave_up = tokio::time::timeout(
            Duration::from_millis(10),
            handle.embed(ImageBuffer::blank(3, 3).unwrap()),
        )
        .await;
        assert!(gave_up.is_err());

        busy.await.unwrap().unwrap();
        let last = handle.embed(ImageBuffer::blank(5, 5).unwrap()).await.unwrap();
        assert_eq!(last.values(), &[5.0, 5.0]);

        // Warm-up, the busy request and the last one; never the abandoned one.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_broken_backend_fails_warmup() {
        let (embedder, _) = counting(true);
        let err = spawn_engine(embedder, 2).err().unwrap();
        assert!(matches!(err, EngineError::Warmup(EmbedError::InvalidOutput(_))));
    }
}
