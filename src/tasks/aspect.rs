use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tokio::select;
use tokio::sync::mpsc::{Sender, UnboundedReceiver};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Error;
use crate::events::{AspectResolved, ResolveAspect};
use crate::model::ImageId;

/// Resolves an image reference to its pixel dimensions. Implementations run
/// on a blocking thread, so plain synchronous IO is fine.
pub trait DimensionLoader: Send + Sync + 'static {
    fn load_dimensions(&self, file_ref: &str) -> Result<(u32, u32), Error>;
}

/// Probes image headers on the local filesystem without a full decode.
pub struct FsDimensionLoader;

impl DimensionLoader for FsDimensionLoader {
    fn load_dimensions(&self, file_ref: &str) -> Result<(u32, u32), Error> {
        let dimensions = image::ImageReader::open(file_ref)?
            .with_guessed_format()?
            .into_dimensions()
            .map_err(|err| Error::BadImage(err.to_string()))?;
        Ok(dimensions)
    }
}

/// Aspect resolver task.
///
/// Keeps at most one outstanding probe per image id and never retries: a
/// failed probe leaves the id unresolved for good, which downstream treats
/// as non-portrait. Probes for different ids run concurrently (bounded by
/// `max_in_flight`) and may complete in any order.
pub async fn run(
    loader: Arc<dyn DimensionLoader>,
    mut resolve_rx: UnboundedReceiver<ResolveAspect>,
    to_engine: Sender<AspectResolved>,
    cancel: CancellationToken,
    max_in_flight: usize,
) -> Result<()> {
    let mut in_flight: HashSet<ImageId> = HashSet::new();
    let mut attempted: HashSet<ImageId> = HashSet::new();
    let mut probes: JoinSet<(ImageId, Option<f32>)> = JoinSet::new();

    loop {
        select! {
            _ = cancel.cancelled() => break,

            Some(ResolveAspect(record)) = resolve_rx.recv(), if in_flight.len() < max_in_flight => {
                if attempted.contains(&record.id) || !in_flight.insert(record.id.clone()) {
                    continue;
                }
                let loader = loader.clone();
                probes.spawn(async move {
                    let id = record.id.clone();
                    let probe = tokio::task::spawn_blocking(move || {
                        loader.load_dimensions(&record.file_ref)
                    })
                    .await;
                    let ratio = match probe {
                        Ok(Ok((width, height))) if height > 0 => {
                            Some(width as f32 / height as f32)
                        }
                        Ok(Ok(_)) => {
                            debug!(image = %id, "probe reported zero height; treating as unresolved");
                            None
                        }
                        Ok(Err(err)) => {
                            debug!(image = %id, "dimension probe failed: {err}");
                            None
                        }
                        Err(err) => {
                            debug!(image = %id, "dimension probe aborted: {err}");
                            None
                        }
                    };
                    (id, ratio)
                });
            }

            Some(join_res) = probes.join_next() => {
                if let Ok((id, maybe_ratio)) = join_res {
                    in_flight.remove(&id);
                    attempted.insert(id.clone());
                    if let Some(ratio) = maybe_ratio {
                        debug!(image = %id, ratio, "aspect resolved");
                        if to_engine.send(AspectResolved { id, ratio }).await.is_err() {
                            break;
                        }
                    }
                }
            }

            else => break,
        }
    }
    Ok(())
}
