use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::catalog::ImageCatalog;
use crate::events::{AspectResolved, ResolveAspect};
use crate::model::{OwnerId, SlideshowState};
use crate::settings::SettingsStore;
use crate::tasks::aspect::DimensionLoader;
use crate::tasks::{aspect, engine};

const ASPECT_CHANNEL_CAPACITY: usize = 64;

/// Running slideshow: the engine task plus its aspect resolver, wired over
/// bounded channels, exposed as a read-only state stream and a `dispose`
/// switch.
pub struct Slideshow {
    state_rx: watch::Receiver<SlideshowState>,
    cancel: CancellationToken,
    tasks: JoinSet<Result<()>>,
}

impl Slideshow {
    pub fn start(
        catalog: Arc<dyn ImageCatalog>,
        settings: Arc<dyn SettingsStore>,
        loader: Arc<dyn DimensionLoader>,
        owner: OwnerId,
        max_concurrent_probes: usize,
    ) -> Self {
        // Aspect requests are unbounded: their backlog is capped by the
        // catalog size, and an unbounded edge keeps the engine<->resolver
        // cycle free of send deadlocks.
        let (resolve_tx, resolve_rx) = mpsc::unbounded_channel::<ResolveAspect>();
        let (aspect_tx, aspect_rx) = mpsc::channel::<AspectResolved>(ASPECT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SlideshowState::default());
        let cancel = CancellationToken::new();

        let mut tasks = JoinSet::new();
        tasks.spawn({
            let cancel = cancel.clone();
            async move {
                engine::run(
                    catalog, settings, owner, resolve_tx, aspect_rx, state_tx, cancel,
                )
                .await
                .context("slideshow engine task failed")
            }
        });
        tasks.spawn({
            let cancel = cancel.clone();
            async move {
                aspect::run(loader, resolve_rx, aspect_tx, cancel, max_concurrent_probes)
                    .await
                    .context("aspect resolver task failed")
            }
        });

        Self {
            state_rx,
            cancel,
            tasks,
        }
    }

    /// Fresh handle onto the snapshot stream. Snapshots are always complete;
    /// readers never observe a half-applied update.
    pub fn state(&self) -> watch::Receiver<SlideshowState> {
        self.state_rx.clone()
    }

    /// Tear down timers and subscriptions and wait for the tasks to drain.
    /// No state update is published after this returns.
    pub async fn dispose(mut self) {
        self.cancel.cancel();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("slideshow task ended with error: {err:#}"),
                Err(err) => warn!("slideshow task panicked: {err}"),
            }
        }
    }
}
