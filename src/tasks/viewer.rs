use anyhow::Result;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::model::{Slide, SlideshowState};

/// Console stand-in for the rendering boundary: logs the visible slide on
/// every published snapshot. Exits when the engine drops the state channel.
pub async fn run(mut state_rx: watch::Receiver<SlideshowState>) -> Result<()> {
    while state_rx.changed().await.is_ok() {
        let state = state_rx.borrow_and_update();
        match state.current_slide() {
            Some(Slide::Pair(left, right)) => info!(
                %left,
                %right,
                index = state.current_index,
                of = state.slides.len(),
                "showing pair"
            ),
            Some(Slide::Single(image)) => info!(
                %image,
                index = state.current_index,
                of = state.slides.len(),
                fit = ?state.preferences.fit_mode,
                "showing"
            ),
            None => debug!("nothing to show"),
        }
    }
    debug!("state channel closed; viewer exiting");
    Ok(())
}
