//! Background tile requests on the Tokio blocking pool

use super::cache::Tile;
use super::engine::WaveformEngine;
use super::source::AudioSource;
use crate::error::{AudioError, TileError};
use crate::tokio_runtime;
use log::warn;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};

/// Compute a tile off the calling thread
pub fn request_tile<S>(
    engine: Arc<WaveformEngine<S>>,
    offset: i64,
    zoom: f64,
) -> JoinHandle<Result<Tile, TileError>>
where
    S: AudioSource + 'static,
{
    tokio_runtime::handle().spawn_blocking(move || engine.tile(offset, zoom))
}

/// Compute a tile, cancelling its offset if it takes longer than `timeout`
///
/// After the deadline the computation stops at its next window boundary and
/// this returns `TileError::Cancelled` (or the tile, if it finished first).
pub async fn request_tile_with_timeout<S>(
    engine: Arc<WaveformEngine<S>>,
    offset: i64,
    zoom: f64,
    timeout: Duration,
) -> Result<Tile, TileError>
where
    S: AudioSource + 'static,
{
    let mut handle = request_tile(engine.clone(), offset, zoom);

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(joined) => joined.map_err(worker_failure)?,
        Err(_) => {
            warn!(
                "Tile {} at zoom {} exceeded {:?}, cancelling",
                offset, zoom, timeout
            );
            engine.cancel(offset);
            let joined = handle.await.map_err(worker_failure)?;
            // A computation that finished first never consumed the cancel
            if !matches!(joined, Err(TileError::Cancelled)) {
                engine.clear_cancel(offset);
            }
            joined
        }
    }
}

fn worker_failure(err: JoinError) -> TileError {
    TileError::ReadFailure(AudioError::ReadFailure(format!("tile worker failed: {}", err)))
}
