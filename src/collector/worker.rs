//! Decode workers - run in separate threads

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use flume::{Receiver, Sender};
use log::{error, warn};

use super::cancel::CancelToken;
use super::request::{DecodedTile, TileDecoder, TileSpec};

pub(super) fn tile_worker<D: TileDecoder>(
    decoder: Arc<D>,
    work: Receiver<TileSpec>,
    done: Sender<DecodedTile<D::Image>>,
    cancel: CancelToken,
) {
    for spec in work.iter() {
        if cancel.is_cancelled() {
            break;
        }

        let image = decode_tile(decoder.as_ref(), &spec, &cancel);

        // Failures are reported too so the kernel never keeps a stale
        // in-flight entry.
        if done.send(DecodedTile { spec, image }).is_err() {
            break;
        }
    }
}

fn decode_tile<D: TileDecoder>(decoder: &D, spec: &TileSpec, cancel: &CancelToken) -> Option<D::Image> {
    match panic::catch_unwind(AssertUnwindSafe(|| decoder.decode(spec, cancel))) {
        Ok(Ok(image)) => Some(image),
        Ok(Err(e)) => {
            warn!("failed to decode tile {spec}: {e}");
            None
        }
        Err(_) => {
            error!("decoder panicked on tile {spec}");
            None
        }
    }
}
