//! Coordinator owning the in-flight set
//!
//! The kernel waits on two channels at once: new requests from callers and
//! finished tiles from workers. It is the only place the in-flight set is
//! touched, so deduplication needs no locking. Finished tiles pass through
//! the kernel on their way out, so a spec has always left the in-flight set
//! by the time its tile is visible to callers.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use flume::{Receiver, Selector, Sender};
use log::{debug, trace};

use super::cancel::CancelToken;
use super::request::{DecodedTile, TileSpec};

enum Event<I> {
    Request(TileSpec),
    Done(DecodedTile<I>),
    Closed,
}

pub(super) struct Kernel<I> {
    pub(super) requests: Receiver<TileSpec>,
    pub(super) done: Receiver<DecodedTile<I>>,
    pub(super) work: Sender<TileSpec>,
    pub(super) output: Sender<DecodedTile<I>>,
    /// Requests accepted by the collector and not yet completed or dropped
    pub(super) outstanding: Arc<AtomicUsize>,
    pub(super) cancel: CancelToken,
}

impl<I> Kernel<I> {
    pub(super) fn run(self) {
        let mut in_flight: HashSet<TileSpec> = HashSet::new();

        loop {
            let event = Selector::new()
                .recv(&self.requests, |msg| msg.map_or(Event::Closed, Event::Request))
                .recv(&self.done, |msg| msg.map_or(Event::Closed, Event::Done))
                .wait();

            match event {
                Event::Request(spec) => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    if !in_flight.insert(spec) {
                        trace!("dropping duplicate request for {spec}");
                        self.outstanding.fetch_sub(1, Ordering::AcqRel);
                        continue;
                    }
                    // Blocks while the work queue is full; workers never wait
                    // on the kernel, so this always drains.
                    if self.work.send(spec).is_err() {
                        break;
                    }
                }
                Event::Done(tile) => {
                    in_flight.remove(&tile.spec);
                    // Nobody listening is not an error; the tile is dropped.
                    let _ = self.output.send(tile);
                    self.outstanding.fetch_sub(1, Ordering::AcqRel);
                }
                Event::Closed => break,
            }
        }

        debug!("tile kernel stopped with {} in flight", in_flight.len());
    }
}
