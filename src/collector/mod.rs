//! Tile decode pipeline
//!
//! Callers push [`TileSpec`]s; a kernel thread drops specs that are already
//! being decoded and hands the rest to a fixed pool of worker threads over a
//! bounded queue. Every decode produces exactly one [`DecodedTile`] on the
//! output channel, empty if decoding failed. A request for a spec already
//! in flight is served by that pending decode and produces nothing itself.

mod cancel;
mod kernel;
mod request;
mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender};
use log::{info, warn};

pub use cancel::CancelToken;
pub use request::{DecodedTile, TileDecoder, TileSpec};

use crate::error::CollectorError;
use crate::settings::TileSettings;
use kernel::Kernel;
use worker::tile_worker;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Number of decode threads
    pub workers: usize,
    /// Capacity of the queue between the kernel and the workers
    pub queue_capacity: usize,
}

impl CollectorConfig {
    #[must_use]
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            queue_capacity: workers * 2,
        }
    }

    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Zero in the settings means "pick for me"
    #[must_use]
    pub fn from_settings(settings: &TileSettings) -> Self {
        let config = match settings.workers {
            0 => Self::default(),
            n => Self::new(n),
        };
        match settings.queue_capacity {
            0 => config,
            n => config.queue_capacity(n),
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self::new(thread::available_parallelism().map_or(1, usize::from))
    }
}

/// Handle to a running pipeline. Dropping it shuts the pipeline down.
pub struct TileCollector {
    requests: Option<Sender<TileSpec>>,
    outstanding: Arc<AtomicUsize>,
    cancel: CancelToken,
    kernel: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl TileCollector {
    /// Start the kernel and worker threads
    pub fn spawn<D: TileDecoder>(
        decoder: Arc<D>,
        config: CollectorConfig,
    ) -> Result<(Self, Receiver<DecodedTile<D::Image>>), CollectorError> {
        let (request_tx, request_rx) = flume::unbounded();
        let (done_tx, done_rx) = flume::unbounded();
        let (work_tx, work_rx) = flume::bounded(config.queue_capacity.max(1));
        let (output_tx, output_rx) = flume::unbounded();

        let outstanding = Arc::new(AtomicUsize::new(0));
        let cancel = CancelToken::new();

        let mut workers = Vec::with_capacity(config.workers);
        for id in 0..config.workers.max(1) {
            let decoder = Arc::clone(&decoder);
            let work = work_rx.clone();
            let done = done_tx.clone();
            let cancel = cancel.clone();

            let handle = thread::Builder::new()
                .name(format!("tile-worker-{id}"))
                .spawn(move || tile_worker(decoder, work, done, cancel))
                .map_err(|source| CollectorError::Spawn {
                    role: "worker",
                    source,
                })?;
            workers.push(handle);
        }

        let kernel = Kernel {
            requests: request_rx,
            done: done_rx,
            work: work_tx,
            output: output_tx,
            outstanding: Arc::clone(&outstanding),
            cancel: cancel.clone(),
        };
        let kernel = thread::Builder::new()
            .name("tile-kernel".to_string())
            .spawn(move || kernel.run())
            .map_err(|source| {
                cancel.cancel();
                CollectorError::Spawn {
                    role: "kernel",
                    source,
                }
            })?;

        info!(
            "tile collector started: {} workers, queue capacity {}",
            workers.len(),
            config.queue_capacity
        );

        let collector = Self {
            requests: Some(request_tx),
            outstanding,
            cancel,
            kernel: Some(kernel),
            workers,
        };
        Ok((collector, output_rx))
    }

    /// Ask for a tile. A spec that is already being decoded is ignored; the
    /// pending decode will deliver it.
    pub fn request(&self, spec: TileSpec) -> Result<(), CollectorError> {
        let requests = self.requests.as_ref().ok_or(CollectorError::ShutDown)?;

        self.outstanding.fetch_add(1, Ordering::AcqRel);
        if requests.send(spec).is_err() {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            return Err(CollectorError::ShutDown);
        }
        Ok(())
    }

    /// Request several tiles, returning how many were sent
    pub fn request_all(
        &self,
        specs: impl IntoIterator<Item = TileSpec>,
    ) -> Result<usize, CollectorError> {
        let mut sent = 0;
        for spec in specs {
            self.request(spec)?;
            sent += 1;
        }
        Ok(sent)
    }

    /// True once every accepted request has completed or been deduplicated
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.outstanding() == 0
    }

    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.requests.is_none()
    }

    /// Cancel running decodes, discard queued work and join every thread
    pub fn shutdown_now(&mut self) {
        let Some(requests) = self.requests.take() else {
            return;
        };

        self.cancel.cancel();
        drop(requests);

        if let Some(kernel) = self.kernel.take() {
            if kernel.join().is_err() {
                warn!("tile kernel panicked");
            }
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("tile worker panicked");
            }
        }
        info!("tile collector shut down");
    }
}

impl Drop for TileCollector {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}
