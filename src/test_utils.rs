//! Deterministic doubles for the cache and collector tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::cache::{BitmapBackend, Clock};
use crate::collector::{CancelToken, TileDecoder, TileSpec};
use crate::error::{BackendError, DecodeError};

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Stand-in bitmap: an id to track it by and a claimed byte size
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestImage {
    pub id: u64,
    pub bytes: usize,
}

impl TestImage {
    pub fn new(id: u64, bytes: usize) -> Self {
        Self { id, bytes }
    }
}

/// Backend that records every successful recycle in order
#[derive(Debug, Default)]
pub struct CountingBackend {
    recycled: Mutex<Vec<u64>>,
    failing: AtomicBool,
}

impl CountingBackend {
    pub fn recycled_ids(&self) -> Vec<u64> {
        self.recycled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make subsequent recycles return an error
    pub fn fail_recycle(&self, fail: bool) {
        self.failing.store(fail, Ordering::Release);
    }
}

impl BitmapBackend for CountingBackend {
    type Image = TestImage;

    fn calculate_size(&self, image: &TestImage) -> usize {
        image.bytes
    }

    fn recycle(&self, image: &TestImage) -> Result<(), BackendError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(BackendError::platform(format!("refusing to free {}", image.id)));
        }
        self.recycled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(image.id);
        Ok(())
    }
}

/// Decoder whose behaviour per page is scripted up front.
///
/// A gated decoder blocks every decode until [`ScriptedDecoder::open_gate`]
/// is called or the decode is cancelled.
#[derive(Debug)]
pub struct ScriptedDecoder {
    calls: AtomicUsize,
    gate: Mutex<bool>,
    opened: Condvar,
    fail_pages: HashSet<usize>,
    panic_pages: HashSet<usize>,
}

impl ScriptedDecoder {
    pub fn gated() -> Self {
        Self {
            gate: Mutex::new(false),
            ..Self::default()
        }
    }

    pub fn fail_on(mut self, page: usize) -> Self {
        self.fail_pages.insert(page);
        self
    }

    pub fn panic_on(mut self, page: usize) -> Self {
        self.panic_pages.insert(page);
        self
    }

    /// Number of decodes started so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }

    pub fn open_gate(&self) {
        *self.gate.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.opened.notify_all();
    }

    fn wait_for_gate(&self, cancel: &CancelToken) -> Result<(), DecodeError> {
        let mut open = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        while !*open {
            if cancel.is_cancelled() {
                return Err(DecodeError::Cancelled);
            }
            open = self
                .opened
                .wait_timeout(open, Duration::from_millis(5))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        Ok(())
    }
}

impl Default for ScriptedDecoder {
    fn default() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: Mutex::new(true),
            opened: Condvar::new(),
            fail_pages: HashSet::new(),
            panic_pages: HashSet::new(),
        }
    }
}

impl TileDecoder for ScriptedDecoder {
    type Image = TestImage;

    fn decode(&self, spec: &TileSpec, cancel: &CancelToken) -> Result<TestImage, DecodeError> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        if self.panic_pages.contains(&spec.page) {
            panic!("scripted panic on page {}", spec.page);
        }
        self.wait_for_gate(cancel)?;
        if self.fail_pages.contains(&spec.page) {
            return Err(DecodeError::renderer(format!("scripted failure on page {}", spec.page)));
        }

        let (width, height) = spec.output_size();
        Ok(TestImage::new(spec.page as u64, width as usize * height as usize * 4))
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}
