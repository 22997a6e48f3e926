//! Reference-counted bitmap entries and the leases handed to callers

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::warn;

use super::backend::BitmapBackend;

#[derive(Debug, Default)]
struct RefState {
    ref_count: u32,
    recycled: bool,
    /// Detached from its cache by `clear()` while still referenced
    orphaned: bool,
}

/// One decoded image plus its reference count.
///
/// The `(ref_count, recycled)` pair is guarded as a unit so a state can only
/// become recycled while nobody holds it. Once recycled it never comes back.
pub struct BitmapState<I> {
    key: String,
    image: I,
    byte_size: usize,
    state: Mutex<RefState>,
}

impl<I> BitmapState<I> {
    #[must_use]
    pub fn new(key: impl Into<String>, image: I, byte_size: usize) -> Self {
        Self {
            key: key.into(),
            image,
            byte_size,
            state: Mutex::new(RefState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RefState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a reference. Fails closed once the state is recycled or pending
    /// recycle; the caller has to decode a fresh image.
    pub(crate) fn acquire(&self) -> bool {
        let mut state = self.lock();
        if state.recycled || state.orphaned {
            return false;
        }
        state.ref_count += 1;
        true
    }

    /// Drop a reference. No-op at zero.
    pub(crate) fn release(&self) {
        let mut state = self.lock();
        state.ref_count = state.ref_count.saturating_sub(1);
    }

    #[must_use]
    pub fn can_recycle(&self) -> bool {
        self.lock().ref_count == 0
    }

    /// Flip to recycled. Refused while referenced or if already recycled.
    pub(crate) fn mark_recycled(&self) -> bool {
        let mut state = self.lock();
        if state.ref_count > 0 || state.recycled {
            return false;
        }
        state.recycled = true;
        true
    }

    #[must_use]
    pub fn ref_count(&self) -> u32 {
        self.lock().ref_count
    }

    #[must_use]
    pub fn is_recycled(&self) -> bool {
        self.lock().recycled
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Size reported by the backend when the entry was created
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub(crate) fn image(&self) -> &I {
        &self.image
    }

    /// Detach from the owning cache. Returns true when the state was
    /// unreferenced and is now recycled; otherwise the last lease to drop
    /// finishes the job.
    pub(crate) fn orphan(&self) -> bool {
        let mut state = self.lock();
        state.orphaned = true;
        if state.ref_count == 0 && !state.recycled {
            state.recycled = true;
            return true;
        }
        false
    }

    /// Release one reference; true when this was the last reference to an
    /// orphaned state and it has been marked recycled.
    fn release_final(&self) -> bool {
        let mut state = self.lock();
        state.ref_count = state.ref_count.saturating_sub(1);
        if state.orphaned && state.ref_count == 0 && !state.recycled {
            state.recycled = true;
            return true;
        }
        false
    }
}

impl<I> fmt::Debug for BitmapState<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("BitmapState")
            .field("key", &self.key)
            .field("byte_size", &self.byte_size)
            .field("ref_count", &state.ref_count)
            .field("recycled", &state.recycled)
            .field("orphaned", &state.orphaned)
            .finish()
    }
}

/// Hand a recycled state's image back to the backend, logging failures.
pub(crate) fn recycle_image<B: BitmapBackend>(backend: &B, state: &BitmapState<B::Image>) {
    if let Err(e) = backend.recycle(state.image()) {
        warn!("failed to recycle bitmap {}: {e}", state.key());
    }
}

/// A held reference to a cached bitmap.
///
/// Dereferences to the image. Dropping the lease releases the reference.
pub struct BitmapRef<B: BitmapBackend> {
    state: Arc<BitmapState<B::Image>>,
    backend: Arc<B>,
}

impl<B: BitmapBackend> BitmapRef<B> {
    /// Wrap a state whose `acquire()` has already succeeded
    pub(crate) fn from_acquired(state: Arc<BitmapState<B::Image>>, backend: Arc<B>) -> Self {
        Self { state, backend }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        self.state.key()
    }

    #[must_use]
    pub fn state(&self) -> &Arc<BitmapState<B::Image>> {
        &self.state
    }

    /// Explicit release; same as dropping the lease
    pub fn release(self) {}
}

impl<B: BitmapBackend> Deref for BitmapRef<B> {
    type Target = B::Image;

    fn deref(&self) -> &B::Image {
        self.state.image()
    }
}

impl<B: BitmapBackend> Drop for BitmapRef<B> {
    fn drop(&mut self) {
        if self.state.release_final() {
            recycle_image(self.backend.as_ref(), &self.state);
        }
    }
}

impl<B: BitmapBackend> fmt::Debug for BitmapRef<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BitmapRef").field(&self.state).finish()
    }
}
