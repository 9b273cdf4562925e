//! Bridge-local free-list of RX buffers.
//!
//! The RX path borrows segments from this cache rather than from the pool directly. The cache is
//! refilled from the pool one graph frame at a time, and only once it has dropped below half a
//! frame, so the pool is touched at most once per activation in steady state.

use crate::{BufferError, BufferIndex, BufferPool};

/// Number of buffer handles in one graph frame.
pub const FRAME_SIZE: usize = 256;

#[derive(Debug)]
pub struct RxBufferCache {
    buffers: Vec<BufferIndex>,
    frame_size: usize,
}

impl Default for RxBufferCache {
    fn default() -> Self {
        Self::new(FRAME_SIZE)
    }
}

impl RxBufferCache {
    pub fn new(frame_size: usize) -> Self {
        Self {
            buffers: Vec::with_capacity(frame_size),
            frame_size,
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Top the cache up to a full frame if it has dropped below half of one.
    ///
    /// Returns the number of handles taken from the pool. A short pool is not an error here; the
    /// shortfall surfaces as [`BufferError::ResourceExhausted`] from [`RxBufferCache::take_n`].
    pub fn replenish(&mut self, pool: &mut BufferPool) -> usize {
        let n_left = self.buffers.len();
        if n_left >= self.frame_size / 2 {
            return 0;
        }
        pool.alloc_into(&mut self.buffers, self.frame_size - n_left)
    }

    /// Whether at least `n_segments` handles remain, e.g. one maximal packet of `mtu_buffers`.
    pub fn has_reserve(&self, n_segments: usize) -> bool {
        self.buffers.len() >= n_segments
    }

    /// Take exactly `n` handles, or none at all.
    ///
    /// Handles come off the end of the cache; the returned vector is in chain order.
    pub fn take_n(&mut self, n: usize) -> Result<Vec<BufferIndex>, BufferError> {
        if n > self.buffers.len() {
            return Err(BufferError::ResourceExhausted {
                requested: n,
                available: self.buffers.len(),
            });
        }
        let split = self.buffers.len() - n;
        let mut out = self.buffers.split_off(split);
        out.reverse();
        Ok(out)
    }

    /// Hand every cached handle back to the pool.
    pub fn release_all(&mut self, pool: &mut BufferPool) {
        for bi in self.buffers.drain(..) {
            pool.free_one(bi);
        }
    }
}
