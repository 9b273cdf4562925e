//! Buffer chains as ordered handle sequences.
//!
//! A [`Chain`] owns its handles. Linking, length summation and truncation work on the handle list,
//! and every mutation rewrites the `NEXT_PRESENT`/`next` fields of the affected segments so the
//! pool-level view (walk from the head) always matches the sequence.

use crate::{BufferError, BufferIndex, BufferPool};

#[derive(Debug, PartialEq, Eq)]
pub struct Chain {
    segments: Vec<BufferIndex>,
}

impl Chain {
    /// Allocate `n_segments` handles from `pool`, linked in allocation order.
    pub fn allocate(pool: &mut BufferPool, n_segments: usize) -> Result<Self, BufferError> {
        if n_segments == 0 {
            return Err(BufferError::EmptyChain);
        }
        let segments = pool.alloc_exact(n_segments)?;
        Ok(Self::link(pool, segments))
    }

    /// Take ownership of already-allocated handles and link them in the given order.
    ///
    /// # Panics
    ///
    /// Panics if `segments` is empty.
    pub fn link(pool: &mut BufferPool, segments: Vec<BufferIndex>) -> Self {
        assert!(!segments.is_empty(), "a buffer chain needs at least one segment");
        for pair in segments.windows(2) {
            pool.get_mut(pair[0]).link(Some(pair[1]));
        }
        if let Some(&tail) = segments.last() {
            pool.get_mut(tail).link(None);
        }
        Self { segments }
    }

    /// Rebuild the handle sequence of a chain published as a bare head handle.
    pub fn from_head(pool: &BufferPool, head: BufferIndex) -> Self {
        let mut segments = vec![head];
        let mut cursor = pool.get(head);
        while let Some(next) = cursor.next().filter(|_| cursor.is_chained()) {
            segments.push(next);
            cursor = pool.get(next);
        }
        Self { segments }
    }

    pub fn head(&self) -> BufferIndex {
        self.segments[0]
    }

    pub fn tail(&self) -> BufferIndex {
        self.segments[self.segments.len() - 1]
    }

    pub fn segments(&self) -> &[BufferIndex] {
        &self.segments
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Link `handle` behind the current tail.
    pub fn append_segment(&mut self, pool: &mut BufferPool, handle: BufferIndex) {
        pool.get_mut(self.tail()).link(Some(handle));
        pool.get_mut(handle).link(None);
        self.segments.push(handle);
    }

    /// Sum of `current_length` over every segment.
    pub fn total_length(&self, pool: &BufferPool) -> usize {
        self.segments
            .iter()
            .map(|&bi| pool.get(bi).current_length())
            .sum()
    }

    /// Shorten the packet to at most `len` bytes, returning segments that end up empty to the pool.
    ///
    /// The head segment is always kept, even when `len` is zero.
    pub fn truncate(&mut self, pool: &mut BufferPool, len: usize) {
        let mut remaining = len;
        let mut keep = 0;
        for &bi in &self.segments {
            let seg = pool.get_mut(bi);
            seg.truncate(remaining);
            remaining -= seg.current_length();
            keep += 1;
            if remaining == 0 {
                break;
            }
        }

        for bi in self.segments.drain(keep..) {
            pool.free_one(bi);
        }
        pool.get_mut(self.tail()).link(None);
    }

    /// Copy the payload of every segment into one contiguous buffer.
    pub fn linearize(&self, pool: &BufferPool) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_length(pool));
        for &bi in &self.segments {
            out.extend_from_slice(pool.get(bi).payload());
        }
        out
    }

    /// Return every segment to the pool.
    pub fn release(self, pool: &mut BufferPool) {
        for bi in self.segments {
            pool.free_one(bi);
        }
    }
}
