//! Fixed-size segment arena.
//!
//! Every segment is allocated up front and never resized. A handle is either on the free list or
//! owned by exactly one holder (a chain, the RX cache, or a frame in flight through the graph).

use bitflags::bitflags;

use crate::BufferError;

/// Payload bytes per segment, excluding headroom.
pub const DEFAULT_DATA_SIZE: usize = 2048;

/// Headroom reserved in front of the data area of every segment.
pub const DEFAULT_PRE_DATA_SIZE: usize = 128;

/// Sentinel interface index for "not set".
pub const INVALID_SW_IF_INDEX: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferIndex(pub u32);

impl BufferIndex {
    fn slot(self) -> usize {
        self.0 as usize
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BufferFlags: u32 {
        /// Another segment follows this one; see [`Segment::next`].
        const NEXT_PRESENT = 1 << 0;
        /// A trace record was captured for this packet.
        const IS_TRACED = 1 << 1;
    }
}

/// Per-packet metadata. Only meaningful on the head segment of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketMeta {
    pub rx_sw_if_index: u32,
    pub tx_sw_if_index: u32,
    /// Node error code, `0` when no error was recorded.
    pub error: u16,
}

impl Default for PacketMeta {
    fn default() -> Self {
        Self {
            rx_sw_if_index: INVALID_SW_IF_INDEX,
            tx_sw_if_index: INVALID_SW_IF_INDEX,
            error: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    pub data_size: usize,
    pub pre_data_size: usize,
    pub n_buffers: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            data_size: DEFAULT_DATA_SIZE,
            pre_data_size: DEFAULT_PRE_DATA_SIZE,
            n_buffers: 1024,
        }
    }
}

/// One fixed-capacity buffer: `pre_data_size` bytes of headroom followed by `data_size` bytes.
#[derive(Debug, Clone)]
pub struct Segment {
    storage: Box<[u8]>,
    pre_data: usize,
    /// Offset of the first payload byte from the start of `storage`.
    current_data: usize,
    current_length: usize,
    flags: BufferFlags,
    next: Option<BufferIndex>,
    meta: PacketMeta,
}

impl Segment {
    fn new(pre_data: usize, data_size: usize) -> Self {
        Self {
            storage: vec![0u8; pre_data + data_size].into_boxed_slice(),
            pre_data,
            current_data: pre_data,
            current_length: 0,
            flags: BufferFlags::empty(),
            next: None,
            meta: PacketMeta::default(),
        }
    }

    fn clear(&mut self) {
        self.current_data = self.pre_data;
        self.current_length = 0;
        self.flags = BufferFlags::empty();
        self.next = None;
        self.meta = PacketMeta::default();
    }

    pub fn data_size(&self) -> usize {
        self.storage.len() - self.pre_data
    }

    pub fn pre_data_size(&self) -> usize {
        self.pre_data
    }

    /// Offset of the payload from the start of the segment, headroom included.
    pub fn current_data(&self) -> usize {
        self.current_data
    }

    pub fn current_length(&self) -> usize {
        self.current_length
    }

    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: BufferFlags) {
        self.flags.insert(flags);
    }

    pub fn next(&self) -> Option<BufferIndex> {
        self.next
    }

    pub fn is_chained(&self) -> bool {
        self.flags.contains(BufferFlags::NEXT_PRESENT)
    }

    pub fn meta(&self) -> &PacketMeta {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut PacketMeta {
        &mut self.meta
    }

    pub fn payload(&self) -> &[u8] {
        &self.storage[self.current_data..self.current_data + self.current_length]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.current_data..self.current_data + self.current_length]
    }

    /// Move the (empty) payload window so it starts `offset` bytes into the segment.
    ///
    /// The offset is clamped to the headroom so a full `data_size` payload always fits behind it.
    pub fn set_current_data(&mut self, offset: usize) {
        self.current_data = offset.min(self.pre_data);
        self.current_length = 0;
    }

    /// Bytes that can still be appended behind the current payload.
    pub fn tailroom(&self) -> usize {
        self.storage.len() - (self.current_data + self.current_length)
    }

    /// Append as much of `bytes` as fits and return the number of bytes written.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.tailroom());
        let end = self.current_data + self.current_length;
        self.storage[end..end + n].copy_from_slice(&bytes[..n]);
        self.current_length += n;
        n
    }

    /// Rewind the payload window to the start of the data area.
    ///
    /// Bytes between the data start and the old `current_data` become part of the payload. A
    /// payload that starts inside the headroom is moved to the data start instead, or left where
    /// it is if it is longer than the data area. The payload bytes are never dropped.
    pub fn reset(&mut self) {
        if self.current_data >= self.pre_data {
            self.current_length += self.current_data - self.pre_data;
            self.current_data = self.pre_data;
        } else if self.current_length <= self.data_size() {
            let end = self.current_data + self.current_length;
            self.storage.copy_within(self.current_data..end, self.pre_data);
            self.current_data = self.pre_data;
        }
    }

    /// Write `bytes` into the headroom directly in front of the payload.
    ///
    /// Returns `false` and leaves the segment untouched if there is not enough headroom.
    pub fn prepend(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.current_data {
            return false;
        }
        self.current_data -= bytes.len();
        self.current_length += bytes.len();
        self.storage[self.current_data..self.current_data + bytes.len()].copy_from_slice(bytes);
        true
    }

    /// Shrink the payload to `len` bytes. Larger values are ignored.
    pub fn truncate(&mut self, len: usize) {
        self.current_length = self.current_length.min(len);
    }

    pub(crate) fn link(&mut self, next: Option<BufferIndex>) {
        self.next = next;
        self.flags.set(BufferFlags::NEXT_PRESENT, next.is_some());
    }
}

/// The shared allocator every segment handle comes from.
#[derive(Debug)]
pub struct BufferPool {
    segments: Vec<Segment>,
    free: Vec<BufferIndex>,
    is_free: Vec<bool>,
    config: BufferConfig,
}

impl BufferPool {
    pub fn new(config: BufferConfig) -> Self {
        assert!(config.data_size > 0, "segments need a non-empty data area");
        assert!(u32::try_from(config.n_buffers).is_ok());

        let segments = (0..config.n_buffers)
            .map(|_| Segment::new(config.pre_data_size, config.data_size))
            .collect();
        // Lowest indices are handed out first.
        let free = (0..config.n_buffers as u32).rev().map(BufferIndex).collect();
        Self {
            segments,
            free,
            is_free: vec![true; config.n_buffers],
            config,
        }
    }

    pub fn total(&self) -> usize {
        self.segments.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn owned_count(&self) -> usize {
        self.total() - self.free_count()
    }

    pub fn config(&self) -> BufferConfig {
        self.config
    }

    pub fn data_size(&self) -> usize {
        self.config.data_size
    }

    pub fn pre_data_size(&self) -> usize {
        self.config.pre_data_size
    }

    /// Allocate up to `n` handles into `out`, returning how many were allocated.
    pub fn alloc_into(&mut self, out: &mut Vec<BufferIndex>, n: usize) -> usize {
        let n = n.min(self.free.len());
        for _ in 0..n {
            if let Some(bi) = self.free.pop() {
                self.is_free[bi.slot()] = false;
                out.push(bi);
            }
        }
        n
    }

    /// Allocate exactly `n` handles or nothing at all.
    pub fn alloc_exact(&mut self, n: usize) -> Result<Vec<BufferIndex>, BufferError> {
        if n > self.free.len() {
            return Err(BufferError::ResourceExhausted {
                requested: n,
                available: self.free.len(),
            });
        }
        let mut out = Vec::with_capacity(n);
        self.alloc_into(&mut out, n);
        Ok(out)
    }

    /// Return a single segment to the free list without following its `next` link.
    pub fn free_one(&mut self, bi: BufferIndex) {
        debug_assert!(!self.is_free[bi.slot()], "double free of {bi:?}");
        self.segments[bi.slot()].clear();
        self.is_free[bi.slot()] = true;
        self.free.push(bi);
    }

    /// Return `head` and every segment linked behind it.
    pub fn free_chain(&mut self, head: BufferIndex) {
        let mut cursor = Some(head);
        while let Some(bi) = cursor {
            cursor = self.segments[bi.slot()].next;
            self.free_one(bi);
        }
    }

    pub fn get(&self, bi: BufferIndex) -> &Segment {
        &self.segments[bi.slot()]
    }

    pub fn get_mut(&mut self, bi: BufferIndex) -> &mut Segment {
        &mut self.segments[bi.slot()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool(n: usize) -> BufferPool {
        BufferPool::new(BufferConfig {
            data_size: 16,
            pre_data_size: 8,
            n_buffers: n,
        })
    }

    #[test]
    fn alloc_hands_out_lowest_indices_first() {
        let mut pool = small_pool(4);
        let got = pool.alloc_exact(2).unwrap();
        assert_eq!(got, vec![BufferIndex(0), BufferIndex(1)]);
        assert_eq!(pool.free_count(), 2);
        assert_eq!(pool.owned_count(), 2);
    }

    #[test]
    fn alloc_exact_fails_without_side_effects() {
        let mut pool = small_pool(2);
        assert_eq!(
            pool.alloc_exact(3),
            Err(BufferError::ResourceExhausted {
                requested: 3,
                available: 2
            })
        );
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn append_is_bounded_by_tailroom() {
        let mut pool = small_pool(1);
        let bi = pool.alloc_exact(1).unwrap()[0];
        let seg = pool.get_mut(bi);
        assert_eq!(seg.append(&[7u8; 20]), 16);
        assert_eq!(seg.current_length(), 16);
        assert_eq!(seg.tailroom(), 0);
    }

    #[test]
    fn set_current_data_is_clamped_to_headroom() {
        let mut pool = small_pool(1);
        let bi = pool.alloc_exact(1).unwrap()[0];
        let seg = pool.get_mut(bi);
        seg.set_current_data(100);
        assert_eq!(seg.current_data(), 8);
        assert_eq!(seg.append(&[1u8; 16]), 16);
    }

    #[test]
    fn reset_then_prepend_puts_bytes_in_front() {
        let mut pool = small_pool(1);
        let bi = pool.alloc_exact(1).unwrap()[0];
        let seg = pool.get_mut(bi);
        seg.append(&[0xaa, 0xbb]);
        seg.reset();
        assert!(seg.prepend(&[1, 2, 3]));
        assert_eq!(seg.payload(), &[1, 2, 3, 0xaa, 0xbb]);
        assert_eq!(seg.current_data(), 5);
    }

    #[test]
    fn reset_absorbs_bytes_skipped_past_data_start() {
        let mut pool = small_pool(1);
        let bi = pool.alloc_exact(1).unwrap()[0];
        let seg = pool.get_mut(bi);
        seg.append(&[1, 2, 3, 4]);
        // Pretend an earlier node consumed a 2-byte header.
        seg.current_data += 2;
        seg.current_length -= 2;
        seg.reset();
        assert_eq!(seg.payload(), &[1, 2, 3, 4]);
    }

    #[test]
    fn reset_moves_a_payload_out_of_the_headroom() {
        let mut pool = small_pool(1);
        let bi = pool.alloc_exact(1).unwrap()[0];
        let seg = pool.get_mut(bi);
        seg.set_current_data(0);
        seg.append(&[1, 2, 3, 4, 5]);
        seg.reset();
        assert_eq!(seg.current_data(), 8);
        assert_eq!(seg.payload(), &[1, 2, 3, 4, 5]);
        assert!(seg.prepend(&[9, 9]));
        assert_eq!(seg.payload(), &[9, 9, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn reset_keeps_a_payload_too_long_to_move() {
        let mut pool = small_pool(1);
        let bi = pool.alloc_exact(1).unwrap()[0];
        let seg = pool.get_mut(bi);
        seg.set_current_data(3);
        let bytes: Vec<u8> = (0..20).collect();
        assert_eq!(seg.append(&bytes), 20);
        seg.reset();
        assert_eq!(seg.current_data(), 3);
        assert_eq!(seg.payload(), &bytes[..]);
    }

    #[test]
    fn prepend_without_headroom_is_rejected() {
        let mut pool = BufferPool::new(BufferConfig {
            data_size: 16,
            pre_data_size: 2,
            n_buffers: 1,
        });
        let bi = pool.alloc_exact(1).unwrap()[0];
        let seg = pool.get_mut(bi);
        seg.append(&[9]);
        assert!(!seg.prepend(&[0u8; 6]));
        assert_eq!(seg.payload(), &[9]);
    }

    #[test]
    fn free_chain_follows_next_links_and_clears_state() {
        let mut pool = small_pool(3);
        let got = pool.alloc_exact(3).unwrap();
        pool.get_mut(got[0]).link(Some(got[1]));
        pool.get_mut(got[1]).link(Some(got[2]));
        pool.get_mut(got[0]).append(&[1, 2]);

        pool.free_chain(got[0]);
        assert_eq!(pool.free_count(), 3);
        let seg = pool.get(got[0]);
        assert_eq!(seg.current_length(), 0);
        assert!(!seg.is_chained());
        assert_eq!(seg.next(), None);
    }
}
