//! Transport descriptor exchanged with the external stack.
//!
//! A descriptor owns its backing buffer. The payload starts `data_off` bytes into that buffer and
//! runs for `data_len` bytes. Packets larger than one descriptor continue in a boxed `next`
//! descriptor; only the head's `pkt_len` is meaningful and equals the sum of `data_len` over the
//! whole continuation chain.

/// Headroom reserved in front of the payload by [`TransportDescriptor::from_payload`].
pub const DEFAULT_HEADROOM: u16 = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportDescriptor {
    buf: Vec<u8>,
    data_off: u16,
    data_len: u32,
    pkt_len: u32,
    next: Option<Box<TransportDescriptor>>,
}

impl TransportDescriptor {
    pub fn from_payload(payload: &[u8]) -> Self {
        Self::with_headroom(DEFAULT_HEADROOM, payload)
    }

    pub fn with_headroom(headroom: u16, payload: &[u8]) -> Self {
        let mut buf = vec![0u8; usize::from(headroom) + payload.len()];
        buf[usize::from(headroom)..].copy_from_slice(payload);
        let len = payload_len(payload);
        Self {
            buf,
            data_off: headroom,
            data_len: len,
            pkt_len: len,
            next: None,
        }
    }

    /// Append a continuation segment and grow the head's packet length.
    pub fn push_segment(&mut self, headroom: u16, payload: &[u8]) {
        self.pkt_len = self.pkt_len.saturating_add(payload_len(payload));
        let mut seg = Self::with_headroom(headroom, payload);
        seg.pkt_len = 0;

        let mut slot = &mut self.next;
        while let Some(next) = slot {
            slot = &mut next.next;
        }
        *slot = Some(Box::new(seg));
    }

    /// Offset of the payload inside the backing buffer.
    pub fn data_off(&self) -> u16 {
        self.data_off
    }

    /// Length of this segment's payload.
    pub fn data_len(&self) -> u32 {
        self.data_len
    }

    /// Length of the whole packet (head segment only).
    pub fn pkt_len(&self) -> u32 {
        self.pkt_len
    }

    /// Whether a continuation segment follows.
    pub fn has_more(&self) -> bool {
        self.next.is_some()
    }

    pub fn next(&self) -> Option<&TransportDescriptor> {
        self.next.as_deref()
    }

    pub fn payload(&self) -> &[u8] {
        let start = usize::from(self.data_off);
        &self.buf[start..start + self.data_len as usize]
    }

    /// This descriptor followed by every continuation segment.
    pub fn segments(&self) -> impl Iterator<Item = &TransportDescriptor> {
        core::iter::successors(Some(self), |seg| seg.next())
    }

    pub fn nb_segs(&self) -> usize {
        self.segments().count()
    }

    /// Whether `pkt_len` matches the sum of the segment lengths.
    pub fn is_consistent(&self) -> bool {
        let sum: u64 = self.segments().map(|seg| u64::from(seg.data_len)).sum();
        sum == u64::from(self.pkt_len)
    }

    /// Concatenate every segment's payload.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pkt_len as usize);
        for seg in self.segments() {
            out.extend_from_slice(seg.payload());
        }
        out
    }
}

fn payload_len(payload: &[u8]) -> u32 {
    u32::try_from(payload.len()).unwrap_or(u32::MAX)
}
