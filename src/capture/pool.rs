//! Three-slot frame arena with role rotation
//!
//! Each stream owns three equally sized buffers. Roles (back, mid, front)
//! are arena indices, so handing a frame from the driver to the publish path
//! is an index swap rather than a copy.

use thiserror::Error;

const SLOTS: usize = 3;

/// Stage of a buffer in the capture pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRole {
    /// Being filled by the driver
    Back,
    /// Most recently completed frame
    Mid,
    /// Reserved for a downstream consumer
    Front,
}

/// A buffer lent to the driver for filling.
///
/// The slot index travels with the memory so the arena can check that the
/// driver returns the buffer it was given.
#[derive(Debug)]
pub struct VideoBuffer {
    slot: usize,
    data: Box<[u8]>,
}

impl VideoBuffer {
    #[cfg(test)]
    pub(crate) fn forged(slot: usize, len: usize) -> Self {
        Self {
            slot,
            data: vec![0; len].into_boxed_slice(),
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferIdentity {
    #[error("driver returned slot {returned}, expected back slot {expected}")]
    WrongSlot { returned: usize, expected: usize },
    #[error("back slot {0} was not lent to the driver")]
    NotLent(usize),
    #[error("driver returned a {returned} byte buffer, arena buffers are {expected} bytes")]
    WrongLength { returned: usize, expected: usize },
}

pub struct FrameArena {
    slots: [Option<Box<[u8]>>; SLOTS],
    buffer_len: usize,
    back: usize,
    mid: usize,
    front: usize,
}

impl FrameArena {
    /// Allocate three zeroed buffers of `buffer_len` bytes
    pub fn new(buffer_len: usize) -> Self {
        let alloc = || Some(vec![0u8; buffer_len].into_boxed_slice());
        Self {
            slots: [alloc(), alloc(), alloc()],
            buffer_len,
            back: 0,
            mid: 1,
            front: 2,
        }
    }

    pub fn slot_of(&self, role: SlotRole) -> usize {
        match role {
            SlotRole::Back => self.back,
            SlotRole::Mid => self.mid,
            SlotRole::Front => self.front,
        }
    }

    /// Whether the back buffer is currently out with the driver
    pub fn is_back_lent(&self) -> bool {
        self.slots[self.back].is_none()
    }

    /// Lend the back buffer to the driver. Returns `None` if it is already out.
    pub fn lend_back(&mut self) -> Option<VideoBuffer> {
        let data = self.slots[self.back].take()?;
        Some(VideoBuffer {
            slot: self.back,
            data,
        })
    }

    /// Accept a filled back buffer, promote it to mid and lend the old mid
    /// out as the new back.
    pub fn rotate(&mut self, filled: VideoBuffer) -> Result<VideoBuffer, BufferIdentity> {
        if filled.slot != self.back {
            return Err(BufferIdentity::WrongSlot {
                returned: filled.slot,
                expected: self.back,
            });
        }
        if !self.is_back_lent() {
            return Err(BufferIdentity::NotLent(self.back));
        }
        if filled.data.len() != self.buffer_len {
            return Err(BufferIdentity::WrongLength {
                returned: filled.data.len(),
                expected: self.buffer_len,
            });
        }

        self.slots[filled.slot] = Some(filled.data);
        std::mem::swap(&mut self.back, &mut self.mid);

        // The old mid was resident, so this only fails if bookkeeping is broken.
        self.lend_back().ok_or(BufferIdentity::NotLent(self.back))
    }

    /// Contents of the slot holding `role`, if it is resident
    pub fn get(&self, role: SlotRole) -> Option<&[u8]> {
        self.slots[self.slot_of(role)].as_deref()
    }

    pub fn get_mut(&mut self, role: SlotRole) -> Option<&mut [u8]> {
        let slot = self.slot_of(role);
        self.slots[slot].as_deref_mut()
    }
}
