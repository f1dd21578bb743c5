//! Virtio rings (vrings) shared with the OS core.
//!
//! A vring moves ownership of buffers in one direction between two cores.
//! It consists of a descriptor array, an *available* ring and a *used* ring,
//! laid out contiguously in shared memory:
//!
//! ```text
//! +--------------------------+  base
//! | Descriptor[num] (16 B)   |
//! +--------------------------+
//! | avail: flags, idx,       |
//! |        ring[num], event  |
//! +--------------------------+
//! | zero padding to 4 KiB    |
//! +--------------------------+  page boundary
//! | used:  flags, idx,       |
//! |        UsedElem[num]     |
//! +--------------------------+
//! ```
//!
//! With rpmsg the usual virtio roles are swapped: the OS core acts as the
//! *guest* and only writes the available ring, the bare-metal core acts as
//! the *host* and only writes the used ring.  Both `idx` fields are
//! free-running u16 counters, and are only ever compared for equality, so
//! wraparound at 65536 needs no special handling.
//!
//! - [`HostVring`] - firmware side, consumes available buffers and
//!   publishes them back as used
//! - [`GuestVring`] - OS side, offers buffers and reclaims used ones

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod guest;
pub mod host;

pub use guest::GuestVring;
pub use host::HostVring;

use core::mem::{offset_of, size_of};

/// Default number of descriptors per vring.  Must match the OS side.
pub const RING_SIZE: u16 = 256;

/// Alignment of the used ring
pub const VRING_ALIGN: u32 = 4096;

/// Descriptor continues via the `next` field
pub const VRING_DESC_F_NEXT: u16 = 1;

/// Buffer is write-only for the device
pub const VRING_DESC_F_WRITE: u16 = 2;

/// One buffer descriptor.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Descriptor {
    /// Bus address of the buffer
    pub addr: u32,

    /// Upper address word, always zero on this 32-bit system
    pub addr_hi: u32,

    /// Buffer length in bytes
    pub len: u32,

    /// Chaining flags
    pub flags: u16,

    /// Index of the next descriptor in a chain
    pub next: u16,
}

impl Descriptor {
    pub const SIZE: u32 = size_of::<Self>() as u32;

    pub const fn addr_offset() -> u32 {
        offset_of!(Descriptor, addr) as u32
    }

    pub const fn addr_hi_offset() -> u32 {
        offset_of!(Descriptor, addr_hi) as u32
    }

    pub const fn len_offset() -> u32 {
        offset_of!(Descriptor, len) as u32
    }

    pub const fn flags_offset() -> u32 {
        offset_of!(Descriptor, flags) as u32
    }

    pub const fn next_offset() -> u32 {
        offset_of!(Descriptor, next) as u32
    }
}

/// Entry of the used ring.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsedElem {
    /// Index of the descriptor being returned
    pub id: u32,

    /// Number of bytes written to the buffer
    pub len: u32,
}

impl UsedElem {
    pub const SIZE: u32 = size_of::<Self>() as u32;

    pub const fn id_offset() -> u32 {
        offset_of!(UsedElem, id) as u32
    }

    pub const fn len_offset() -> u32 {
        offset_of!(UsedElem, len) as u32
    }
}

// Both rings start with u16 flags followed by the u16 free-running index.
const RING_FLAGS_OFFSET: u32 = 0;
const RING_IDX_OFFSET: u32 = 2;
const RING_ENTRIES_OFFSET: u32 = 4;

/// Addresses of one vring's parts, computed from its base address.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VringLayout {
    num: u16,
    desc: u32,
    avail: u32,
    used: u32,
    len: usize,
}

impl VringLayout {
    /// Compute the layout of a vring with `num` descriptors at `base`.
    ///
    /// `num` must be a power of two.
    pub const fn new(base: u32, num: u16) -> Self {
        debug_assert!(num.is_power_of_two());

        let desc = base;
        let avail = desc + num as u32 * Descriptor::SIZE;
        let avail_end = avail + Self::avail_size(num);
        let used = avail_end.next_multiple_of(VRING_ALIGN);
        let len = (used + Self::used_size(num) - base) as usize;

        Self {
            num,
            desc,
            avail,
            used,
            len,
        }
    }

    /// Total bytes needed for a vring with `num` descriptors, padding
    /// included.  Assumes a page-aligned base.
    pub const fn size(num: u16) -> usize {
        Self::new(0, num).len
    }

    const fn avail_size(num: u16) -> u32 {
        // flags, idx, ring[num], used_event
        RING_ENTRIES_OFFSET + num as u32 * 2 + 2
    }

    const fn used_size(num: u16) -> u32 {
        RING_ENTRIES_OFFSET + num as u32 * UsedElem::SIZE
    }

    /// Number of descriptors
    pub fn num(&self) -> u16 {
        self.num
    }

    /// Base address, also the address of the descriptor array
    pub fn base(&self) -> u32 {
        self.desc
    }

    /// Bytes covered by the whole vring, padding included
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false - a vring has at least one descriptor
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address of the available ring
    pub fn avail(&self) -> u32 {
        self.avail
    }

    /// Address of the used ring
    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn desc_addr(&self, idx: u16) -> u32 {
        self.desc + idx as u32 * Descriptor::SIZE
    }

    pub fn avail_flags_addr(&self) -> u32 {
        self.avail + RING_FLAGS_OFFSET
    }

    pub fn avail_idx_addr(&self) -> u32 {
        self.avail + RING_IDX_OFFSET
    }

    /// Address of available ring slot for free-running index `idx`
    pub fn avail_entry_addr(&self, idx: u16) -> u32 {
        self.avail + RING_ENTRIES_OFFSET + self.slot(idx) * 2
    }

    pub fn used_flags_addr(&self) -> u32 {
        self.used + RING_FLAGS_OFFSET
    }

    pub fn used_idx_addr(&self) -> u32 {
        self.used + RING_IDX_OFFSET
    }

    /// Address of used ring slot for free-running index `idx`
    pub fn used_entry_addr(&self, idx: u16) -> u32 {
        self.used + RING_ENTRIES_OFFSET + self.slot(idx) * UsedElem::SIZE
    }

    fn slot(&self, idx: u16) -> u32 {
        (idx % self.num) as u32
    }
}

// Helper functions shared by both roles

fn read_descriptor<I: crate::io::SharedMem>(io: &I, layout: &VringLayout, idx: u16) -> Descriptor {
    let base = layout.desc_addr(idx);
    Descriptor {
        addr: io.read_u32(base + Descriptor::addr_offset()),
        addr_hi: io.read_u32(base + Descriptor::addr_hi_offset()),
        len: io.read_u32(base + Descriptor::len_offset()),
        flags: io.read_u16(base + Descriptor::flags_offset()),
        next: io.read_u16(base + Descriptor::next_offset()),
    }
}
