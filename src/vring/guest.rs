//! Guest (OS) side of a vring.
//!
//! The OS side owns the buffers.  It offers them through the available ring
//! and gets them back through the used ring.  On the OS core this is done by
//! the kernel's virtio driver; this implementation exists to drive the
//! firmware from user-space tooling or a simulation.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::io::SharedMem;
use crate::vring::{Descriptor, UsedElem, VringLayout, read_descriptor};

/// OS end of one vring.
pub struct GuestVring<I: SharedMem> {
    io: I,
    layout: VringLayout,
    avail_head: u16,
    last_used: u16,
}

impl<I: SharedMem> GuestVring<I> {
    /// Set up a vring at `base`, zeroing both rings and pointing descriptor
    /// `i` at the buffer at `buffers + i * buf_size`.
    ///
    /// Arguments:
    /// - `io` - Object implementing [`SharedMem`] to access the ring
    /// - `base` - Bus address of the vring
    /// - `num` - Number of descriptors, a power of two
    /// - `buffers` - Bus address of `num` contiguous buffers
    /// - `buf_size` - Size of each buffer in bytes
    pub fn new(io: I, base: u32, num: u16, buffers: u32, buf_size: u32) -> Self {
        let layout = VringLayout::new(base, num);

        for idx in 0..num {
            let desc = layout.desc_addr(idx);
            io.write_u32(desc + Descriptor::addr_offset(), buffers + idx as u32 * buf_size);
            io.write_u32(desc + Descriptor::addr_hi_offset(), 0);
            io.write_u32(desc + Descriptor::len_offset(), buf_size);
            io.write_u16(desc + Descriptor::flags_offset(), 0);
            io.write_u16(desc + Descriptor::next_offset(), 0);
        }
        io.write_u16(layout.avail_flags_addr(), 0);
        io.write_u16(layout.avail_idx_addr(), 0);
        io.write_u16(layout.used_flags_addr(), 0);
        io.write_u16(layout.used_idx_addr(), 0);
        io.barrier();

        debug!("Guest vring at {base:#010X}, {num} buffers of {buf_size} bytes at {buffers:#010X}");

        Self {
            io,
            layout,
            avail_head: 0,
            last_used: 0,
        }
    }

    /// Producer: offer descriptor `desc_idx` to the firmware.
    pub fn make_available(&mut self, desc_idx: u16) {
        self.io
            .write_u16(self.layout.avail_entry_addr(self.avail_head), desc_idx);

        // Entry must be visible before the index moves
        self.io.barrier();
        self.avail_head = self.avail_head.wrapping_add(1);
        self.io
            .write_u16(self.layout.avail_idx_addr(), self.avail_head);
        self.io.barrier();

        trace!("Made desc {desc_idx} available, avail head {}", self.avail_head);
    }

    /// Consumer: take the next buffer the firmware has returned.
    pub fn take_used(&mut self) -> Option<UsedElem> {
        let used_head = self.io.read_u16(self.layout.used_idx_addr());
        if used_head == self.last_used {
            return None;
        }

        let entry = self.layout.used_entry_addr(self.last_used);
        let elem = UsedElem {
            id: self.io.read_u32(entry + UsedElem::id_offset()),
            len: self.io.read_u32(entry + UsedElem::len_offset()),
        };
        self.last_used = self.last_used.wrapping_add(1);

        Some(elem)
    }

    /// Consumer: check whether the firmware has returned a buffer.
    pub fn has_used(&self) -> bool {
        self.io.read_u16(self.layout.used_idx_addr()) != self.last_used
    }

    /// Read descriptor `desc_idx`.
    pub fn descriptor(&self, desc_idx: u16) -> Descriptor {
        read_descriptor(&self.io, &self.layout, desc_idx)
    }

    /// The vring's layout
    pub fn layout(&self) -> &VringLayout {
        &self.layout
    }

    /// Shared memory access used by this vring
    pub fn io(&self) -> &I {
        &self.io
    }
}
