//! Host (firmware) side of a vring.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::io::SharedMem;
use crate::notify::Notify;
use crate::vring::{Descriptor, UsedElem, VRING_DESC_F_NEXT, VringLayout, read_descriptor};

/// Firmware end of one vring.
///
/// Takes buffers the OS side made available and hands them back through the
/// used ring.  Only ever writes the used ring's index; only ever reads the
/// available ring's index.
pub struct HostVring<I: SharedMem, K: Notify> {
    io: I,
    layout: VringLayout,
    notify: K,
    avail_tail: u16,
}

impl<I: SharedMem, K: Notify> HostVring<I, K> {
    /// Attach to a vring which the OS side has set up at `base`.
    ///
    /// Arguments:
    /// - `io` - Object implementing [`SharedMem`] to access the ring
    /// - `base` - Bus address of the vring, as assigned by the OS side
    /// - `num` - Number of descriptors, a power of two
    /// - `notify` - Called to kick the OS side after a publish
    ///
    /// The caller guarantees the memory at `base` is valid for a vring of
    /// `num` descriptors.  By convention both sides' indices start at 0.
    pub fn new(io: I, base: u32, num: u16, notify: K) -> Self {
        let layout = VringLayout::new(base, num);

        debug!(
            "Vring at {base:#010X}: avail {:#010X} used {:#010X} len {:#X}",
            layout.avail(),
            layout.used(),
            layout.len()
        );

        Self {
            io,
            layout,
            notify,
            avail_tail: 0,
        }
    }

    /// Consumer: take the next buffer the OS side has made available.
    ///
    /// Returns the descriptor index, or `None` if no buffer is ready.
    pub fn try_take_incoming(&mut self) -> Option<u16> {
        let avail_head = self.io.read_u16(self.layout.avail_idx_addr());
        if avail_head == self.avail_tail {
            return None;
        }

        let desc_idx = self
            .io
            .read_u16(self.layout.avail_entry_addr(self.avail_tail));
        trace!(
            "Took desc {desc_idx} (avail head {avail_head} tail {})",
            self.avail_tail
        );
        self.avail_tail = self.avail_tail.wrapping_add(1);

        Some(desc_idx)
    }

    /// Consumer: check whether a buffer is available, without taking it.
    pub fn has_incoming(&self) -> bool {
        self.io.read_u16(self.layout.avail_idx_addr()) != self.avail_tail
    }

    /// Producer: hand descriptor `desc_idx` back to the OS side.
    ///
    /// Arguments:
    /// - `desc_idx` - Index obtained from [`Self::try_take_incoming()`]
    /// - `len` - Number of bytes written to the buffer
    /// - `kick` - Whether to notify the OS side afterwards
    ///
    /// An index outside the ring is logged and ignored.
    pub fn publish(&mut self, desc_idx: u16, len: u32, kick: bool) {
        if desc_idx >= self.layout.num() {
            error!("Publishing invalid desc {desc_idx}");
            return;
        }

        let used_idx = self.io.read_u16(self.layout.used_idx_addr());

        // The OS side may have left chaining flags set
        let desc_addr = self.layout.desc_addr(desc_idx);
        let flags = self.io.read_u16(desc_addr + Descriptor::flags_offset());
        self.io
            .write_u16(desc_addr + Descriptor::flags_offset(), flags & !VRING_DESC_F_NEXT);
        self.io.write_u16(desc_addr + Descriptor::next_offset(), 0);

        let entry = self.layout.used_entry_addr(used_idx);
        self.io
            .write_u32(entry + UsedElem::id_offset(), desc_idx as u32);
        self.io.write_u32(entry + UsedElem::len_offset(), len);

        // Entry must be visible before the index moves
        self.io.barrier();
        self.io
            .write_u16(self.layout.used_idx_addr(), used_idx.wrapping_add(1));
        self.io.barrier();
        self.io.flush(self.layout.base(), self.layout.len());

        trace!(
            "Published desc {desc_idx} in used slot {}",
            used_idx % self.layout.num()
        );

        if kick {
            self.notify.notify();
        }
    }

    /// Read descriptor `desc_idx`.
    pub fn descriptor(&self, desc_idx: u16) -> Descriptor {
        read_descriptor(&self.io, &self.layout, desc_idx)
    }

    /// Clean and invalidate the whole vring from the local data cache.
    pub fn flush(&self) {
        self.io.flush(self.layout.base(), self.layout.len());
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

#[cfg(test)]
mod test {
    use super::*;
    use crate::io::SliceIo;
    use crate::vring::GuestVring;
    use core::cell::Cell;

    const BASE: u32 = 0x1000;
    const NUM: u16 = 16;
    const BUFS: u32 = 0x4000;

    #[derive(Default)]
    struct KickLog(Cell<u32>);

    impl Notify for KickLog {
        fn notify(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    fn memory() -> [u8; 0x4000 + 16 * 64] {
        [0u8; 0x4000 + 16 * 64]
    }

    #[test]
    fn nothing_available_initially() {
        let mut mem = memory();
        let io = SliceIo::new(BASE, &mut mem);
        let _guest = GuestVring::new(io, BASE, NUM, BUFS, 64);
        let kicks = KickLog::default();
        let mut host = HostVring::new(io, BASE, NUM, &kicks);

        assert!(!host.has_incoming());
        assert_eq!(host.try_take_incoming(), None);
    }

    #[test]
    fn fifo_order() {
        let mut mem = memory();
        let io = SliceIo::new(BASE, &mut mem);
        let mut guest = GuestVring::new(io, BASE, NUM, BUFS, 64);
        let kicks = KickLog::default();
        let mut host = HostVring::new(io, BASE, NUM, &kicks);

        for idx in [5, 2, 9, 0] {
            guest.make_available(idx);
        }
        assert!(host.has_incoming());
        assert_eq!(host.try_take_incoming(), Some(5));
        assert_eq!(host.try_take_incoming(), Some(2));
        assert_eq!(host.try_take_incoming(), Some(9));
        assert_eq!(host.try_take_incoming(), Some(0));
        assert_eq!(host.try_take_incoming(), None);
    }

    #[test]
    fn publish_returns_buffer_and_kicks() {
        let mut mem = memory();
        let io = SliceIo::new(BASE, &mut mem);
        let mut guest = GuestVring::new(io, BASE, NUM, BUFS, 64);
        let kicks = KickLog::default();
        let mut host = HostVring::new(io, BASE, NUM, &kicks);

        guest.make_available(3);
        let idx = host.try_take_incoming().unwrap();
        host.publish(idx, 40, true);
        host.publish(idx, 40, false);

        assert_eq!(kicks.0.get(), 1);
        assert_eq!(guest.take_used(), Some(UsedElem { id: 3, len: 40 }));
        assert_eq!(guest.take_used(), Some(UsedElem { id: 3, len: 40 }));
        assert_eq!(guest.take_used(), None);
    }

    #[test]
    fn publish_ignores_index_outside_ring() {
        let mut mem = memory();
        let io = SliceIo::new(BASE, &mut mem);
        let mut guest = GuestVring::new(io, BASE, NUM, BUFS, 64);
        let kicks = KickLog::default();
        let mut host = HostVring::new(io, BASE, NUM, &kicks);

        host.publish(NUM, 40, true);
        host.publish(u16::MAX, 40, true);

        assert_eq!(kicks.0.get(), 0);
        assert_eq!(io.read_u16(host.layout().used_idx_addr()), 0);
        assert_eq!(guest.take_used(), None);
    }

    #[test]
    fn publish_clears_chaining() {
        let mut mem = memory();
        let io = SliceIo::new(BASE, &mut mem);
        let mut guest = GuestVring::new(io, BASE, NUM, BUFS, 64);
        let kicks = KickLog::default();
        let mut host = HostVring::new(io, BASE, NUM, &kicks);

        let desc = host.layout().desc_addr(1);
        io.write_u16(desc + Descriptor::flags_offset(), VRING_DESC_F_NEXT | 2);
        io.write_u16(desc + Descriptor::next_offset(), 7);

        guest.make_available(1);
        let idx = host.try_take_incoming().unwrap();
        host.publish(idx, 0, false);

        let d = host.descriptor(1);
        assert_eq!({ d.flags }, 2);
        assert_eq!({ d.next }, 0);
        assert_eq!({ d.addr }, BUFS + 64);
    }

    #[test]
    fn no_double_consumption() {
        let mut mem = memory();
        let io = SliceIo::new(BASE, &mut mem);
        let mut guest = GuestVring::new(io, BASE, NUM, BUFS, 64);
        let kicks = KickLog::default();
        let mut host = HostVring::new(io, BASE, NUM, &kicks);

        guest.make_available(4);
        guest.make_available(6);
        let first = host.try_take_incoming().unwrap();
        let second = host.try_take_incoming().unwrap();
        assert_ne!(first, second);
        assert_eq!(host.try_take_incoming(), None);

        // Only reappears once published back and re-offered
        host.publish(first, 0, false);
        assert_eq!(host.try_take_incoming(), None);
        let returned = guest.take_used().unwrap();
        guest.make_available({ returned.id } as u16);
        assert_eq!(host.try_take_incoming(), Some(first));
    }

    #[test]
    fn indices_survive_u16_wraparound() {
        let mut mem = memory();
        let io = SliceIo::new(BASE, &mut mem);
        let mut guest = GuestVring::new(io, BASE, NUM, BUFS, 64);
        let kicks = KickLog::default();
        let mut host = HostVring::new(io, BASE, NUM, &kicks);

        // Cycle a few buffers through the ring well past 65535
        let rounds = u16::MAX as u32 + 100;
        for round in 0..rounds {
            let idx = (round % 3) as u16;
            guest.make_available(idx);
            assert!(host.has_incoming());
            assert_eq!(host.try_take_incoming(), Some(idx));
            assert!(!host.has_incoming());
            host.publish(idx, round, false);
            let used = guest.take_used().unwrap();
            assert_eq!({ used.id }, idx as u32);
            assert_eq!({ used.len }, round);
        }
        assert_eq!(io.read_u16(host.layout().used_idx_addr()), 99);
    }
}
