//! Shared-memory access.
//!
//! Every read and write of the memory region shared between the bare-metal
//! core and the OS core goes through [`SharedMem`].  Nothing above this
//! module dereferences a raw pointer, issues a barrier or touches the data
//! cache directly.
//!
//! # Implementations
//!
//! - [`RamIo`] - volatile access to physical addresses, used by the firmware
//!   on the target.  Cache maintenance is delegated to a board-supplied hook,
//!   as the two cores are not assumed to be cache-coherent for this region.
//! - [`SliceIo`] - access to an ordinary byte slice standing in for a
//!   physical window.  Used for simulating the peer and by tooling which
//!   maps the region into its own address space.
//!
//! # Address Space
//!
//! Addresses are 32-bit bus addresses as both cores see them.  All
//! multi-byte values in the region are little-endian.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::cell::Cell;
use core::sync::atomic::{Ordering, fence};

/// Access to the memory region shared with the peer core.
///
/// Methods take `&self` so a single instance can back both vrings.  None of
/// them can fail: the caller guarantees addresses lie within the region.
pub trait SharedMem {
    /// Read a u16
    fn read_u16(&self, addr: u32) -> u16;

    /// Write a u16
    fn write_u16(&self, addr: u32, value: u16);

    /// Read a u32
    fn read_u32(&self, addr: u32) -> u32;

    /// Write a u32
    fn write_u32(&self, addr: u32, value: u32);

    /// Bulk read, no need for atomicity
    fn read_bytes(&self, addr: u32, buf: &mut [u8]);

    /// Bulk write, no need for atomicity
    fn write_bytes(&self, addr: u32, data: &[u8]);

    /// Full memory barrier.  All prior writes are visible to the peer before
    /// any later write.
    fn barrier(&self) {
        fence(Ordering::SeqCst);
    }

    /// Clean and invalidate the local data cache for `len` bytes at `addr`.
    fn flush(&self, _addr: u32, _len: usize) {}
}

impl<T: SharedMem + ?Sized> SharedMem for &T {
    fn read_u16(&self, addr: u32) -> u16 {
        (**self).read_u16(addr)
    }

    fn write_u16(&self, addr: u32, value: u16) {
        (**self).write_u16(addr, value)
    }

    fn read_u32(&self, addr: u32) -> u32 {
        (**self).read_u32(addr)
    }

    fn write_u32(&self, addr: u32, value: u32) {
        (**self).write_u32(addr, value)
    }

    fn read_bytes(&self, addr: u32, buf: &mut [u8]) {
        (**self).read_bytes(addr, buf)
    }

    fn write_bytes(&self, addr: u32, data: &[u8]) {
        (**self).write_bytes(addr, data)
    }

    fn barrier(&self) {
        (**self).barrier()
    }

    fn flush(&self, addr: u32, len: usize) {
        (**self).flush(addr, len)
    }
}

/// Shared memory access using direct RAM access.  Typically used by the
/// firmware.
#[derive(Clone, Copy)]
pub struct RamIo {
    flush: Option<fn(u32, usize)>,
}

impl RamIo {
    /// Create a new RamIo instance for a cache-coherent (or uncached) region.
    ///
    /// ```rust
    /// # use amp_rpmsg::io::RamIo;
    /// static RAM_IO: RamIo = RamIo::new();
    /// ```
    // We need a new() rather than a default() as it must be const.
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self { flush: None }
    }

    /// Create a RamIo instance which calls `flush` to clean and invalidate
    /// the data cache over a range, e.g. the BSP's L1 range flush.
    pub const fn with_cache(flush: fn(u32, usize)) -> Self {
        Self { flush: Some(flush) }
    }
}

impl SharedMem for RamIo {
    fn read_u16(&self, addr: u32) -> u16 {
        unsafe { core::ptr::read_volatile(addr as usize as *const u16) }
    }

    fn write_u16(&self, addr: u32, value: u16) {
        unsafe { core::ptr::write_volatile(addr as usize as *mut u16, value) }
    }

    fn read_u32(&self, addr: u32) -> u32 {
        unsafe { core::ptr::read_volatile(addr as usize as *const u32) }
    }

    fn write_u32(&self, addr: u32, value: u32) {
        unsafe { core::ptr::write_volatile(addr as usize as *mut u32, value) }
    }

    fn read_bytes(&self, addr: u32, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = unsafe { core::ptr::read_volatile((addr as usize + i) as *const u8) };
        }
    }

    fn write_bytes(&self, addr: u32, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            unsafe { core::ptr::write_volatile((addr as usize + i) as *mut u8, *byte) };
        }
    }

    fn flush(&self, addr: u32, len: usize) {
        if let Some(flush) = self.flush {
            flush(addr, len);
        }
    }
}

/// Shared memory backed by a byte slice which represents the physical
/// window starting at `base`.
#[derive(Clone, Copy)]
pub struct SliceIo<'a> {
    base: u32,
    mem: &'a [Cell<u8>],
}

impl<'a> SliceIo<'a> {
    /// Create a new instance.  `mem[0]` is bus address `base`.
    pub fn new(base: u32, mem: &'a mut [u8]) -> Self {
        Self {
            base,
            mem: Cell::from_mut(mem).as_slice_of_cells(),
        }
    }

    /// First bus address covered
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Number of bytes covered
    pub fn len(&self) -> usize {
        self.mem.len()
    }

    /// Whether the window is empty
    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }

    fn window(&self, addr: u32, len: usize) -> &'a [Cell<u8>] {
        let offset = (addr - self.base) as usize;
        &self.mem[offset..offset + len]
    }

    fn read_array<const N: usize>(&self, addr: u32) -> [u8; N] {
        let mut out = [0u8; N];
        for (o, cell) in out.iter_mut().zip(self.window(addr, N)) {
            *o = cell.get();
        }
        out
    }
}

impl SharedMem for SliceIo<'_> {
    fn read_u16(&self, addr: u32) -> u16 {
        u16::from_le_bytes(self.read_array(addr))
    }

    fn write_u16(&self, addr: u32, value: u16) {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    fn read_u32(&self, addr: u32) -> u32 {
        u32::from_le_bytes(self.read_array(addr))
    }

    fn write_u32(&self, addr: u32, value: u32) {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    fn read_bytes(&self, addr: u32, buf: &mut [u8]) {
        let len = buf.len();
        for (b, cell) in buf.iter_mut().zip(self.window(addr, len)) {
            *b = cell.get();
        }
    }

    fn write_bytes(&self, addr: u32, data: &[u8]) {
        for (b, cell) in data.iter().zip(self.window(addr, data.len())) {
            cell.set(*b);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn slice_io_is_little_endian() {
        let mut mem = [0u8; 16];
        let io = SliceIo::new(0x1000, &mut mem);
        io.write_u32(0x1004, 0x1122_3344);
        io.write_u16(0x100a, 0xbeef);

        let mut raw = [0u8; 8];
        io.read_bytes(0x1004, &mut raw);
        assert_eq!(raw, [0x44, 0x33, 0x22, 0x11, 0, 0, 0xef, 0xbe]);
        assert_eq!(io.read_u32(0x1004), 0x1122_3344);
        assert_eq!(io.read_u16(0x100a), 0xbeef);
    }

    #[test]
    fn read_bytes_fills_only_the_buffer() {
        let mut mem = [0u8; 12];
        let io = SliceIo::new(0x2000, &mut mem);
        io.write_bytes(0x2002, b"rpmsg-cfg");

        let mut head = [0xffu8; 5];
        io.read_bytes(0x2002, &mut head);
        assert_eq!(&head, b"rpmsg");

        let mut tail = [0u8; 1];
        io.read_bytes(0x200b, &mut tail);
        assert_eq!(tail, [0]);
    }

    #[test]
    fn copies_share_the_window() {
        let mut mem = [0u8; 8];
        let a = SliceIo::new(0, &mut mem);
        let b = a;
        a.write_u32(4, 7);
        assert_eq!(b.read_u32(4), 7);
        assert_eq!(b.len(), 8);
    }

    #[test]
    #[should_panic]
    fn out_of_window_access_panics() {
        let mut mem = [0u8; 4];
        let io = SliceIo::new(0x100, &mut mem);
        io.read_u32(0x102);
    }
}
