// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

// Simulated OS side of the link, driving the firmware's Transport through
// an ordinary byte buffer standing in for the shared memory window.

#![allow(dead_code)]

use std::cell::Cell;
use std::vec;
use std::vec::Vec;

use amp_rpmsg::channel::{MsgHeader, PACKET_LEN_MAX, TransportConfig};
use amp_rpmsg::io::{SharedMem, SliceIo};
use amp_rpmsg::notify::{Kicks, Notify};
use amp_rpmsg::vring::{GuestVring, VringLayout};

pub const BASE: u32 = 0x3ed0_0000;
pub const NUM: u16 = 8;
pub const BUF_SIZE: u32 = PACKET_LEN_MAX as u32;

// Address the OS side sends from
pub const OS_ADDR: u32 = 0x400;

pub fn tx_vring() -> u32 {
    BASE
}

pub fn rx_vring() -> u32 {
    tx_vring() + ring_span()
}

pub fn buffers() -> u32 {
    rx_vring() + ring_span()
}

fn ring_span() -> u32 {
    (VringLayout::size(NUM) as u32).next_multiple_of(0x1000)
}

pub fn window_size() -> usize {
    (buffers() - BASE) as usize + 2 * NUM as usize * BUF_SIZE as usize
}

pub fn memory() -> Vec<u8> {
    vec![0u8; window_size()]
}

pub fn config() -> TransportConfig {
    TransportConfig::Direct {
        tx_vring: tx_vring(),
        rx_vring: rx_vring(),
        num: NUM,
    }
}

/// Counts kicks from the firmware
#[derive(Default)]
pub struct KickLog(pub Cell<u32>);

impl Notify for KickLog {
    fn notify(&self) {
        self.0.set(self.0.get() + 1);
    }
}

/// A message as the OS side saw it
#[derive(Debug)]
pub struct Received {
    pub src: u32,
    pub dst: u32,
    pub data: Vec<u8>,
    pub used_len: u32,
}

/// OS end of both vrings.
///
/// Every firmware-to-OS buffer is offered up front and re-offered as soon
/// as it has been read.  OS-to-firmware buffers are handed out from a free
/// list, refilled from the used ring.
pub struct Linux<'m> {
    io: SliceIo<'m>,
    kicks: &'m Kicks,
    tx: GuestVring<SliceIo<'m>>,
    rx: GuestVring<SliceIo<'m>>,
    free: Vec<u16>,
}

impl<'m> Linux<'m> {
    pub fn new(io: SliceIo<'m>, kicks: &'m Kicks) -> Self {
        let mut tx = GuestVring::new(io, tx_vring(), NUM, buffers(), BUF_SIZE);
        for idx in 0..NUM {
            tx.make_available(idx);
        }
        let rx = GuestVring::new(
            io,
            rx_vring(),
            NUM,
            buffers() + NUM as u32 * BUF_SIZE,
            BUF_SIZE,
        );

        Self {
            io,
            kicks,
            tx,
            rx,
            free: (0..NUM).rev().collect(),
        }
    }

    /// Queue a message for the firmware and kick it.
    pub fn send(&mut self, src: u32, dst: u32, data: &[u8]) {
        self.reclaim();
        let idx = self.free.pop().expect("no free OS-to-firmware buffer");

        let addr = { self.rx.descriptor(idx).addr };
        let hdr = MsgHeader::new(src, dst, data.len() as u16);
        self.io.write_bytes(addr, &hdr.to_bytes());
        self.io.write_bytes(addr + MsgHeader::SIZE as u32, data);

        self.rx.make_available(idx);
        self.kicks.on_rx_kick();
    }

    /// Take the next message from the firmware, returning its buffer.
    pub fn recv(&mut self) -> Option<Received> {
        let used = self.tx.take_used()?;
        let idx = used.id as u16;

        let addr = { self.tx.descriptor(idx).addr };
        let mut raw = [0u8; MsgHeader::SIZE];
        self.io.read_bytes(addr, &mut raw);
        let hdr = MsgHeader::from_bytes(&raw);
        let mut data = vec![0u8; hdr.len as usize];
        self.io.read_bytes(addr + MsgHeader::SIZE as u32, &mut data);

        self.tx.make_available(idx);
        self.kicks.on_tx_kick();

        Some(Received {
            src: hdr.src,
            dst: hdr.dst,
            data,
            used_len: used.len,
        })
    }

    /// Everything the firmware has sent so far
    pub fn recv_all(&mut self) -> Vec<Received> {
        std::iter::from_fn(|| self.recv()).collect()
    }

    /// OS-to-firmware buffers the firmware has given back
    pub fn returned(&mut self) -> usize {
        self.reclaim();
        self.free.len()
    }

    fn reclaim(&mut self) {
        while let Some(used) = self.rx.take_used() {
            self.free.push(used.id as u16);
        }
    }
}
