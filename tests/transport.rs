// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

mod common;

use std::cell::RefCell;
use std::vec::Vec;

use amp_rpmsg::Error;
use amp_rpmsg::channel::{
    ADDR_ANY, ChannelState, DATA_LEN_MAX, Endpoint, FIRST_LOCAL_ADDR, MAX_CHANNELS, NS_ADDR,
    NsAnnouncement, NsFlags, PACKET_LEN_MAX, Transport, TransportConfig,
};
use amp_rpmsg::io::SliceIo;
use amp_rpmsg::notify::{Kicks, SpinWait, WaitForEvent};

use common::{BASE, KickLog, Linux, NUM, OS_ADDR, Received, config, memory};

#[test]
fn channel_is_announced_on_creation() {
    let mut mem = memory();
    let io = SliceIo::new(BASE, &mut mem);
    let kicks = Kicks::new();
    let notify = KickLog::default();
    let mut linux = Linux::new(io, &kicks);

    let mut ignore = |_: &mut Endpoint<'_>, _: &[u8]| {};
    let mut transport = Transport::new(config(), io, &notify, &kicks, SpinWait).unwrap();
    let handle = transport.create_channel("cfg_mgmt", &mut ignore).unwrap();
    assert_eq!(transport.channel(handle).state(), ChannelState::Announced);

    let msgs = linux.recv_all();
    assert_eq!(msgs.len(), 1);
    let ns = &msgs[0];
    assert_eq!(ns.src, FIRST_LOCAL_ADDR);
    assert_eq!(ns.dst, NS_ADDR);
    assert_eq!(ns.data.len(), NsAnnouncement::SIZE);
    assert_eq!(ns.used_len, PACKET_LEN_MAX as u32);

    let ann = NsAnnouncement::from_bytes(&ns.data).unwrap();
    assert_eq!(ann.name(), "cfg_mgmt");
    assert_eq!(ann.addr, FIRST_LOCAL_ADDR);
    assert_eq!(ann.flags, NsFlags::Create);
    assert_eq!(notify.0.get(), 1);
}

#[test]
fn channel_table_fills_up() {
    let mut mem = memory();
    let io = SliceIo::new(BASE, &mut mem);
    let kicks = Kicks::new();
    let notify = KickLog::default();
    let mut linux = Linux::new(io, &kicks);

    let mut handlers: Vec<_> = (0..=MAX_CHANNELS)
        .map(|_| |_: &mut Endpoint<'_>, _: &[u8]| {})
        .collect();
    let mut transport = Transport::new(config(), io, &notify, &kicks, SpinWait).unwrap();

    let mut handlers = handlers.iter_mut();
    for n in 0..MAX_CHANNELS {
        let handler = handlers.next().unwrap();
        let handle = transport.create_channel("chan", handler).unwrap();
        assert_eq!(
            transport.channel(handle).local_addr(),
            FIRST_LOCAL_ADDR + n as u32
        );
    }
    let last = handlers.next().unwrap();
    assert!(matches!(
        transport.create_channel("one_too_many", last),
        Err(Error::ResourceExhausted)
    ));

    let addrs: Vec<u32> = linux
        .recv_all()
        .iter()
        .map(|m| NsAnnouncement::from_bytes(&m.data).unwrap().addr)
        .collect();
    assert_eq!(
        addrs,
        (0..MAX_CHANNELS as u32)
            .map(|n| FIRST_LOCAL_ADDR + n)
            .collect::<Vec<_>>()
    );
}

#[test]
fn first_message_brings_channel_up() {
    let mut mem = memory();
    let io = SliceIo::new(BASE, &mut mem);
    let kicks = Kicks::new();
    let notify = KickLog::default();
    let mut linux = Linux::new(io, &kicks);

    let mut echo = |ep: &mut Endpoint<'_>, data: &[u8]| ep.send(data);
    let mut transport = Transport::new(config(), io, &notify, &kicks, SpinWait).unwrap();
    let handle = transport.create_channel("echo", &mut echo).unwrap();
    linux.recv_all();

    // Remote end not known yet
    assert_eq!(transport.channel(handle).remote_addr(), ADDR_ANY);
    transport.send(handle, b"early");
    let early = linux.recv().unwrap();
    assert_eq!((early.src, early.dst), (FIRST_LOCAL_ADDR, ADDR_ANY));

    linux.send(OS_ADDR, FIRST_LOCAL_ADDR, b"hello");
    assert!(transport.poll());

    let chan = transport.channel(handle);
    assert_eq!(chan.state(), ChannelState::Up);
    assert_eq!(chan.remote_addr(), OS_ADDR);

    let reply = linux.recv().unwrap();
    assert_eq!((reply.src, reply.dst), (FIRST_LOCAL_ADDR, OS_ADDR));
    assert_eq!(reply.data, b"hello");
    assert_eq!(linux.returned(), NUM as usize);

    transport.send(handle, b"unprompted");
    assert_eq!(linux.recv().unwrap().data, b"unprompted");
}

#[test]
fn messages_are_delivered_in_order() {
    let mut mem = memory();
    let io = SliceIo::new(BASE, &mut mem);
    let kicks = Kicks::new();
    let notify = KickLog::default();
    let mut linux = Linux::new(io, &kicks);

    let log = RefCell::new(Vec::new());
    let mut first = |ep: &mut Endpoint<'_>, data: &[u8]| {
        log.borrow_mut().push((ep.local_addr(), data.to_vec()));
    };
    let mut second = |ep: &mut Endpoint<'_>, data: &[u8]| {
        log.borrow_mut().push((ep.local_addr(), data.to_vec()));
    };
    let mut transport = Transport::new(config(), io, &notify, &kicks, SpinWait).unwrap();
    transport.create_channel("first", &mut first).unwrap();
    transport.create_channel("second", &mut second).unwrap();

    let a = FIRST_LOCAL_ADDR;
    let b = FIRST_LOCAL_ADDR + 1;
    let sent = [(a, b"1"), (b, b"2"), (a, b"3"), (a, b"4"), (b, b"5")];
    for (dst, data) in sent {
        linux.send(OS_ADDR, dst, data);
    }

    // Several kicks, but one poll drains everything
    assert!(transport.poll());
    let expected: Vec<(u32, Vec<u8>)> = sent.iter().map(|(d, m)| (*d, m.to_vec())).collect();
    assert_eq!(*log.borrow(), expected);
    assert_eq!(linux.returned(), NUM as usize);
}

#[test]
fn oversized_messages_are_truncated() {
    let mut mem = memory();
    let io = SliceIo::new(BASE, &mut mem);
    let kicks = Kicks::new();
    let notify = KickLog::default();
    let mut linux = Linux::new(io, &kicks);

    let mut ignore = |_: &mut Endpoint<'_>, _: &[u8]| {};
    let mut transport = Transport::new(config(), io, &notify, &kicks, SpinWait).unwrap();
    let handle = transport.create_channel("bulk", &mut ignore).unwrap();
    linux.send(OS_ADDR, FIRST_LOCAL_ADDR, b"up");
    transport.poll();
    linux.recv_all();

    let big: Vec<u8> = (0..600u32).map(|n| n as u8).collect();
    transport.send(handle, &big);

    let msg = linux.recv().unwrap();
    assert_eq!(msg.data.len(), DATA_LEN_MAX);
    assert_eq!(msg.data, big[..DATA_LEN_MAX]);
    assert_eq!(msg.used_len, PACKET_LEN_MAX as u32);
}

#[test]
fn indices_wrap_around() {
    let mut mem = memory();
    let io = SliceIo::new(BASE, &mut mem);
    let kicks = Kicks::new();
    let notify = KickLog::default();
    let mut linux = Linux::new(io, &kicks);

    let mut echo = |ep: &mut Endpoint<'_>, data: &[u8]| ep.send(data);
    let mut transport = Transport::new(config(), io, &notify, &kicks, SpinWait).unwrap();
    transport.create_channel("echo", &mut echo).unwrap();
    linux.recv_all();

    for n in 0..(u16::MAX as u32 + 100) {
        let data = n.to_le_bytes();
        linux.send(OS_ADDR, FIRST_LOCAL_ADDR, &data);
        assert!(transport.poll());
        let reply = linux.recv().unwrap();
        assert_eq!(reply.data, data);
    }
    assert!(linux.recv().is_none());
}

// Plays the OS side while the firmware waits for a buffer
struct Drain<'a, 'm> {
    linux: &'a RefCell<Linux<'m>>,
    seen: &'a RefCell<Vec<Received>>,
}

impl WaitForEvent for Drain<'_, '_> {
    fn wait_for_event(&mut self) {
        let mut linux = self.linux.borrow_mut();
        self.seen.borrow_mut().extend(linux.recv_all());
    }
}

#[test]
fn send_blocks_until_a_buffer_is_returned() {
    let mut mem = memory();
    let io = SliceIo::new(BASE, &mut mem);
    let kicks = Kicks::new();
    let notify = KickLog::default();
    let linux = RefCell::new(Linux::new(io, &kicks));
    let seen = RefCell::new(Vec::new());

    let mut ignore = |_: &mut Endpoint<'_>, _: &[u8]| {};
    let idle = Drain {
        linux: &linux,
        seen: &seen,
    };
    let mut transport = Transport::new(config(), io, &notify, &kicks, idle).unwrap();
    let handle = transport.create_channel("flood", &mut ignore).unwrap();
    linux.borrow_mut().send(OS_ADDR, FIRST_LOCAL_ADDR, b"up");
    transport.poll();

    // More messages than there are buffers, nobody reading until the
    // firmware runs out
    let count = 3 * NUM as u32;
    for n in 0..count {
        transport.send(handle, &n.to_le_bytes());
    }
    seen.borrow_mut().extend(linux.borrow_mut().recv_all());

    let seen = seen.borrow();
    assert_eq!(seen.len(), count as usize + 1);
    assert_eq!(seen[0].dst, NS_ADDR);
    for (n, msg) in seen[1..].iter().enumerate() {
        assert_eq!(msg.data, (n as u32).to_le_bytes());
    }
}

#[test]
fn odd_ring_size_is_rejected() {
    let mut mem = memory();
    let io = SliceIo::new(BASE, &mut mem);
    let kicks = Kicks::new();
    let notify = KickLog::default();

    let bad = TransportConfig::Direct {
        tx_vring: common::tx_vring(),
        rx_vring: common::rx_vring(),
        num: 6,
    };
    assert!(matches!(
        Transport::new(bad, io, &notify, &kicks, SpinWait),
        Err(Error::InvalidRingSize)
    ));
}
