//! Firmware side transport - typically driven from the firmware's main loop.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::channel::{
    ADDR_ANY, Channel, ChannelHandle, ChannelState, DATA_LEN_MAX, FIRST_LOCAL_ADDR, MAX_CHANNELS,
    MsgHeader, NS_ADDR, NsAnnouncement, PACKET_LEN_MAX, TransportConfig, name_bytes,
};
use crate::io::SharedMem;
use crate::notify::{KickCounter, Kicks, Notify, WaitForEvent};
use crate::vring::HostVring;
use crate::{Error, Result};

/// Receives messages for one channel.
///
/// Called from [`Transport::poll()`].  The [`Endpoint`] can be used to reply
/// on the same channel before returning.
///
/// Implemented for closures:
///
/// ```rust,ignore
/// let mut echo = |ep: &mut Endpoint<'_>, data: &[u8]| ep.send(data);
/// transport.create_channel("echo", &mut echo)?;
/// ```
pub trait RxHandler {
    fn on_message(&mut self, ep: &mut Endpoint<'_>, data: &[u8]);
}

impl<F> RxHandler for F
where
    F: FnMut(&mut Endpoint<'_>, &[u8]),
{
    fn on_message(&mut self, ep: &mut Endpoint<'_>, data: &[u8]) {
        self(ep, data)
    }
}

pub(crate) trait Sender {
    fn send_blocking(&mut self, src: u32, dst: u32, data: &[u8]);
}

/// The channel a message arrived on, as seen by its [`RxHandler`].
pub struct Endpoint<'t> {
    tx: &'t mut dyn Sender,
    local_addr: u32,
    remote_addr: u32,
}

impl Endpoint<'_> {
    /// Address of this end of the channel
    pub fn local_addr(&self) -> u32 {
        self.local_addr
    }

    /// Address of the sender of the message being handled
    pub fn remote_addr(&self) -> u32 {
        self.remote_addr
    }

    /// Send `data` back to the sender.  Blocks until a buffer is free, and
    /// truncates to [`DATA_LEN_MAX`] bytes.
    pub fn send(&mut self, data: &[u8]) {
        self.tx.send_blocking(self.local_addr, self.remote_addr, data);
    }
}

// Outgoing direction, vring0.
struct TxPath<'a, I: SharedMem, K: Notify, W: WaitForEvent> {
    vring: HostVring<I, K>,
    kicks: &'a KickCounter,
    idle: W,
}

impl<I: SharedMem, K: Notify, W: WaitForEvent> TxPath<'_, I, K, W> {
    // The OS side has returned buffers.  Nothing to do beyond making sure
    // we don't see stale ring contents.
    fn service_kick(&mut self) -> bool {
        if self.kicks.take() {
            self.vring.flush();
            true
        } else {
            false
        }
    }

    fn try_send(&mut self, src: u32, dst: u32, data: &[u8]) -> bool {
        let (idx, desc) = loop {
            let Some(idx) = self.vring.try_take_incoming() else {
                return false;
            };
            let desc = self.vring.descriptor(idx);
            if (desc.len as usize) >= MsgHeader::SIZE {
                break (idx, desc);
            }
            // Unusable, hand it straight back
            warn!("Tx buffer {idx} of {} bytes has no room for a header", { desc.len });
            self.vring.publish(idx, 0, true);
        };

        let addr = desc.addr;
        let capacity = (desc.len as usize)
            .min(PACKET_LEN_MAX)
            .saturating_sub(MsgHeader::SIZE);
        let data = if data.len() > capacity {
            warn!("Buffer {idx} holds {capacity} bytes, truncating {} byte message", data.len());
            &data[..capacity]
        } else {
            data
        };

        let hdr = MsgHeader::new(src, dst, data.len() as u16);
        let io = self.vring.io();
        io.write_bytes(addr, &hdr.to_bytes());
        io.write_bytes(addr + MsgHeader::SIZE as u32, data);
        io.flush(addr, MsgHeader::SIZE + data.len());

        trace!("Sent {} bytes {src:#X} -> {dst:#X} in desc {idx}", data.len());
        self.vring.publish(idx, PACKET_LEN_MAX as u32, true);
        true
    }
}

impl<I: SharedMem, K: Notify, W: WaitForEvent> Sender for TxPath<'_, I, K, W> {
    fn send_blocking(&mut self, src: u32, dst: u32, data: &[u8]) {
        let data = if data.len() > DATA_LEN_MAX {
            warn!(
                "Message of {} bytes exceeds {DATA_LEN_MAX}, truncating",
                data.len()
            );
            &data[..DATA_LEN_MAX]
        } else {
            data
        };

        while !self.try_send(src, dst, data) {
            self.idle.wait_for_event();
            self.service_kick();
        }
    }
}

/// Firmware end of the rpmsg link.
///
/// Owns both vrings and the channel table.  All protocol state changes
/// happen in [`Self::poll()`] and the send functions, never in interrupt
/// context.
///
/// ```rust,ignore
/// static KICKS: Kicks = Kicks::new();
///
/// let config = TransportConfig::FromResourceTable {
///     tx_vring_rsc: RSC_VRING0,
///     rx_vring_rsc: RSC_VRING1,
/// };
/// let mut transport = Transport::new(config, RamIo::new(), Ipi, &KICKS, Wfe)?;
///
/// let mut server = ConfigServer::new(&vars);
/// transport.create_channel("cfg_mgmt", &mut server)?;
///
/// loop {
///     if !transport.poll() {
///         Wfe.wait_for_event();
///     }
/// }
/// ```
pub struct Transport<'a, I: SharedMem, K: Notify, W: WaitForEvent> {
    tx: TxPath<'a, I, K, W>,
    rx: HostVring<I, K>,
    rx_kicks: &'a KickCounter,
    channels: [Channel<'a>; MAX_CHANNELS],
    next_addr: u32,
}

impl<'a, I, K, W> Transport<'a, I, K, W>
where
    I: SharedMem + Clone,
    K: Notify + Clone,
    W: WaitForEvent,
{
    /// Attach to the vrings described by `config`.
    ///
    /// Arguments:
    /// - `config` - Where the vrings are
    /// - `io` - Object implementing [`SharedMem`] to access the vrings and
    ///   their buffers
    /// - `notify` - Kicks the OS side
    /// - `kicks` - Counters bumped by the vring interrupt handlers
    /// - `idle` - Used while waiting for a free outgoing buffer
    pub fn new(config: TransportConfig, io: I, notify: K, kicks: &'a Kicks, idle: W) -> Result<Self> {
        let rings = config.resolve(&io)?;

        let tx = HostVring::new(io.clone(), rings.tx, rings.num, notify.clone());
        let rx = HostVring::new(io, rings.rx, rings.num, notify);

        debug!(
            "Transport up: tx vring {:#010X} rx vring {:#010X} num {}",
            rings.tx, rings.rx, rings.num
        );

        Ok(Self {
            tx: TxPath {
                vring: tx,
                kicks: &kicks.tx,
                idle,
            },
            rx,
            rx_kicks: &kicks.rx,
            channels: core::array::from_fn(|_| Channel::unused()),
            next_addr: FIRST_LOCAL_ADDR,
        })
    }
}

impl<'a, I: SharedMem, K: Notify, W: WaitForEvent> Transport<'a, I, K, W> {
    /// Create a channel and announce it to the OS side.
    ///
    /// Blocks until the announcement has been handed to the OS side, so the
    /// OS side must have made buffers available on the tx vring.
    ///
    /// Returns [`Error::ResourceExhausted`] if all [`MAX_CHANNELS`] slots
    /// are in use.
    pub fn create_channel(
        &mut self,
        name: &str,
        handler: &'a mut dyn RxHandler,
    ) -> Result<ChannelHandle> {
        let Some(slot) = self
            .channels
            .iter()
            .position(|c| c.state == ChannelState::Unused)
        else {
            warn!("No free channel for {name}");
            return Err(Error::ResourceExhausted);
        };

        let local_addr = self.next_addr;
        self.next_addr += 1;

        self.channels[slot] = Channel {
            local_addr,
            remote_addr: ADDR_ANY,
            state: ChannelState::Announced,
            name: name_bytes(name),
            handler: Some(handler),
        };

        let ns = NsAnnouncement::create(name, local_addr);
        self.tx.send_blocking(local_addr, NS_ADDR, &ns.to_bytes());

        debug!("Created channel {name} at {local_addr:#X}");
        Ok(ChannelHandle(slot))
    }

    /// Send `data` on a channel, blocking until a buffer is free.
    ///
    /// Does nothing if the channel has not been created.  Before the first
    /// message has arrived the remote address is [`ADDR_ANY`].  Payloads
    /// over [`DATA_LEN_MAX`] bytes are truncated.
    pub fn send(&mut self, handle: ChannelHandle, data: &[u8]) {
        let Some(chan) = self.channels.get(handle.0) else {
            return;
        };
        if !chan.is_live() {
            debug!("Dropping send on channel {} in state {:?}", handle.0, chan.state);
            return;
        }

        let (src, dst) = (chan.local_addr, chan.remote_addr);
        self.tx.send_blocking(src, dst, data);
    }

    /// Process pending kicks.  Call periodically.
    ///
    /// Delivers every message the OS side has sent to its channel's
    /// handler, then returns the buffers.  Returns whether there was
    /// anything to do.
    pub fn poll(&mut self) -> bool {
        let mut work = self.tx.service_kick();

        if self.rx_kicks.take() {
            self.rx.flush();
            while let Some(idx) = self.rx.try_take_incoming() {
                self.receive(idx);
                self.rx.publish(idx, PACKET_LEN_MAX as u32, true);
            }
            work = true;
        }

        work
    }

    /// Get a channel's state
    pub fn channel(&self, handle: ChannelHandle) -> &Channel<'a> {
        &self.channels[handle.0]
    }

    /// All channel slots, including unused ones
    pub fn channels(&self) -> &[Channel<'a>] {
        &self.channels
    }

    fn receive(&mut self, idx: u16) {
        let desc = self.rx.descriptor(idx);
        let addr = desc.addr;
        let capacity = (desc.len as usize).min(PACKET_LEN_MAX);
        if capacity < MsgHeader::SIZE {
            warn!("Dropping desc {idx}, buffer of {capacity} bytes too short");
            return;
        }

        let io = self.rx.io();
        io.flush(addr, capacity);
        let mut raw = [0u8; MsgHeader::SIZE];
        io.read_bytes(addr, &mut raw);
        let hdr = MsgHeader::from_bytes(&raw);

        let (src, dst, len) = (hdr.src, hdr.dst, hdr.len as usize);
        if MsgHeader::SIZE + len > capacity {
            error!("Dropping message {src:#X} -> {dst:#X}, bad length {len}");
            return;
        }
        let mut payload = [0u8; DATA_LEN_MAX];
        io.read_bytes(addr + MsgHeader::SIZE as u32, &mut payload[..len]);

        let Some(chan) = self
            .channels
            .iter_mut()
            .find(|c| c.is_live() && c.local_addr == dst)
        else {
            warn!("Dropping message {src:#X} -> {dst:#X}, no such channel");
            return;
        };

        if chan.state != ChannelState::Up {
            debug!("Channel {} up, remote {src:#X}", chan.name());
        }
        chan.remote_addr = src;
        chan.state = ChannelState::Up;

        trace!("Received {len} bytes {src:#X} -> {dst:#X}");
        if let Some(handler) = chan.handler.as_deref_mut() {
            let mut ep = Endpoint {
                tx: &mut self.tx,
                local_addr: dst,
                remote_addr: src,
            };
            handler.on_message(&mut ep, &payload[..len]);
        }
    }
}
