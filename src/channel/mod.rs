//! rpmsg channels multiplexed over a pair of vrings.
//!
//! See [`Transport`] for the firmware side of the link.
//!
//! Every message starts with a [`MsgHeader`] giving the source and
//! destination channel addresses.  A new channel is made known to the OS
//! side by sending a [`NsAnnouncement`] to the well-known name service
//! address [`NS_ADDR`].  The OS side then creates its own end of the channel
//! and answers from an address of its choosing, which the firmware learns
//! from the first message it receives.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod transport;

pub use transport::{Endpoint, RxHandler, Transport};

use core::mem::{offset_of, size_of};

use crate::io::SharedMem;
use crate::vring::RING_SIZE;
use crate::{Error, Result};

/// Address meaning "not known yet"
pub const ADDR_ANY: u32 = 0xFFFF_FFFF;

/// The OS side's name service address, receiving [`NsAnnouncement`]s
pub const NS_ADDR: u32 = 0x35;

/// Local address of the first channel created; later channels count up
pub const FIRST_LOCAL_ADDR: u32 = 0x50;

/// Size of the channel table
pub const MAX_CHANNELS: usize = 5;

/// Maximum channel name length, in bytes
pub const NAME_SIZE: usize = 32;

/// Size of every vring buffer, header included
pub const PACKET_LEN_MAX: usize = 512;

/// Largest payload that fits in one message
pub const DATA_LEN_MAX: usize = PACKET_LEN_MAX - MsgHeader::SIZE;

/// Header at the start of every message buffer.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MsgHeader {
    /// Sending channel's address
    pub src: u32,

    /// Receiving channel's address
    pub dst: u32,

    /// Reserved, zero
    pub reserved: u32,

    /// Payload length in bytes
    pub len: u16,

    /// Message flags, zero
    pub flags: u16,
}

/// MsgHeader offsets
impl MsgHeader {
    pub const SIZE: usize = size_of::<Self>();

    pub fn new(src: u32, dst: u32, len: u16) -> Self {
        Self {
            src,
            dst,
            reserved: 0,
            len,
            flags: 0,
        }
    }

    pub const fn src_offset() -> usize {
        offset_of!(MsgHeader, src)
    }

    pub const fn dst_offset() -> usize {
        offset_of!(MsgHeader, dst)
    }

    pub const fn reserved_offset() -> usize {
        offset_of!(MsgHeader, reserved)
    }

    pub const fn len_offset() -> usize {
        offset_of!(MsgHeader, len)
    }

    pub const fn flags_offset() -> usize {
        offset_of!(MsgHeader, flags)
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        put_u32(&mut out, Self::src_offset(), self.src);
        put_u32(&mut out, Self::dst_offset(), self.dst);
        put_u32(&mut out, Self::reserved_offset(), self.reserved);
        put_u16(&mut out, Self::len_offset(), self.len);
        put_u16(&mut out, Self::flags_offset(), self.flags);
        out
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            src: get_u32(bytes, Self::src_offset()),
            dst: get_u32(bytes, Self::dst_offset()),
            reserved: get_u32(bytes, Self::reserved_offset()),
            len: get_u16(bytes, Self::len_offset()),
            flags: get_u16(bytes, Self::flags_offset()),
        }
    }
}

/// Name service announcement flags
#[repr(u32)]
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub enum NsFlags {
    #[default]
    Create = 0,
    Destroy = 1,
}

impl From<u32> for NsFlags {
    fn from(value: u32) -> Self {
        match value {
            1 => NsFlags::Destroy,
            _ => NsFlags::Create,
        }
    }
}

/// Payload sent to [`NS_ADDR`] to publish (or withdraw) a channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NsAnnouncement {
    /// Channel name, NUL padded
    pub name: [u8; NAME_SIZE],

    /// Channel's local address
    pub addr: u32,

    /// Create or destroy
    pub flags: NsFlags,
}

impl NsAnnouncement {
    pub const SIZE: usize = NAME_SIZE + 4 + 4;

    pub fn create(name: &str, addr: u32) -> Self {
        Self {
            name: name_bytes(name),
            addr,
            flags: NsFlags::Create,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..NAME_SIZE].copy_from_slice(&self.name);
        put_u32(&mut out, NAME_SIZE, self.addr);
        put_u32(&mut out, NAME_SIZE + 4, self.flags as u32);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(Error::BufferTooSmall);
        }
        let mut name = [0u8; NAME_SIZE];
        name.copy_from_slice(&bytes[..NAME_SIZE]);
        Ok(Self {
            name,
            addr: get_u32(bytes, NAME_SIZE),
            flags: NsFlags::from(get_u32(bytes, NAME_SIZE + 4)),
        })
    }

    /// Channel name, up to the first NUL
    pub fn name(&self) -> &str {
        name_str(&self.name)
    }
}

/// Channel lifecycle.  There is no way back to `Unused`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Free slot
    #[default]
    Unused,
    /// Announced to the OS side, remote address not yet known
    Announced,
    /// At least one message received, remote address known
    Up,
}

/// Handle for a channel created with [`Transport::create_channel()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelHandle(pub(crate) usize);

/// One slot of the channel table.
pub struct Channel<'a> {
    pub(crate) local_addr: u32,
    pub(crate) remote_addr: u32,
    pub(crate) state: ChannelState,
    pub(crate) name: [u8; NAME_SIZE],
    pub(crate) handler: Option<&'a mut dyn RxHandler>,
}

impl Channel<'_> {
    pub(crate) const fn unused() -> Self {
        Self {
            local_addr: 0,
            remote_addr: ADDR_ANY,
            state: ChannelState::Unused,
            name: [0; NAME_SIZE],
            handler: None,
        }
    }

    /// Address of this end of the channel
    pub fn local_addr(&self) -> u32 {
        self.local_addr
    }

    /// Address of the OS end, [`ADDR_ANY`] until the first message arrives
    pub fn remote_addr(&self) -> u32 {
        self.remote_addr
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn name(&self) -> &str {
        name_str(&self.name)
    }

    /// Announced or up
    pub fn is_live(&self) -> bool {
        matches!(self.state, ChannelState::Announced | ChannelState::Up)
    }
}

/// Resource table entry describing one vring (`fw_rsc_vdev_vring`).
///
/// The firmware fills in `align`, `num` and `notifyid`, the OS side fills in
/// `da` when it allocates the ring.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VringRsc {
    /// Device address of the vring, assigned by the OS side
    pub da: u32,

    /// Alignment of the used ring
    pub align: u32,

    /// Number of descriptors
    pub num: u32,

    /// Notification id
    pub notifyid: u32,

    /// Reserved, zero
    pub reserved: u32,
}

impl VringRsc {
    pub const fn da_offset() -> u32 {
        offset_of!(VringRsc, da) as u32
    }

    pub const fn num_offset() -> u32 {
        offset_of!(VringRsc, num) as u32
    }

    /// Read the entry at `addr`
    pub fn read<I: SharedMem>(io: &I, addr: u32) -> Self {
        Self {
            da: io.read_u32(addr + Self::da_offset()),
            align: io.read_u32(addr + offset_of!(VringRsc, align) as u32),
            num: io.read_u32(addr + Self::num_offset()),
            notifyid: io.read_u32(addr + offset_of!(VringRsc, notifyid) as u32),
            reserved: io.read_u32(addr + offset_of!(VringRsc, reserved) as u32),
        }
    }
}

/// Configuration for creating a [`Transport`].
/// - `Direct`: vring addresses and size known up front, e.g. from the
///   linker script
/// - `FromResourceTable`: read the vring addresses the OS side assigned in
///   the firmware's resource table
#[derive(Debug, Clone, Copy)]
pub enum TransportConfig {
    Direct {
        /// Firmware-to-OS vring (vring0)
        tx_vring: u32,
        /// OS-to-firmware vring (vring1)
        rx_vring: u32,
        /// Descriptors per vring
        num: u16,
    },
    FromResourceTable {
        /// Address of vring0's resource table entry
        tx_vring_rsc: u32,
        /// Address of vring1's resource table entry
        rx_vring_rsc: u32,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Direct {
            tx_vring: 0,
            rx_vring: 0,
            num: RING_SIZE,
        }
    }
}

/// Vring addresses and size after resolving a [`TransportConfig`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct VringPair {
    pub tx: u32,
    pub rx: u32,
    pub num: u16,
}

impl TransportConfig {
    pub(crate) fn resolve<I: SharedMem>(&self, io: &I) -> Result<VringPair> {
        let pair = match *self {
            TransportConfig::Direct {
                tx_vring,
                rx_vring,
                num,
            } => VringPair {
                tx: tx_vring,
                rx: rx_vring,
                num,
            },
            TransportConfig::FromResourceTable {
                tx_vring_rsc,
                rx_vring_rsc,
            } => {
                let tx = VringRsc::read(io, tx_vring_rsc);
                let rx = VringRsc::read(io, rx_vring_rsc);
                if tx.num != rx.num {
                    return Err(Error::InvalidRingSize);
                }
                let num = u16::try_from(tx.num).map_err(|_| Error::InvalidRingSize)?;
                VringPair {
                    tx: tx.da,
                    rx: rx.da,
                    num,
                }
            }
        };

        check_ring_size(pair.num)?;
        check_vring_addr(pair.tx)?;
        check_vring_addr(pair.rx)?;
        Ok(pair)
    }
}

// Helper functions

fn check_ring_size(num: u16) -> Result<()> {
    if num.is_power_of_two() {
        Ok(())
    } else {
        Err(Error::InvalidRingSize)
    }
}

fn check_vring_addr(addr: u32) -> Result<()> {
    if addr == 0 {
        Err(Error::Uninit)
    } else if addr % 16 != 0 {
        Err(Error::NotAligned)
    } else {
        Ok(())
    }
}

/// NUL padded copy of `name`, truncated to [`NAME_SIZE`] on a char boundary
pub(crate) fn name_bytes(name: &str) -> [u8; NAME_SIZE] {
    let mut len = name.len().min(NAME_SIZE);
    while !name.is_char_boundary(len) {
        len -= 1;
    }
    let mut out = [0u8; NAME_SIZE];
    out[..len].copy_from_slice(&name.as_bytes()[..len]);
    out
}

fn name_str(name: &[u8]) -> &str {
    let len = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    core::str::from_utf8(&name[..len]).unwrap_or("")
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn get_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn get_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}
