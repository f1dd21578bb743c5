//! Configuration variable protocol.
//!
//! The firmware exposes a table of named `i32` variables, each with a fixed
//! range, to the OS side.  Requests and responses share one message shape,
//! [`ConfigMsg`], and are matched up by sequence number.  The firmware only
//! ever answers, see [`ConfigServer`]; the OS side client lives in
//! [`crate::client`].
//!
//! Messages are always sent at their full size of [`CONFIG_MSG_LEN`] bytes,
//! whatever `data_len` says.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod server;
pub mod store;

pub use server::ConfigServer;
pub use store::{ConfigVar, VarCallback, VarEvent, VarStore, VarTable};

use core::fmt;

use crate::{Error, Result};

/// Name of the channel the firmware announces for this protocol
pub const CHANNEL_NAME: &str = "cfg_mgmt";

/// Size of the data area carrying names and descriptions
pub const MSG_DATA_SIZE: usize = 400;

/// Size of the fixed fields before the data area
pub const CONFIG_HEADER_LEN: usize = 20;

/// Size of a message on the wire
pub const CONFIG_MSG_LEN: usize = CONFIG_HEADER_LEN + MSG_DATA_SIZE;

/// Request opcodes, OS side to firmware
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Nop = 0,
    Count = 1,
    Write = 2,
    Read = 3,
    Min = 4,
    Max = 5,
    Name = 6,
    Description = 7,
}

impl TryFrom<u32> for RequestKind {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(RequestKind::Nop),
            1 => Ok(RequestKind::Count),
            2 => Ok(RequestKind::Write),
            3 => Ok(RequestKind::Read),
            4 => Ok(RequestKind::Min),
            5 => Ok(RequestKind::Max),
            6 => Ok(RequestKind::Name),
            7 => Ok(RequestKind::Description),
            _ => Err(Error::Protocol),
        }
    }
}

/// Response opcodes, firmware to OS side
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Ok = 128,
    Count = 129,
    BadIndex = 130,
    Value = 131,
    Min = 132,
    Max = 133,
    Name = 134,
    Description = 135,
    BadRequest = 255,
}

impl TryFrom<u32> for ResponseKind {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            128 => Ok(ResponseKind::Ok),
            129 => Ok(ResponseKind::Count),
            130 => Ok(ResponseKind::BadIndex),
            131 => Ok(ResponseKind::Value),
            132 => Ok(ResponseKind::Min),
            133 => Ok(ResponseKind::Max),
            134 => Ok(ResponseKind::Name),
            135 => Ok(ResponseKind::Description),
            255 => Ok(ResponseKind::BadRequest),
            _ => Err(Error::Protocol),
        }
    }
}

/// A request or a response.
///
/// Wire format, little-endian, packed:
///
/// ```text
/// u32 seq | u32 kind | i32 index | i32 value | u32 data_len | u8 data[400]
/// ```
#[derive(Clone, PartialEq)]
pub struct ConfigMsg {
    /// Sequence number, copied from request to response
    pub seq: u32,

    /// Opcode, see [`RequestKind`] and [`ResponseKind`]
    pub kind: u32,

    /// Variable index, negative if not applicable
    pub index: i32,

    /// Numeric payload
    pub value: i32,

    /// Number of valid bytes in `data`
    pub data_len: u32,

    /// Name or description text, not NUL terminated
    pub data: [u8; MSG_DATA_SIZE],
}

impl ConfigMsg {
    pub fn request(seq: u32, kind: RequestKind, index: i32, value: i32) -> Self {
        Self::with_kind(seq, kind as u32, index, value)
    }

    pub fn response(seq: u32, kind: ResponseKind, index: i32, value: i32) -> Self {
        Self::with_kind(seq, kind as u32, index, value)
    }

    fn with_kind(seq: u32, kind: u32, index: i32, value: i32) -> Self {
        Self {
            seq,
            kind,
            index,
            value,
            data_len: 0,
            data: [0; MSG_DATA_SIZE],
        }
    }

    /// Copy `bytes` into the data area, truncating to [`MSG_DATA_SIZE`].
    ///
    /// Returns the number of bytes copied.
    pub fn set_data(&mut self, bytes: &[u8]) -> usize {
        let len = bytes.len().min(MSG_DATA_SIZE);
        self.data[..len].copy_from_slice(&bytes[..len]);
        self.data[len..].fill(0);
        self.data_len = len as u32;
        len
    }

    /// Valid part of the data area.  A `data_len` beyond the data area is
    /// capped.
    pub fn data(&self) -> &[u8] {
        &self.data[..(self.data_len as usize).min(MSG_DATA_SIZE)]
    }

    pub fn request_kind(&self) -> Result<RequestKind> {
        RequestKind::try_from(self.kind)
    }

    pub fn response_kind(&self) -> Result<ResponseKind> {
        ResponseKind::try_from(self.kind)
    }

    pub fn encode(&self) -> [u8; CONFIG_MSG_LEN] {
        let mut out = [0u8; CONFIG_MSG_LEN];
        out[0..4].copy_from_slice(&self.seq.to_le_bytes());
        out[4..8].copy_from_slice(&self.kind.to_le_bytes());
        out[8..12].copy_from_slice(&self.index.to_le_bytes());
        out[12..16].copy_from_slice(&self.value.to_le_bytes());
        out[16..20].copy_from_slice(&self.data_len.to_le_bytes());
        out[CONFIG_HEADER_LEN..].copy_from_slice(&self.data);
        out
    }

    /// Decode a message.  Anything after the fixed fields is taken as data,
    /// up to [`MSG_DATA_SIZE`] bytes.
    ///
    /// Returns [`Error::BufferTooSmall`] if `bytes` is shorter than
    /// [`CONFIG_HEADER_LEN`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CONFIG_HEADER_LEN {
            return Err(Error::BufferTooSmall);
        }

        let word = |offset: usize| {
            [
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ]
        };

        let mut msg = Self::with_kind(
            u32::from_le_bytes(word(0)),
            u32::from_le_bytes(word(4)),
            i32::from_le_bytes(word(8)),
            i32::from_le_bytes(word(12)),
        );
        msg.data_len = u32::from_le_bytes(word(16));

        let data = &bytes[CONFIG_HEADER_LEN..];
        let len = data.len().min(MSG_DATA_SIZE);
        msg.data[..len].copy_from_slice(&data[..len]);

        Ok(msg)
    }
}

impl fmt::Debug for ConfigMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigMsg")
            .field("seq", &self.seq)
            .field("kind", &self.kind)
            .field("index", &self.index)
            .field("value", &self.value)
            .field("data_len", &self.data_len)
            .field("data", &self.data())
            .finish()
    }
}
