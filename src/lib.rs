//! Inter-core messaging for asymmetric multiprocessing (AMP) systems, using
//! rpmsg over virtio rings in shared memory.
//!
//! This crate lets a bare-metal firmware image on one core of an SoC talk to
//! a Linux kernel running on another core.  The two cores share a memory
//! region holding a pair of vrings, and signal each other with inter-core
//! interrupts ("kicks").  Several named channels are multiplexed over the
//! ring pair.  On top of one channel a small request/response protocol
//! exposes the firmware's configuration variables to the OS side.
//!
//! `no_std`.  Requires `alloc` for async traits, typically only used on the
//! OS side.
//!
//! ## Architecture
//!
//! Assumes a firmware (bare-metal) core and an OS (Linux) core.
//!
//! Communication takes place using two unidirectional vrings in shared
//! memory:
//! - **vring0**: firmware writes messages, OS reads
//! - **vring1**: OS writes messages, firmware reads
//!
//! In both cases the OS side owns the buffers.  It makes empty (vring0) or
//! filled (vring1) buffers available, and the firmware hands each one back
//! through the used ring once done with it.  The firmware never writes the
//! available rings and the OS never writes the used rings, so the rings
//! need no locks, only memory barriers and cache maintenance.
//!
//! Each buffer holds one message: a 16 byte header with source and
//! destination channel addresses, followed by up to 496 bytes of payload.
//!
//! On the firmware side everything runs in one polling loop.  The interrupt
//! handlers only count kicks, see [`notify::Kicks`], and
//! [`channel::Transport::poll()`] does the rest.
//!
//! ## Modules
//!
//! - [`io`] - Shared memory access, the only place raw memory is touched
//! - [`vring`] - Vring layout and both ends of a ring
//! - [`notify`] - Kicks in both directions
//! - [`channel`] - Channel multiplexer, the firmware's transport
//! - [`config`] - Configuration variable protocol and the firmware's server
//! - [`client`] - OS side configuration client, sync and async
//!
//! ## Getting Started
//!
//! **Firmware setup**:
//! 1. Create a static [`notify::Kicks`] and call its `on_tx_kick()` /
//!    `on_rx_kick()` from the vring interrupt handlers
//! 2. Create a [`channel::Transport`] from a [`channel::TransportConfig`],
//!    usually pointing at the remoteproc resource table's vring entries
//! 3. Create a [`config::ConfigServer`] over your variables (for example a
//!    [`config::VarTable`]) and register it with
//!    [`channel::Transport::create_channel()`] as `"cfg_mgmt"`
//! 4. Call [`channel::Transport::poll()`] from your main loop, idling when
//!    it returns `false`
//!
//! **OS side**:
//! 1. Provide a [`client::Link`] (or [`client::futures::AsyncLink`]) that
//!    sends bytes on the channel
//! 2. Create a [`client::sync::ConfigClient`] or
//!    [`client::futures::AsyncConfigClient`], and route every message
//!    received on the channel to its `on_message()`
//! 3. Use [`client::directory::VarDirectory`] to access variables by name
//!
//! ## Features
//!
//! Default features:
//! - `async` - Enable the async configuration client (requires `alloc`).
//!
//! Compile with `--no-default-features` for the firmware.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![no_std]

#[cfg(feature = "async")]
extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod channel;
pub mod client;
pub mod config;
pub mod io;
pub mod notify;
pub mod vring;

use core::fmt;

/// Errors
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Error {
    /// No data available
    NoData,
    /// Response for a sequence number with no pending transaction
    UnknownSequence,
    /// Buffer too small for operation
    BufferTooSmall,
    /// I/O error
    Io,
    /// Vring not yet assigned by the OS side
    Uninit,
    /// Vring or buffer not aligned
    NotAligned,
    /// Fixed size table or pool is full
    ResourceExhausted,
    /// Wait for a response was interrupted
    Interrupted,
    /// Firmware rejected the variable index
    BadIndex,
    /// Firmware rejected the request
    BadRequest,
    /// Vring size is not a power of two, or differs between vrings
    InvalidRingSize,
    /// Malformed or unexpected message
    Protocol,
    /// Text could not be parsed as a number
    Parse,
    /// No variable with this name
    UnknownVariable,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NoData => "no data available",
            Error::UnknownSequence => "no pending request with this sequence number",
            Error::BufferTooSmall => "buffer too small",
            Error::Io => "I/O error",
            Error::Uninit => "vring not initialized",
            Error::NotAligned => "not aligned",
            Error::ResourceExhausted => "no free slot",
            Error::Interrupted => "interrupted",
            Error::BadIndex => "invalid variable index",
            Error::BadRequest => "request rejected",
            Error::InvalidRingSize => "invalid vring size",
            Error::Protocol => "protocol error",
            Error::Parse => "invalid number",
            Error::UnknownVariable => "unknown variable",
        };
        f.write_str(msg)
    }
}

/// Type to represent the result of an operation
pub type Result<T> = core::result::Result<T, Error>;
