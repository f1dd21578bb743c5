//! Blocking configuration client - typically used from OS side code which
//! may sleep.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::client::{Access, Correlator, Link, POOL_SIZE, Reply, Waiter, parse_int};
use crate::config::{CONFIG_MSG_LEN, ConfigMsg, RequestKind};
use crate::{Error, Result};

/// Blocking client for the firmware's configuration variables.
///
/// Shareable between threads as long as the [`Link`] and [`Waiter`] are:
/// each caller blocks on its own request only.
///
/// Example usage:
///
/// ```rust,ignore
/// let client = ConfigClient::<_, _>::new(link, waiter);
///
/// // In the channel's receive callback
/// client.on_message(data)?;
///
/// // Anywhere else
/// let n = client.count()?;
/// client.write(0, 1)?;
/// let reply = client.read(0, Access::Value)?;
/// ```
pub struct ConfigClient<L: Link, W: Waiter, const N: usize = POOL_SIZE> {
    link: L,
    waiter: W,
    correlator: Correlator<N>,
}

impl<L: Link, W: Waiter, const N: usize> ConfigClient<L, W, N> {
    /// Create a new client
    ///
    /// Arguments:
    /// - `link`: Sends on the configuration channel
    /// - `waiter`: Blocks callers until their response arrives
    pub fn new(link: L, waiter: W) -> Self {
        Self {
            link,
            waiter,
            correlator: Correlator::new(),
        }
    }

    /// Send a request and block until the matching response arrives.
    ///
    /// Returns:
    /// - `Ok(reply)`: The firmware's answer
    /// - `Err(Error::BadIndex)` / `Err(Error::BadRequest)`: The firmware
    ///   rejected the request
    /// - `Err(Error::Interrupted)`: The wait was interrupted.  The request
    ///   stays outstanding until its response arrives.
    /// - `Err(Error::ResourceExhausted)`: Too many requests outstanding
    pub fn request(&self, kind: RequestKind, index: i32, value: i32) -> Result<Reply> {
        let mut ticket = self.correlator.begin()?;
        let msg = ConfigMsg::request(ticket.seq(), kind, index, value);

        if let Err(e) = self.link.send(&msg.encode()) {
            warn!("Failed to send msg nr {}: {e}", ticket.seq());
            ticket.cancel();
            return Err(e);
        }
        debug!("Sent {kind:?} request msg nr {} for id {index}", ticket.seq());

        self.waiter.wait_until(&|| ticket.is_done())?;
        ticket.try_take().unwrap_or(Err(Error::Interrupted))
    }

    /// Number of variables.  Only asked once, then cached.
    pub fn count(&self) -> Result<usize> {
        if let Some(count) = self.correlator.cached_count() {
            return Ok(count);
        }

        let reply = self.request(RequestKind::Count, -1, 0)?;
        let count = usize::try_from(reply.value).map_err(|_| Error::Protocol)?;
        self.correlator.cache_count(count);
        Ok(count)
    }

    /// Check the firmware is answering
    pub fn ping(&self) -> Result<()> {
        self.request(RequestKind::Nop, -1, 0).map(|_| ())
    }

    /// Read one aspect of variable `index`
    pub fn read(&self, index: usize, access: Access) -> Result<Reply> {
        self.request(access.into(), index_arg(index)?, 0)
    }

    /// Current value of variable `index`
    pub fn value(&self, index: usize) -> Result<i32> {
        self.read(index, Access::Value).map(|reply| reply.value)
    }

    /// Write variable `index`.  The firmware limits the value to the
    /// variable's range.
    pub fn write(&self, index: usize, value: i32) -> Result<()> {
        self.request(RequestKind::Write, index_arg(index)?, value)
            .map(|_| ())
    }

    /// Write variable `index` from text such as `"0x10\n"`.
    pub fn write_text(&self, index: usize, text: &str) -> Result<()> {
        let value = parse_int(text)?;
        self.write(index, value)
    }

    /// Handle a message received on the configuration channel.
    ///
    /// Call from the channel's receive callback.  Messages which are not
    /// exactly one [`ConfigMsg`] long, or which match no outstanding
    /// request, are dropped with an error.
    pub fn on_message(&self, data: &[u8]) -> Result<()> {
        let msg = decode_response(data)?;
        self.correlator.complete(&msg)?;
        self.waiter.wake_all();
        Ok(())
    }

    /// The client's transaction state
    pub fn correlator(&self) -> &Correlator<N> {
        &self.correlator
    }
}

// Helper functions shared with the async client

pub(crate) fn decode_response(data: &[u8]) -> Result<ConfigMsg> {
    if data.len() != CONFIG_MSG_LEN {
        warn!(
            "Dropping response of {} bytes, expected {CONFIG_MSG_LEN}",
            data.len()
        );
        return Err(Error::Protocol);
    }
    ConfigMsg::decode(data)
}

pub(crate) fn index_arg(index: usize) -> Result<i32> {
    i32::try_from(index).map_err(|_| Error::BadIndex)
}
