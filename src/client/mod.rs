//! OS side client for the configuration protocol.
//!
//! Requests go out on the `cfg_mgmt` channel, responses come back on it and
//! are matched to their requests by sequence number, so any number of
//! callers (up to the transaction pool size) may have a request outstanding
//! at once.
//!
//! - [`Correlator`] - Transaction pool and pending list, shared by both
//!   clients
//! - [`sync::ConfigClient`] - Blocking client, waits using a [`Waiter`]
//! - [`futures::AsyncConfigClient`] - Async client, polls using an
//!   [`futures::AsyncDelay`]
//! - [`directory::VarDirectory`] - Variables addressed by name
//!
//! The application routes every message received on the channel to the
//! client's `on_message()`.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod directory;
#[cfg(feature = "async")]
pub mod futures;
pub mod sync;

#[cfg(feature = "async")]
pub use futures::{AsyncConfigClient, AsyncDelay, AsyncLink};
pub use sync::ConfigClient;

use core::fmt::Write;
use core::sync::atomic::{AtomicU32, Ordering};

use heapless::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use spin::Mutex;

use crate::config::{ConfigMsg, MSG_DATA_SIZE, RequestKind, ResponseKind};
use crate::{Error, Result};

/// Default number of transactions which may be outstanding at once
pub const POOL_SIZE: usize = 16;

/// Size of a reply's text buffer
pub const IO_BUF_SIZE: usize = MSG_DATA_SIZE;

/// Sends bytes on the configuration channel.
pub trait Link {
    fn send(&self, data: &[u8]) -> Result<()>;
}

impl<T: Link + ?Sized> Link for &T {
    fn send(&self, data: &[u8]) -> Result<()> {
        (**self).send(data)
    }
}

/// Blocks a calling context until its response has arrived.
///
/// On Linux this would be a wait queue, elsewhere a condition variable.
pub trait Waiter {
    /// Block until `ready()` returns true.
    ///
    /// Returns [`Error::Interrupted`] if the wait was given up first, for
    /// example because the calling process received a signal.
    fn wait_until(&self, ready: &dyn Fn() -> bool) -> Result<()>;

    /// Wake every blocked caller so it can re-check its condition
    fn wake_all(&self);
}

impl<T: Waiter + ?Sized> Waiter for &T {
    fn wait_until(&self, ready: &dyn Fn() -> bool) -> Result<()> {
        (**self).wait_until(ready)
    }

    fn wake_all(&self) {
        (**self).wake_all()
    }
}

/// Which aspect of a variable to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Value,
    Min,
    Max,
    Name,
    Description,
}

impl From<Access> for RequestKind {
    fn from(access: Access) -> Self {
        match access {
            Access::Value => RequestKind::Read,
            Access::Min => RequestKind::Min,
            Access::Max => RequestKind::Max,
            Access::Name => RequestKind::Name,
            Access::Description => RequestKind::Description,
        }
    }
}

/// Text carried by a [`Reply`]
pub type Text = Vec<u8, IO_BUF_SIZE>;

/// A successful response.
///
/// Numbers are also rendered as text, in decimal with a trailing newline,
/// ready to hand to whoever asked.  Names and descriptions are copied as
/// sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub kind: ResponseKind,
    pub value: i32,
    pub text: Text,
}

impl Reply {
    /// Decode a response.  Error responses become the matching [`Error`].
    pub fn from_msg(msg: &ConfigMsg) -> Result<Self> {
        let kind = match msg.response_kind() {
            Ok(kind) => kind,
            Err(e) => {
                error!("Unknown response type {} in msg nr {}", msg.kind, msg.seq);
                return Err(e);
            }
        };

        let mut text = Text::new();
        match kind {
            ResponseKind::Ok => (),
            ResponseKind::Count | ResponseKind::Value | ResponseKind::Min | ResponseKind::Max => {
                let mut number = heapless::String::<16>::new();
                writeln!(number, "{}", msg.value).map_err(|_| Error::BufferTooSmall)?;
                text.extend_from_slice(number.as_bytes())
                    .map_err(|_| Error::BufferTooSmall)?;
            }
            ResponseKind::Name | ResponseKind::Description => {
                let mut len = msg.data_len as usize;
                if len > IO_BUF_SIZE {
                    warn!("Truncating {len} bytes of text in msg nr {}", msg.seq);
                    len = IO_BUF_SIZE;
                }
                text.extend_from_slice(&msg.data[..len])
                    .map_err(|_| Error::BufferTooSmall)?;
            }
            ResponseKind::BadIndex => {
                debug!("received ID error for id {} in msg nr {}", msg.index, msg.seq);
                return Err(Error::BadIndex);
            }
            ResponseKind::BadRequest => {
                debug!("received request error for msg nr {}", msg.seq);
                return Err(Error::BadRequest);
            }
        }

        Ok(Self {
            kind,
            value: msg.value,
            text,
        })
    }

    /// The text as a string, empty if it isn't valid UTF-8
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.text).unwrap_or("")
    }
}

enum Slot {
    Free,
    Waiting,
    Abandoned,
    Done(Result<Reply>),
}

struct Transaction {
    seq: u32,
    slot: Slot,
}

/// Matches responses to outstanding requests.
///
/// Holds a fixed pool of `N` transactions.  A transaction is taken from the
/// free list by [`Self::begin()`] and put on the pending list under its
/// sequence number.  [`Self::complete()`] takes it off the pending list and
/// stores the result, and the [`Ticket`] holder then collects it, returning
/// the transaction to the free list.
///
/// If the ticket is dropped before the response arrives, the transaction
/// stays pending, marked abandoned, and is only recycled when its response
/// turns up.
pub struct Correlator<const N: usize = POOL_SIZE> {
    slots: [Mutex<Transaction>; N],
    free: Mutex<Vec<usize, N>>,
    pending: Mutex<Vec<(u32, usize), N>>,
    next_seq: AtomicU32,
    count: Mutex<Option<usize>>,
}

impl<const N: usize> Default for Correlator<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Correlator<N> {
    pub fn new() -> Self {
        let mut free = Vec::new();
        for slot in (0..N).rev() {
            let _ = free.push(slot);
        }

        Self {
            slots: core::array::from_fn(|_| {
                Mutex::new(Transaction {
                    seq: 0,
                    slot: Slot::Free,
                })
            }),
            free: Mutex::new(free),
            pending: Mutex::new(Vec::new()),
            next_seq: AtomicU32::new(0),
            count: Mutex::new(None),
        }
    }

    /// Start a transaction with the next sequence number.
    ///
    /// Returns [`Error::ResourceExhausted`] if all `N` transactions are in
    /// use.
    pub fn begin(&self) -> Result<Ticket<'_, N>> {
        let slot = self.free.lock().pop();
        let Some(slot) = slot else {
            warn!("All {N} transactions in use");
            return Err(Error::ResourceExhausted);
        };

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        *self.slots[slot].lock() = Transaction {
            seq,
            slot: Slot::Waiting,
        };
        if self.pending.lock().push((seq, slot)).is_err() {
            error!("Pending list full");
            self.slots[slot].lock().slot = Slot::Free;
            self.release(slot);
            return Err(Error::ResourceExhausted);
        }

        trace!("Started msg nr {seq} in slot {slot}");
        Ok(Ticket {
            correlator: self,
            slot,
            seq,
            finished: false,
        })
    }

    /// Deliver a response to whoever is waiting for it.
    ///
    /// Returns [`Error::UnknownSequence`] if no transaction is pending under
    /// the response's sequence number.  Decoding errors, and error
    /// responses, are handed to the waiter.
    pub fn complete(&self, msg: &ConfigMsg) -> Result<()> {
        let seq = msg.seq;
        let slot = {
            let mut pending = self.pending.lock();
            let Some(pos) = pending.iter().position(|&(s, _)| s == seq) else {
                error!("No pending request for msg nr {seq}");
                return Err(Error::UnknownSequence);
            };
            pending.swap_remove(pos).1
        };

        let result = Reply::from_msg(msg);
        let mut txn = self.slots[slot].lock();
        if matches!(txn.slot, Slot::Abandoned) {
            debug!("Late response for msg nr {seq}, recycling slot {slot}");
            txn.slot = Slot::Free;
            drop(txn);
            self.release(slot);
        } else {
            txn.slot = Slot::Done(result);
        }

        Ok(())
    }

    /// Number of transactions awaiting a response, abandoned ones included
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Number of transactions available to [`Self::begin()`]
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    /// Variable count, once known
    pub fn cached_count(&self) -> Option<usize> {
        *self.count.lock()
    }

    pub fn cache_count(&self, count: usize) {
        *self.count.lock() = Some(count);
    }

    fn release(&self, slot: usize) {
        if self.free.lock().push(slot).is_err() {
            error!("Free list overflow releasing slot {slot}");
        }
    }

    fn unlist(&self, slot: usize) {
        let mut pending = self.pending.lock();
        if let Some(pos) = pending.iter().position(|&(_, s)| s == slot) {
            pending.swap_remove(pos);
        }
    }
}

/// An outstanding request, see [`Correlator::begin()`].
///
/// Dropping a ticket before collecting the result abandons the request.
pub struct Ticket<'c, const N: usize> {
    correlator: &'c Correlator<N>,
    slot: usize,
    seq: u32,
    finished: bool,
}

impl<const N: usize> Ticket<'_, N> {
    /// Sequence number to put in the request
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Whether the response has arrived
    pub fn is_done(&self) -> bool {
        matches!(self.correlator.slots[self.slot].lock().slot, Slot::Done(_))
    }

    /// Collect the result if the response has arrived.
    pub fn try_take(&mut self) -> Option<Result<Reply>> {
        if self.finished {
            return None;
        }

        let mut txn = self.correlator.slots[self.slot].lock();
        let result = match core::mem::replace(&mut txn.slot, Slot::Free) {
            Slot::Done(result) => result,
            other => {
                txn.slot = other;
                return None;
            }
        };
        drop(txn);

        self.correlator.release(self.slot);
        self.finished = true;
        Some(result)
    }

    /// Withdraw a request which was never sent.
    pub fn cancel(mut self) {
        self.correlator.unlist(self.slot);
        self.correlator.slots[self.slot].lock().slot = Slot::Free;
        self.correlator.release(self.slot);
        self.finished = true;
    }
}

impl<const N: usize> Drop for Ticket<'_, N> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let mut txn = self.correlator.slots[self.slot].lock();
        match core::mem::replace(&mut txn.slot, Slot::Free) {
            Slot::Waiting => {
                debug!("Abandoned msg nr {}", txn.seq);
                txn.slot = Slot::Abandoned;
            }
            Slot::Done(_) => {
                drop(txn);
                self.correlator.release(self.slot);
            }
            other => txn.slot = other,
        }
    }
}

/// Parse an integer the way the kernel's `kstrtol(s, 0, ..)` does.
///
/// Accepts an optional sign, then `0x` for hex, a leading `0` for octal, or
/// decimal, and a single trailing newline.
pub fn parse_int(text: &str) -> Result<i32> {
    let text = text.strip_suffix('\n').unwrap_or(text);
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    let (radix, digits) = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        (16, hex)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };

    if digits.is_empty() {
        return Err(Error::Parse);
    }

    let mut magnitude: i64 = 0;
    for c in digits.chars() {
        let digit = c.to_digit(radix).ok_or(Error::Parse)?;
        magnitude = magnitude
            .checked_mul(radix as i64)
            .and_then(|m| m.checked_add(digit as i64))
            .ok_or(Error::Parse)?;
    }

    let value = if negative { -magnitude } else { magnitude };
    i32::try_from(value).map_err(|_| Error::Parse)
}

#[cfg(test)]
mod test {
    use super::*;

    fn response(seq: u32, kind: ResponseKind, value: i32) -> ConfigMsg {
        ConfigMsg::response(seq, kind, 0, value)
    }

    #[test]
    fn sequence_numbers_start_at_zero() {
        let correlator = Correlator::<4>::new();
        let a = correlator.begin().unwrap();
        let b = correlator.begin().unwrap();
        assert_eq!(a.seq(), 0);
        assert_eq!(b.seq(), 1);
        assert_eq!(correlator.pending(), 2);
        assert_eq!(correlator.available(), 2);
    }

    #[test]
    fn responses_in_any_order() {
        let correlator = Correlator::<4>::new();
        let mut a = correlator.begin().unwrap();
        let mut b = correlator.begin().unwrap();

        correlator
            .complete(&response(b.seq(), ResponseKind::Value, 2))
            .unwrap();
        assert!(a.try_take().is_none());
        assert!(b.is_done());
        correlator
            .complete(&response(a.seq(), ResponseKind::Value, 1))
            .unwrap();

        assert_eq!(a.try_take().unwrap().unwrap().value, 1);
        assert_eq!(b.try_take().unwrap().unwrap().value, 2);
        assert_eq!(correlator.pending(), 0);
        assert_eq!(correlator.available(), 4);
    }

    #[test]
    fn pool_exhaustion() {
        let correlator = Correlator::<2>::new();
        let _a = correlator.begin().unwrap();
        let b = correlator.begin().unwrap();
        assert!(matches!(correlator.begin(), Err(Error::ResourceExhausted)));

        b.cancel();
        assert_eq!(correlator.pending(), 1);
        assert!(correlator.begin().is_ok());
    }

    #[test]
    fn unknown_sequence_is_rejected() {
        let correlator = Correlator::<2>::new();
        let _a = correlator.begin().unwrap();
        assert_eq!(
            correlator.complete(&response(7, ResponseKind::Ok, 0)),
            Err(Error::UnknownSequence)
        );
        assert_eq!(correlator.pending(), 1);
    }

    #[test]
    fn abandoned_slot_recycled_by_late_response() {
        let correlator = Correlator::<2>::new();
        let seq = {
            let ticket = correlator.begin().unwrap();
            ticket.seq()
        };

        // Still pending, slot not reusable yet
        assert_eq!(correlator.pending(), 1);
        assert_eq!(correlator.available(), 1);

        correlator
            .complete(&response(seq, ResponseKind::Value, 5))
            .unwrap();
        assert_eq!(correlator.pending(), 0);
        assert_eq!(correlator.available(), 2);

        // A second late copy finds nothing
        assert_eq!(
            correlator.complete(&response(seq, ResponseKind::Value, 5)),
            Err(Error::UnknownSequence)
        );
    }

    #[test]
    fn reply_text() {
        let reply = Reply::from_msg(&response(0, ResponseKind::Min, -40)).unwrap();
        assert_eq!(reply.as_str(), "-40\n");

        let mut msg = response(3, ResponseKind::Name, 9);
        msg.set_data(b"pwm_freq");
        let reply = Reply::from_msg(&msg).unwrap();
        assert_eq!(reply.as_str(), "pwm_freq");
        assert_eq!(reply.value, 9);

        msg.data_len = 401;
        let reply = Reply::from_msg(&msg).unwrap();
        assert_eq!(reply.text.len(), IO_BUF_SIZE);
        assert!(reply.as_str().starts_with("pwm_freq"));

        let ok = Reply::from_msg(&response(0, ResponseKind::Ok, 0)).unwrap();
        assert!(ok.text.is_empty());
    }

    #[test]
    fn error_replies() {
        assert_eq!(
            Reply::from_msg(&response(0, ResponseKind::BadIndex, 0)),
            Err(Error::BadIndex)
        );
        assert_eq!(
            Reply::from_msg(&response(0, ResponseKind::BadRequest, 0)),
            Err(Error::BadRequest)
        );
        let mut msg = response(0, ResponseKind::Ok, 0);
        msg.kind = 3;
        assert_eq!(Reply::from_msg(&msg), Err(Error::Protocol));
    }

    #[test]
    fn kstrtol_compatible_parsing() {
        assert_eq!(parse_int("42\n"), Ok(42));
        assert_eq!(parse_int("-17"), Ok(-17));
        assert_eq!(parse_int("+5"), Ok(5));
        assert_eq!(parse_int("0x1F"), Ok(31));
        assert_eq!(parse_int("-0X10"), Ok(-16));
        assert_eq!(parse_int("010"), Ok(8));
        assert_eq!(parse_int("0"), Ok(0));
        assert_eq!(parse_int("-2147483648"), Ok(i32::MIN));

        for bad in ["", "\n", "-", "0x", "09", "12a", " 1", "1\n\n", "2147483648"] {
            assert_eq!(parse_int(bad), Err(Error::Parse), "{bad:?}");
        }
    }
}
