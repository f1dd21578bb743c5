//! Asynchronous configuration client - typically used by OS side tooling
//! running an async executor.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::boxed::Box;
use async_trait::async_trait;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::client::sync::{decode_response, index_arg};
use crate::client::{Access, Correlator, POOL_SIZE, Reply, parse_int};
use crate::config::{ConfigMsg, RequestKind};
use crate::{Error, Result};

/// Sends bytes on the configuration channel.
///
/// Async version of [`crate::client::Link`].
#[async_trait(?Send)]
pub trait AsyncLink {
    async fn send(&self, data: &[u8]) -> Result<()>;
}

/// Pause between checks for a response.
///
/// [`AsyncConfigClient`] has no waker tied to the channel.  After sending a
/// request it checks its ticket, and until the response has been routed
/// through [`AsyncConfigClient::on_message()`] it awaits `delay()` and checks
/// again.  The delay therefore bounds how late a response is noticed.
///
/// For example, on tokio:
///
/// ```rust,ignore
/// struct Sleep;
/// impl AsyncDelay for Sleep {
///     async fn delay() {
///         tokio::time::sleep(std::time::Duration::from_micros(200)).await;
///     }
/// }
/// ```
pub trait AsyncDelay {
    fn delay() -> impl Future<Output = ()>;
}

/// Async client for the firmware's configuration variables.
///
/// See [`AsyncDelay`] for required delay trait.
///
/// Requests from concurrent tasks are matched up by sequence number, so they
/// may be outstanding at the same time.  Dropping a request's future before
/// it completes abandons the request, as an interrupted wait does for
/// [`crate::client::sync::ConfigClient`].
///
/// Example usage:
///
/// ```rust,ignore
/// let client = AsyncConfigClient::<_, Delay>::new(link);
///
/// // In the task receiving from the channel
/// client.on_message(data)?;
///
/// // Elsewhere
/// let (a, b) = join!(client.value(0), client.value(1));
/// ```
pub struct AsyncConfigClient<L: AsyncLink, D: AsyncDelay, const N: usize = POOL_SIZE> {
    link: L,
    correlator: Correlator<N>,
    _delay: core::marker::PhantomData<D>,
}

impl<L: AsyncLink, D: AsyncDelay, const N: usize> AsyncConfigClient<L, D, N> {
    /// Create a new AsyncConfigClient
    ///
    /// Arguments:
    /// - `link`: Sends on the configuration channel
    pub fn new(link: L) -> Self {
        Self {
            link,
            correlator: Correlator::new(),
            _delay: core::marker::PhantomData,
        }
    }

    /// Send a request and wait for the matching response.
    ///
    /// Returns:
    /// - `Ok(reply)`: The firmware's answer
    /// - `Err(error)`: As [`crate::client::sync::ConfigClient::request()`]
    pub async fn request(&self, kind: RequestKind, index: i32, value: i32) -> Result<Reply> {
        let mut ticket = self.correlator.begin()?;
        let msg = ConfigMsg::request(ticket.seq(), kind, index, value);

        if let Err(e) = self.link.send(&msg.encode()).await {
            warn!("Failed to send msg nr {}: {e}", ticket.seq());
            ticket.cancel();
            return Err(e);
        }
        debug!("Sent {kind:?} request msg nr {} for id {index}", ticket.seq());

        // Wait for response with polling
        loop {
            if let Some(result) = ticket.try_take() {
                return result;
            }

            D::delay().await;
        }
    }

    /// Number of variables.  Only asked once, then cached.
    pub async fn count(&self) -> Result<usize> {
        if let Some(count) = self.correlator.cached_count() {
            return Ok(count);
        }

        let reply = self.request(RequestKind::Count, -1, 0).await?;
        let count = usize::try_from(reply.value).map_err(|_| Error::Protocol)?;
        self.correlator.cache_count(count);
        Ok(count)
    }

    /// Read one aspect of variable `index`
    pub async fn read(&self, index: usize, access: Access) -> Result<Reply> {
        self.request(access.into(), index_arg(index)?, 0).await
    }

    /// Current value of variable `index`
    pub async fn value(&self, index: usize) -> Result<i32> {
        self.read(index, Access::Value).await.map(|reply| reply.value)
    }

    /// Write variable `index`
    pub async fn write(&self, index: usize, value: i32) -> Result<()> {
        self.request(RequestKind::Write, index_arg(index)?, value)
            .await
            .map(|_| ())
    }

    /// Write variable `index` from text such as `"0x10\n"`
    pub async fn write_text(&self, index: usize, text: &str) -> Result<()> {
        let value = parse_int(text)?;
        self.write(index, value).await
    }

    /// Handle a message received on the configuration channel.  The waiting
    /// request picks up the result on its next poll.
    pub fn on_message(&self, data: &[u8]) -> Result<()> {
        let msg = decode_response(data)?;
        self.correlator.complete(&msg)
    }

    /// The client's transaction state
    pub fn correlator(&self) -> &Correlator<N> {
        &self.correlator
    }
}
