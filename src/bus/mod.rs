//! Publish/subscribe bus.
//!
//! The contract layer talks to the bus only through [`MessageBus`]:
//! addressable sends with a per-message codec name, consumers, a codec
//! table, and request/reply correlation through [`Envelope`].
//!
//! [`EventBus`] is an in-process implementation running consumers on a
//! pool of reactor threads (see [`reactor`]).

mod envelope;
mod event_bus;
pub mod reactor;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::codec::{BusCodec, SIMPLE_CODEC_NAME};
use crate::error::{ContractError, Result};

pub use envelope::Envelope;
pub(crate) use envelope::{ReplyResult, ReplySlot};
pub use event_bus::{EventBus, EventBusBuilder, WeakBus};

/// Boxed future used for handlers and async contract methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Consumer callback bound to an address.
pub type ConsumerHandler = Arc<dyn Fn(Envelope) -> BoxFuture<'static, ()> + Send + Sync>;

/// Box an async closure into a [`ConsumerHandler`].
pub fn handler<F, Fut>(f: F) -> ConsumerHandler
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |envelope| -> BoxFuture<'static, ()> { Box::pin(f(envelope)) })
}

/// Per-send options.
#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    /// Codec the body was encoded with.
    pub codec_name: String,
    /// Reply timeout; the bus default applies when `None`.
    pub timeout: Option<Duration>,
}

impl DeliveryOptions {
    /// Options for a body written by the named codec.
    pub fn with_codec(codec_name: impl Into<String>) -> Self {
        Self {
            codec_name: codec_name.into(),
            timeout: None,
        }
    }

    /// Override the reply timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self::with_codec(SIMPLE_CODEC_NAME)
    }
}

/// The bus primitives the contract layer relies on.
pub trait MessageBus: Send + Sync + 'static {
    /// Send a request and get a future of the reply.
    fn send(&self, address: &str, body: Bytes, options: DeliveryOptions) -> ReplyFuture;

    /// Send without expecting a reply.
    fn send_oneway(&self, address: &str, body: Bytes, options: DeliveryOptions) -> Result<()>;

    /// Bind a handler to an address.
    fn consumer(&self, address: &str, handler: ConsumerHandler) -> Result<()>;

    /// Add a codec to the codec table.
    ///
    /// Fails with [`ContractError::CodecAlreadyRegistered`] if the name is taken.
    fn register_codec(&self, codec: Arc<dyn BusCodec>) -> Result<()>;

    /// Whether a codec with this name is registered.
    fn has_codec(&self, name: &str) -> bool;
}

/// Future of a reply envelope.
///
/// Not tied to any runtime: it can be awaited anywhere or blocked on with
/// [`reactor::block_on`].
pub struct ReplyFuture {
    state: ReplyState,
}

enum ReplyState {
    Pending(oneshot::Receiver<ReplyResult>),
    Failed(Option<ContractError>),
}

impl ReplyFuture {
    pub(crate) fn pending(rx: oneshot::Receiver<ReplyResult>) -> Self {
        Self {
            state: ReplyState::Pending(rx),
        }
    }

    /// A reply future that has already failed.
    pub fn failed(error: ContractError) -> Self {
        Self {
            state: ReplyState::Failed(Some(error)),
        }
    }
}

impl Future for ReplyFuture {
    type Output = Result<Envelope>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            ReplyState::Pending(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
                Poll::Ready(Err(_)) => Poll::Ready(Err(ContractError::BusClosed)),
                Poll::Pending => Poll::Pending,
            },
            ReplyState::Failed(error) => {
                Poll::Ready(Err(error.take().unwrap_or(ContractError::BusClosed)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_use_simple_codec() {
        let options = DeliveryOptions::default();
        assert_eq!(options.codec_name, SIMPLE_CODEC_NAME);
        assert!(options.timeout.is_none());

        let options = DeliveryOptions::with_codec("[String]").timeout(Duration::from_secs(1));
        assert_eq!(options.codec_name, "[String]");
        assert_eq!(options.timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_failed_future_resolves_immediately() {
        let fut = ReplyFuture::failed(ContractError::NoHandler("nowhere".into()));
        let err = reactor::block_on(fut).unwrap_err();
        assert!(matches!(err, ContractError::NoHandler(a) if a == "nowhere"));
    }

    #[test]
    fn test_dropped_sender_means_closed() {
        let (tx, rx) = oneshot::channel::<ReplyResult>();
        drop(tx);
        let err = reactor::block_on(ReplyFuture::pending(rx)).unwrap_err();
        assert!(matches!(err, ContractError::BusClosed));
    }
}
