//! Message envelope.
//!
//! An [`Envelope`] is what a consumer receives: the address it was sent to,
//! the encoded body, the codec name the sender used, and, for requests, a
//! reply slot.
//!
//! - `reply` - answer the request with an encoded body
//! - `fail` - answer the request with a failure code and message
//!
//! Only the first answer counts; later ones are ignored.
//!
//! # Example
//!
//! ```ignore
//! bus.consumer("echo", handler(|envelope: Envelope| async move {
//!     let body = envelope.body().clone();
//!     let _ = envelope.reply(body, envelope.codec_name());
//! }))?;
//! ```

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::event_bus::CodecTable;
use crate::codec::SIMPLE_CODEC_NAME;
use crate::error::{ContractError, Result};

/// Outcome delivered to a waiting sender.
pub(crate) type ReplyResult = Result<Envelope>;

/// Reply side of a request, shared by all clones of its envelope.
pub(crate) struct ReplySlot {
    sender: Mutex<Option<oneshot::Sender<ReplyResult>>>,
    codecs: CodecTable,
}

impl ReplySlot {
    pub(crate) fn new(sender: oneshot::Sender<ReplyResult>, codecs: CodecTable) -> Arc<Self> {
        Arc::new(Self {
            sender: Mutex::new(Some(sender)),
            codecs,
        })
    }

    fn settle(&self, outcome: ReplyResult) -> bool {
        match self.sender.lock().take() {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }
}

/// A message delivered by the bus.
///
/// Cloning is cheap: the body is reference-counted and clones share the
/// reply slot.
#[derive(Clone)]
pub struct Envelope {
    address: String,
    body: Bytes,
    codec_name: String,
    reply: Option<Arc<ReplySlot>>,
}

impl Envelope {
    pub(crate) fn new(
        address: String,
        body: Bytes,
        codec_name: String,
        reply: Option<Arc<ReplySlot>>,
    ) -> Self {
        Self {
            address,
            body,
            codec_name,
            reply,
        }
    }

    /// Create a detached envelope carrying only a body.
    ///
    /// Detached envelopes expect no reply; `reply` and `fail` are no-ops.
    pub fn from_body(body: Bytes) -> Self {
        Self::new(String::new(), body, SIMPLE_CODEC_NAME.to_string(), None)
    }

    /// Set the codec name (builder style).
    pub fn with_codec_name(mut self, codec_name: impl Into<String>) -> Self {
        self.codec_name = codec_name.into();
        self
    }

    /// Address the message was sent to. Empty for replies and detached envelopes.
    #[inline]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Encoded body.
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Codec name the sender used.
    #[inline]
    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    /// Whether the sender is waiting for an answer.
    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Answer the request with an encoded body.
    ///
    /// Fails with [`ContractError::UnknownCodec`] if `codec_name` is neither
    /// the simple sentinel nor registered on the bus.
    pub fn reply(&self, body: Bytes, codec_name: &str) -> Result<()> {
        let Some(slot) = &self.reply else {
            return Ok(());
        };
        slot.codecs.check(codec_name)?;
        let answer = Envelope::new(String::new(), body, codec_name.to_string(), None);
        if !slot.settle(Ok(answer)) {
            tracing::debug!("Reply to {} dropped: already answered or abandoned", self.address);
        }
        Ok(())
    }

    /// Answer the request with a failure.
    pub fn fail(&self, code: i32, message: impl Into<String>) {
        let Some(slot) = &self.reply else {
            return;
        };
        let failure = ContractError::from_failure(code, message.into());
        if !slot.settle(Err(failure)) {
            tracing::debug!("Failure for {} dropped: already answered or abandoned", self.address);
        }
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("address", &self.address)
            .field("body_len", &self.body.len())
            .field("codec_name", &self.codec_name)
            .field("expects_reply", &self.expects_reply())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{BusCodec, ValueCodec};

    fn request() -> (Envelope, oneshot::Receiver<ReplyResult>, CodecTable) {
        let (tx, rx) = oneshot::channel();
        let codecs = CodecTable::default();
        let slot = ReplySlot::new(tx, codecs.clone());
        let envelope = Envelope::new(
            "greeter".into(),
            Bytes::from_static(b"hi"),
            SIMPLE_CODEC_NAME.into(),
            Some(slot),
        );
        (envelope, rx, codecs)
    }

    #[test]
    fn test_detached_envelope() {
        let envelope = Envelope::from_body(Bytes::from_static(b"data"));
        assert!(!envelope.expects_reply());
        assert_eq!(envelope.address(), "");
        assert_eq!(envelope.codec_name(), SIMPLE_CODEC_NAME);
        assert!(envelope.reply(Bytes::new(), SIMPLE_CODEC_NAME).is_ok());
        envelope.fail(500, "ignored");
    }

    #[tokio::test]
    async fn test_reply_reaches_sender() {
        let (envelope, rx, _) = request();
        envelope
            .reply(Bytes::from_static(b"hello"), SIMPLE_CODEC_NAME)
            .unwrap();

        let answer = rx.await.unwrap().unwrap();
        assert_eq!(&answer.body()[..], b"hello");
    }

    #[tokio::test]
    async fn test_only_first_answer_counts() {
        let (envelope, rx, _) = request();
        let clone = envelope.clone();

        envelope.fail(503, "busy");
        clone.reply(Bytes::from_static(b"late"), SIMPLE_CODEC_NAME).unwrap();

        match rx.await.unwrap() {
            Err(ContractError::ServerInvocation { code, message }) => {
                assert_eq!(code, 503);
                assert_eq!(message, "busy");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reply_with_unknown_codec_fails() {
        let (envelope, _rx, codecs) = request();
        let err = envelope.reply(Bytes::new(), "app::Missing").unwrap_err();
        assert!(matches!(err, ContractError::UnknownCodec(name) if name == "app::Missing"));

        let codec = ValueCodec::<Vec<String>>::new();
        codecs.insert(Arc::new(ValueCodec::<Vec<String>>::new())).unwrap();
        assert!(envelope.reply(Bytes::new(), BusCodec::name(&codec)).is_ok());
    }
}
