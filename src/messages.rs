//! Single-value messaging helpers.
//!
//! For code that talks to the bus directly rather than through a contract:
//!
//! ```
//! use contract_bus::bus::{handler, MessageBus};
//! use contract_bus::{messages, EventBus};
//!
//! let bus = EventBus::builder().reactors(1).build().unwrap();
//! // A strong handle here would keep the bus alive through its own consumer.
//! let replies = bus.downgrade();
//! bus.consumer("double", handler(move |envelope| {
//!     let bus = replies.clone();
//!     async move {
//!         let n = messages::decode_body::<i64>(&envelope);
//!         messages::reply(&bus, &envelope, n.map(|n| n * 2));
//!     }
//! })).unwrap();
//!
//! let reply = contract_bus::bus::reactor::block_on(messages::send(&bus, "double", &21i64)).unwrap();
//! assert_eq!(messages::decode_body::<i64>(&reply).unwrap(), 42);
//! ```

use crate::bus::{DeliveryOptions, Envelope, MessageBus, ReplyFuture};
use crate::codec::{decode_block, ValueCodec, WireValue};
use crate::error::{Result, SERVER_ERROR_CODE};

/// Send one value, registering its codec if needed.
pub fn send<T: WireValue>(bus: &dyn MessageBus, address: &str, value: &T) -> ReplyFuture {
    match encode(bus, value) {
        Ok((body, options)) => bus.send(address, body, options),
        Err(e) => ReplyFuture::failed(e),
    }
}

/// Send one value without expecting a reply.
pub fn publish<T: WireValue>(bus: &dyn MessageBus, address: &str, value: &T) -> Result<()> {
    let (body, options) = encode(bus, value)?;
    bus.send_oneway(address, body, options)
}

/// Answer a request with an encoded value, or fail it with 500.
pub fn reply<T: WireValue>(bus: &dyn MessageBus, envelope: &Envelope, result: Result<T>) {
    let sent = result.and_then(|value| {
        let (body, options) = encode(bus, &value)?;
        envelope.reply(body, &options.codec_name)
    });
    if let Err(e) = sent {
        tracing::debug!("Failing request at {}: {}", envelope.address(), e);
        envelope.fail(SERVER_ERROR_CODE, e.failure_message());
    }
}

/// Decode the body of a message as a single value block.
pub fn decode_body<T: WireValue>(envelope: &Envelope) -> Result<T> {
    decode_block(envelope.body())
}

fn encode<T: WireValue>(bus: &dyn MessageBus, value: &T) -> Result<(bytes::Bytes, DeliveryOptions)> {
    let codec = ValueCodec::<T>::new();
    if !codec.is_simple() && !bus.has_codec(codec.name()) {
        if let Err(e) = bus.register_codec(std::sync::Arc::new(ValueCodec::<T>::new())) {
            tracing::debug!("Codec {} not registered: {}", codec.name(), e);
        }
    }
    let body = codec.encode(value)?;
    Ok((body, DeliveryOptions::with_codec(codec.name())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{handler, reactor, EventBus};
    use crate::error::ContractError;
    use serde::{Deserialize, Serialize};
    use std::sync::mpsc;

    #[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
    struct Point {
        x: i32,
        y: i32,
    }

    crate::wire_pojo!(Point);

    fn mirror_bus() -> EventBus {
        let bus = EventBus::builder().reactors(1).build().unwrap();
        let replies = bus.downgrade();
        bus.consumer(
            "mirror",
            handler(move |envelope| {
                let bus = replies.clone();
                async move {
                    let point = decode_body::<Point>(&envelope).map(|p| Point { x: p.y, y: p.x });
                    reply(&bus, &envelope, point);
                }
            }),
        )
        .unwrap();
        bus
    }

    #[test]
    fn test_send_registers_codec() {
        let bus = mirror_bus();
        let reply = reactor::block_on(send(&bus, "mirror", &Point { x: 1, y: 2 })).unwrap();

        assert!(bus.has_codec(ValueCodec::<Point>::new().name()));
        assert_eq!(
            decode_body::<Point>(&reply).unwrap(),
            Point { x: 2, y: 1 }
        );
    }

    #[test]
    fn test_reply_error_fails_with_500() {
        let bus = mirror_bus();
        let err = reactor::block_on(send(&bus, "mirror", &"not a point".to_string())).unwrap_err();
        assert!(matches!(err, ContractError::ServerInvocation { code: 500, .. }));
    }

    #[test]
    fn test_publish() {
        let bus = EventBus::builder().reactors(1).build().unwrap();
        let (tx, rx) = mpsc::channel();
        bus.consumer(
            "log",
            handler(move |envelope| {
                let _ = tx.send(decode_body::<String>(&envelope));
                async {}
            }),
        )
        .unwrap();

        publish(&bus, "log", &"line".to_string()).unwrap();
        let line = rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        assert_eq!(line.unwrap(), "line");
    }
}
