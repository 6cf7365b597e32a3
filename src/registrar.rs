//! Provider side: binding contract implementations to bus addresses.
//!
//! Every eligible method of a contract becomes one [`Route`]: a signature,
//! the codecs it needs, and a dispatcher that decodes the arguments,
//! invokes the provider and answers the request.
//!
//! # Example
//!
//! ```ignore
//! let provider: Arc<dyn Greeter> = Arc::new(EnglishGreeter);
//! let binding = bus.registrar().register::<GreeterContract>(provider)?;
//! assert_eq!(binding.addresses().len(), 3);
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::bus::{BoxFuture, ConsumerHandler, Envelope, MessageBus};
use crate::codec::{ArgList, CacheScope, CodecRegistry, WireValue};
use crate::contract::{Contract, MethodSignature};
use crate::error::{ContractError, Result, DECODE_ERROR_CODE, SERVER_ERROR_CODE};

type Dispatch = Arc<dyn Fn(Envelope, Arc<CodecRegistry>) -> BoxFuture<'static, ()> + Send + Sync>;

type Install = fn(&CodecRegistry, &dyn MessageBus) -> Result<()>;

/// Dispatch entry for one contract method.
pub struct Route {
    signature: MethodSignature,
    install: Install,
    dispatch: Dispatch,
}

impl Route {
    /// Route to a method returning a future of its result.
    ///
    /// The reply is sent when the future settles.
    pub fn awaited<A, R, F>(signature: MethodSignature, method: F) -> Self
    where
        A: ArgList,
        R: WireValue,
        F: Fn(A) -> BoxFuture<'static, Result<R>> + Send + Sync + 'static,
    {
        let method = Arc::new(method);
        let dispatch = move |envelope: Envelope, registry: Arc<CodecRegistry>| -> BoxFuture<'static, ()> {
            let method = method.clone();
            Box::pin(async move {
                let Some(args) = decode_args::<A>(&envelope, &registry) else {
                    return;
                };
                let outcome = AssertUnwindSafe(async move { method(args).await })
                    .catch_unwind()
                    .await;
                settle(&envelope, &registry, outcome);
            })
        };
        Self {
            signature,
            install: install_codecs::<A, R>,
            dispatch: Arc::new(dispatch),
        }
    }

    /// Route to a method returning its result directly.
    pub fn direct<A, R, F>(signature: MethodSignature, method: F) -> Self
    where
        A: ArgList,
        R: WireValue,
        F: Fn(A) -> Result<R> + Send + Sync + 'static,
    {
        let method = Arc::new(method);
        let dispatch = move |envelope: Envelope, registry: Arc<CodecRegistry>| -> BoxFuture<'static, ()> {
            let method = method.clone();
            Box::pin(async move {
                let Some(args) = decode_args::<A>(&envelope, &registry) else {
                    return;
                };
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| method(args)));
                settle(&envelope, &registry, outcome);
            })
        };
        Self {
            signature,
            install: install_codecs::<A, R>,
            dispatch: Arc::new(dispatch),
        }
    }

    /// Route to a fire-and-forget method. Nothing is replied.
    ///
    /// In native mode the method receives the envelope and may answer it itself.
    pub fn oneway<A, F>(signature: MethodSignature, method: F) -> Self
    where
        A: ArgList,
        F: Fn(A) -> Result<()> + Send + Sync + 'static,
    {
        let method = Arc::new(method);
        let dispatch = move |envelope: Envelope, registry: Arc<CodecRegistry>| -> BoxFuture<'static, ()> {
            let method = method.clone();
            Box::pin(async move {
                let Some(args) = decode_args::<A>(&envelope, &registry) else {
                    return;
                };
                match std::panic::catch_unwind(AssertUnwindSafe(|| method(args))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!("Void method at {} failed: {}", envelope.address(), e);
                    }
                    Err(panic) => {
                        tracing::warn!(
                            "Void method at {} panicked: {}",
                            envelope.address(),
                            panic_message(panic.as_ref())
                        );
                    }
                }
            })
        };
        Self {
            signature,
            install: install_codecs::<A, ()>,
            dispatch: Arc::new(dispatch),
        }
    }

    /// Signature of the routed method.
    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    /// Bus address the route binds to.
    pub fn address(&self) -> String {
        self.signature.address()
    }
}

fn install_codecs<A: ArgList, R: WireValue>(
    registry: &CodecRegistry,
    bus: &dyn MessageBus,
) -> Result<()> {
    registry.ensure_signature::<A>(bus)?;
    registry.ensure_type::<R>(bus)?;
    Ok(())
}

/// Decode the arguments of a request, failing it with 400 on error.
fn decode_args<A: ArgList>(envelope: &Envelope, registry: &CodecRegistry) -> Option<A> {
    let codec = registry.for_signature::<A>();
    let decoded = if codec.is_native() {
        A::from_native(envelope.clone())
            .ok_or_else(|| ContractError::Decode("envelope argument not accepted".into()))
    } else if envelope.codec_name() != codec.name() {
        Err(ContractError::Decode(format!(
            "expected codec {}, message uses {}",
            codec.name(),
            envelope.codec_name()
        )))
    } else {
        codec.decode(envelope.body())
    };

    match decoded {
        Ok(args) => Some(args),
        Err(e) => {
            tracing::warn!("Rejected message at {}: {}", envelope.address(), e);
            envelope.fail(DECODE_ERROR_CODE, e.failure_message());
            None
        }
    }
}

/// Answer a request with the outcome of an invocation.
fn settle<R: WireValue>(
    envelope: &Envelope,
    registry: &CodecRegistry,
    outcome: std::thread::Result<Result<R>>,
) {
    match outcome {
        Ok(Ok(value)) => reply_value(envelope, registry, value),
        Ok(Err(e)) => {
            tracing::debug!("Provider at {} failed: {}", envelope.address(), e);
            let code = match &e {
                ContractError::ServerInvocation { code, .. } => *code,
                _ => SERVER_ERROR_CODE,
            };
            envelope.fail(code, e.failure_message());
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::warn!("Provider at {} panicked: {}", envelope.address(), message);
            envelope.fail(SERVER_ERROR_CODE, message);
        }
    }
}

fn reply_value<R: WireValue>(envelope: &Envelope, registry: &CodecRegistry, value: R) {
    let sent = match value.into_native() {
        Ok(native) => envelope.reply(native.body().clone(), native.codec_name()),
        Err(value) => {
            let codec = registry.for_type::<R>();
            codec
                .encode(&value)
                .and_then(|body| envelope.reply(body, codec.name()))
        }
    };
    if let Err(e) = sent {
        tracing::warn!("Failed to reply from {}: {}", envelope.address(), e);
        envelope.fail(SERVER_ERROR_CODE, e.failure_message());
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "provider panicked".to_string()
    }
}

/// Addresses bound by one registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractBinding {
    contract: &'static str,
    addresses: Vec<String>,
}

impl ContractBinding {
    /// Qualified name of the registered contract.
    pub fn contract(&self) -> &'static str {
        self.contract
    }

    /// Bound addresses, in declaration order.
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Whether nothing was bound.
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// Binds providers to a bus.
#[derive(Clone)]
pub struct ActorRegistrar {
    bus: Arc<dyn MessageBus>,
    registry: Arc<CodecRegistry>,
}

impl ActorRegistrar {
    /// Create a registrar with its own process-wide codec registry.
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self::with_registry(bus, Arc::new(CodecRegistry::new(CacheScope::Process)))
    }

    /// Create a registrar sharing a codec registry.
    pub fn with_registry(bus: Arc<dyn MessageBus>, registry: Arc<CodecRegistry>) -> Self {
        Self { bus, registry }
    }

    /// Bind every eligible method of contract `C` to its address.
    ///
    /// Ignored contracts and ignored methods are skipped. If two methods
    /// resolve to the same address with different signatures, registration
    /// fails with [`ContractError::AddressConflict`] and nothing is bound.
    pub fn register<C: Contract>(&self, provider: Arc<C::Provider>) -> Result<ContractBinding> {
        if C::IGNORED {
            tracing::debug!("Skipped ignored contract {}", C::NAME);
            return Ok(ContractBinding {
                contract: C::NAME,
                addresses: Vec::new(),
            });
        }

        let routes: Vec<(String, Route)> = C::routes(provider)
            .into_iter()
            .filter(|route| route.signature.is_eligible())
            .map(|route| (route.address(), route))
            .collect();
        check_conflicts(&routes)?;

        let mut addresses = Vec::with_capacity(routes.len());
        for (address, route) in routes {
            (route.install)(&self.registry, self.bus.as_ref())?;

            let dispatch = route.dispatch.clone();
            let registry = self.registry.clone();
            let consumer: ConsumerHandler =
                Arc::new(move |envelope: Envelope| dispatch(envelope, registry.clone()));
            self.bus.consumer(&address, consumer)?;

            tracing::debug!("Bound {} to {}", route.signature, address);
            addresses.push(address);
        }

        Ok(ContractBinding {
            contract: C::NAME,
            addresses,
        })
    }
}

fn check_conflicts(routes: &[(String, Route)]) -> Result<()> {
    let mut claimed: HashMap<&str, &MethodSignature> = HashMap::with_capacity(routes.len());
    for (address, route) in routes {
        if let Some(first) = claimed.insert(address, &route.signature) {
            if *first != route.signature {
                return Err(ContractError::AddressConflict {
                    address: address.clone(),
                    first: first.to_string(),
                    second: route.signature.to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{reactor, DeliveryOptions, EventBus};
    use crate::codec::{ArgsCodec, ValueCodec, SIMPLE_CODEC_NAME};
    use crate::contract::CallKind;
    use bytes::Bytes;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Ticket {
        id: u64,
        title: String,
    }

    crate::wire_pojo!(Ticket);

    crate::contract! {
        pub trait Desk {
            async fn open(&self, title: String) -> Ticket;
            fn total(&self) -> u64;
            fn touch(&self, id: u64);
            fn explode(&self) -> u64;
            #[ignore]
            fn internal(&self) -> u64;
        }
    }

    crate::contract! {
        pub trait Clashing {
            #[address("clash")]
            fn first(&self) -> u64;
            #[address("clash")]
            fn second(&self, x: u64) -> u64;
        }
    }

    #[derive(Default)]
    struct HelpDesk {
        touched: AtomicUsize,
    }

    impl Desk for HelpDesk {
        fn open(&self, title: String) -> BoxFuture<'_, Result<Ticket>> {
            Box::pin(async move {
                if title.is_empty() {
                    return Err(ContractError::failure(422, "title required"));
                }
                Ok(Ticket { id: 7, title })
            })
        }

        fn total(&self) -> Result<u64> {
            Ok(self.touched.load(Ordering::SeqCst) as u64)
        }

        fn touch(&self, _id: u64) -> Result<()> {
            self.touched.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn explode(&self) -> Result<u64> {
            panic!("boom")
        }

        fn internal(&self) -> Result<u64> {
            Ok(0)
        }
    }

    struct Never;

    impl Clashing for Never {
        fn first(&self) -> Result<u64> {
            Ok(1)
        }

        fn second(&self, x: u64) -> Result<u64> {
            Ok(x)
        }
    }

    fn desk_bus() -> (EventBus, ContractBinding) {
        let bus = EventBus::builder().reactors(1).build().unwrap();
        let provider: Arc<dyn Desk> = Arc::new(HelpDesk::default());
        let binding = bus.registrar().register::<DeskContract>(provider).unwrap();
        (bus, binding)
    }

    fn address(method: &str) -> String {
        format!("{}.{}", DeskContract::NAME, method)
    }

    #[test]
    fn test_binds_eligible_methods_only() {
        let (bus, binding) = desk_bus();
        assert_eq!(binding.contract(), DeskContract::NAME);
        assert_eq!(binding.addresses().len(), 4);
        assert_eq!(bus.consumer_count(&address("open([String])")), 1);
        assert_eq!(bus.consumer_count(&address("internal([])")), 0);
    }

    #[test]
    fn test_installs_complex_codecs() {
        let (bus, _) = desk_bus();
        assert!(bus.has_codec(ValueCodec::<Ticket>::new().name()));
        assert!(bus.has_codec("[String]"));
        assert!(!bus.has_codec(SIMPLE_CODEC_NAME));
    }

    #[test]
    fn test_awaited_reply_is_encoded() {
        let (bus, _) = desk_bus();
        let body = ArgsCodec::<(String,)>::new()
            .encode(&("printer".to_string(),))
            .unwrap();
        let reply = reactor::block_on(bus.send(
            &address("open([String])"),
            body,
            DeliveryOptions::with_codec("[String]"),
        ))
        .unwrap();

        assert_eq!(reply.codec_name(), ValueCodec::<Ticket>::new().name());
        let ticket: Ticket = crate::codec::decode_block(reply.body()).unwrap();
        assert_eq!(ticket.title, "printer");
    }

    #[test]
    fn test_async_failure_keeps_code() {
        let (bus, _) = desk_bus();
        let body = ArgsCodec::<(String,)>::new().encode(&(String::new(),)).unwrap();
        let err = reactor::block_on(bus.send(
            &address("open([String])"),
            body,
            DeliveryOptions::with_codec("[String]"),
        ))
        .unwrap_err();
        assert!(
            matches!(err, ContractError::ServerInvocation { code: 422, ref message } if message == "title required")
        );
    }

    #[test]
    fn test_bad_arguments_fail_with_decode() {
        let (bus, _) = desk_bus();
        let err = reactor::block_on(bus.send(
            &address("open([String])"),
            Bytes::from_static(&[0, 0, 0, 1, 9]),
            DeliveryOptions::with_codec("[String]"),
        ))
        .unwrap_err();
        assert!(matches!(err, ContractError::Decode(_)));
    }

    #[test]
    fn test_panic_becomes_server_error() {
        let (bus, _) = desk_bus();
        let body = ArgsCodec::<()>::new().encode(&()).unwrap();
        let err = reactor::block_on(bus.send(
            &address("explode([])"),
            body,
            DeliveryOptions::with_codec("[]"),
        ))
        .unwrap_err();
        assert!(
            matches!(err, ContractError::ServerInvocation { code: 500, ref message } if message == "boom")
        );
    }

    #[test]
    fn test_oneway_then_direct() {
        let (bus, _) = desk_bus();
        let touch = ArgsCodec::<(u64,)>::new().encode(&(1,)).unwrap();
        bus.send_oneway(
            &address("touch([u64])"),
            touch,
            DeliveryOptions::with_codec("[u64]"),
        )
        .unwrap();

        let total = || {
            let body = ArgsCodec::<()>::new().encode(&()).unwrap();
            let reply = reactor::block_on(bus.send(
                &address("total([])"),
                body,
                DeliveryOptions::with_codec("[]"),
            ))
            .unwrap();
            crate::codec::decode_block::<u64>(reply.body()).unwrap()
        };
        for _ in 0..50 {
            if total() == 1 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(total(), 1);
    }

    #[test]
    fn test_conflict_binds_nothing() {
        let bus = EventBus::builder().reactors(1).build().unwrap();
        let provider: Arc<dyn Clashing> = Arc::new(Never);
        let err = bus
            .registrar()
            .register::<ClashingContract>(provider)
            .unwrap_err();

        assert!(matches!(err, ContractError::AddressConflict { ref address, .. } if address == "clash"));
        assert_eq!(bus.consumer_count("clash"), 0);
    }

    #[test]
    fn test_same_contract_twice_is_load_balanced() {
        let (bus, first) = desk_bus();
        let provider: Arc<dyn Desk> = Arc::new(HelpDesk::default());
        let second = bus.registrar().register::<DeskContract>(provider).unwrap();
        assert_eq!(first, second);
        assert_eq!(bus.consumer_count(&address("total([])")), 2);
    }

    #[test]
    fn test_route_accessors() {
        let signature = MethodSignature::new(
            "app::Echo",
            "echo",
            CallKind::Blocking,
            vec![crate::codec::TypeDescriptor::Primitive("String")],
            crate::codec::TypeDescriptor::Primitive("String"),
        );
        let route = Route::direct::<(String,), String, _>(signature, |(s,)| Ok(s));
        assert_eq!(route.address(), "app::Echo.echo([String])");
        assert_eq!(route.signature().kind, CallKind::Blocking);
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "provider panicked");
    }
}
