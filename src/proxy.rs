//! Consumer side: sending contract calls.
//!
//! An [`Invoker`] turns a method signature and an argument tuple into a bus
//! message and maps the reply back. Generated `<Name>Client` types forward
//! every trait method to it:
//!
//! | Declared return | Invoker call | Behavior |
//! |---|---|---|
//! | `async fn m(..) -> R` | [`call_async`](Invoker::call_async) | future of the decoded reply |
//! | `fn m(..) -> R` | [`call_blocking`](Invoker::call_blocking) | waits for the reply, never on a reactor |
//! | `fn m(..)` | [`call_oneway`](Invoker::call_oneway) | returns once sent |
//!
//! Ignored methods fail with [`ContractError::UnsupportedOperation`]
//! without touching the bus.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::bus::{reactor, BoxFuture, DeliveryOptions, MessageBus};
use crate::codec::{ArgList, CacheScope, CodecRegistry, WireValue};
use crate::contract::{Contract, MethodSignature};
use crate::error::{ContractError, Result};

/// Sends contract calls over a bus.
///
/// Cheap to clone; clones share the bus and codec registry.
#[derive(Clone)]
pub struct Invoker {
    bus: Arc<dyn MessageBus>,
    registry: Arc<CodecRegistry>,
    timeout: Option<Duration>,
}

impl Invoker {
    /// Create an invoker with its own process-wide codec registry.
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self::with_registry(bus, Arc::new(CodecRegistry::new(CacheScope::Process)))
    }

    /// Create an invoker sharing a codec registry.
    pub fn with_registry(bus: Arc<dyn MessageBus>, registry: Arc<CodecRegistry>) -> Self {
        Self {
            bus,
            registry,
            timeout: None,
        }
    }

    /// Override the bus reply timeout for calls made through this invoker.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Client of contract `C` sending through this invoker.
    pub fn client<C: Contract>(&self) -> C::Client {
        C::client(self.clone())
    }

    /// Send a call and decode the reply as `R`.
    ///
    /// If `R` is the bus envelope, the reply is handed out undecoded.
    pub fn call_async<A, R>(&self, signature: &MethodSignature, args: A) -> BoxFuture<'static, Result<R>>
    where
        A: ArgList,
        R: WireValue,
    {
        let address = match self.check(signature) {
            Ok(address) => address,
            Err(e) => return Box::pin(async move { Err(e) }),
        };
        self.request(&address, args)
    }

    /// Send a call and wait for the reply.
    ///
    /// Fails with [`ContractError::UnsupportedOperation`] on a reactor
    /// thread: the reactor would be blocked waiting on a reply it has to
    /// deliver itself.
    pub fn call_blocking<A, R>(&self, signature: &MethodSignature, args: A) -> Result<R>
    where
        A: ArgList,
        R: WireValue,
    {
        let address = self.check(signature)?;
        if reactor::is_reactor_thread() {
            return Err(ContractError::UnsupportedOperation(format!(
                "blocking call to {} from a reactor thread",
                address
            )));
        }
        reactor::block_on(self.request(&address, args))
    }

    /// Send a call without waiting for any reply.
    pub fn call_oneway<A: ArgList>(&self, signature: &MethodSignature, args: A) -> Result<()> {
        let address = self.check(signature)?;
        let (body, options) = self.encode(args)?;
        tracing::trace!("Sending oneway to {}", address);
        self.bus.send_oneway(&address, body, options)
    }

    /// Send `args` to an explicit address and decode the reply as `R`.
    ///
    /// `R` plays the role of a return type hint for ad-hoc calls.
    pub fn request<A, R>(&self, address: &str, args: A) -> BoxFuture<'static, Result<R>>
    where
        A: ArgList,
        R: WireValue,
    {
        let prepared = self
            .registry
            .ensure_type::<R>(self.bus.as_ref())
            .and_then(|_| self.encode(args));
        let (body, options) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        tracing::trace!("Sending request to {} ({})", address, options.codec_name);
        let reply = self.bus.send(address, body, options);
        Box::pin(async move { R::from_reply(reply.await?) })
    }

    /// Resolve the address of an eligible method.
    fn check(&self, signature: &MethodSignature) -> Result<String> {
        if !signature.is_eligible() {
            return Err(ContractError::UnsupportedOperation(format!(
                "{} is not remotely invocable",
                signature
            )));
        }
        Ok(signature.address())
    }

    /// Encode arguments, passing a sole envelope argument through as is.
    fn encode<A: ArgList>(&self, args: A) -> Result<(Bytes, DeliveryOptions)> {
        let codec = self.registry.ensure_signature::<A>(self.bus.as_ref())?;
        let (body, codec_name) = match args.into_native() {
            Ok(envelope) => (envelope.body().clone(), envelope.codec_name().to_string()),
            Err(args) => (codec.encode(&args)?, codec.name().to_string()),
        };
        let mut options = DeliveryOptions::with_codec(codec_name);
        options.timeout = self.timeout;
        Ok((body, options))
    }
}
