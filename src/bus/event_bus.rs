//! In-process event bus.
//!
//! The [`EventBusBuilder`] configures reactors, reply timeout and codec
//! cache scope. The [`EventBus`] routes each send:
//! 1. Check the codec name against the codec table
//! 2. Pick a consumer of the address (round-robin)
//! 3. Spawn the handler on the consumer's reactor
//! 4. For requests, arm the reply timeout on the same reactor
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use contract_bus::bus::{handler, reactor, DeliveryOptions, EventBus, MessageBus};
//!
//! let bus = EventBus::builder().reactors(1).build().unwrap();
//! bus.consumer("echo", handler(|envelope| async move {
//!     let body = envelope.body().clone();
//!     let _ = envelope.reply(body, envelope.codec_name());
//! })).unwrap();
//!
//! let reply = reactor::block_on(bus.send(
//!     "echo",
//!     Bytes::from_static(b"ping"),
//!     DeliveryOptions::default(),
//! )).unwrap();
//! assert_eq!(&reply.body()[..], b"ping");
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::oneshot;

use super::reactor::ReactorPool;
use super::{
    ConsumerHandler, DeliveryOptions, Envelope, MessageBus, ReplyFuture, ReplyResult, ReplySlot,
};
use crate::codec::{BusCodec, CacheScope, CodecRegistry, SIMPLE_CODEC_NAME};
use crate::config::BusConfig;
use crate::error::{ContractError, Result};
use crate::proxy::Invoker;
use crate::registrar::ActorRegistrar;

/// Append-only codec table shared by a bus and its reply slots.
#[derive(Clone, Default)]
pub(crate) struct CodecTable(Arc<RwLock<HashMap<String, Arc<dyn BusCodec>>>>);

impl CodecTable {
    pub(crate) fn insert(&self, codec: Arc<dyn BusCodec>) -> Result<()> {
        let mut table = self.0.write();
        let name = codec.name().to_string();
        if table.contains_key(&name) {
            return Err(ContractError::CodecAlreadyRegistered(name));
        }
        tracing::debug!("Registered codec {} for {}", name, codec.bound_type());
        table.insert(name, codec);
        Ok(())
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.0.read().contains_key(name)
    }

    /// Accept the simple sentinel and registered names.
    pub(crate) fn check(&self, name: &str) -> Result<()> {
        if name == SIMPLE_CODEC_NAME || self.contains(name) {
            Ok(())
        } else {
            Err(ContractError::UnknownCodec(name.to_string()))
        }
    }

    fn len(&self) -> usize {
        self.0.read().len()
    }
}

/// Builder for configuring and creating an event bus.
pub struct EventBusBuilder {
    config: BusConfig,
}

impl EventBusBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: BusConfig::default(),
        }
    }

    /// Start from an existing configuration.
    pub fn with_config(config: BusConfig) -> Self {
        Self { config }
    }

    /// Set the number of reactor threads.
    ///
    /// Default: available parallelism, at most 4
    pub fn reactors(mut self, count: usize) -> Self {
        self.config.reactors = count;
        self
    }

    /// Set the reply timeout.
    ///
    /// Default: 30 seconds
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.config.reply_timeout = timeout;
        self
    }

    /// Set the codec cache scope.
    ///
    /// Default: [`CacheScope::Process`]
    pub fn codec_cache(mut self, scope: CacheScope) -> Self {
        self.config.codec_cache = scope;
        self
    }

    /// Set the reactor thread name prefix.
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Start the reactors and build the bus.
    pub fn build(self) -> Result<EventBus> {
        EventBus::start(self.config)
    }
}

impl Default for EventBusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct ConsumerEntry {
    reactor: usize,
    handler: ConsumerHandler,
}

#[derive(Default)]
struct ConsumerGroup {
    entries: Vec<Arc<ConsumerEntry>>,
    next: AtomicUsize,
}

struct BusInner {
    config: BusConfig,
    reactors: ReactorPool,
    consumers: RwLock<HashMap<String, ConsumerGroup>>,
    codecs: CodecTable,
    registry: Arc<CodecRegistry>,
    closed: AtomicBool,
}

/// A running in-process event bus.
///
/// Cheap to clone; all clones share the same reactors, consumers and codecs.
/// The reactors stop when the last clone is dropped or [`close`](EventBus::close)
/// is called. Invokers, registrars and anything captured by a consumer
/// should hold a [`WeakBus`] instead, or the consumer table keeps the bus
/// alive.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a new bus builder.
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::new()
    }

    fn start(config: BusConfig) -> Result<Self> {
        let reactors = ReactorPool::start(config.reactors, &config.thread_name_prefix)?;
        let registry = Arc::new(CodecRegistry::new(config.codec_cache));
        Ok(Self {
            inner: Arc::new(BusInner {
                config,
                reactors,
                consumers: RwLock::new(HashMap::new()),
                codecs: CodecTable::default(),
                registry,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Configuration the bus was built with.
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Number of reactors the bus was started with.
    pub fn reactor_count(&self) -> usize {
        self.inner.reactors.len()
    }

    /// Number of reactor threads that have not exited yet.
    pub fn live_reactors(&self) -> usize {
        self.inner.reactors.live()
    }

    /// Codec registry using this bus's cache scope.
    pub fn codec_registry(&self) -> Arc<CodecRegistry> {
        self.inner.registry.clone()
    }

    /// Number of codecs in the codec table.
    pub fn codec_count(&self) -> usize {
        self.inner.codecs.len()
    }

    /// Number of consumers bound to an address.
    pub fn consumer_count(&self, address: &str) -> usize {
        self.inner
            .consumers
            .read()
            .get(address)
            .map_or(0, |group| group.entries.len())
    }

    /// Non-owning handle to this bus.
    pub fn downgrade(&self) -> WeakBus {
        WeakBus {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Registrar binding providers to this bus.
    ///
    /// Holds a [`WeakBus`].
    pub fn registrar(&self) -> ActorRegistrar {
        ActorRegistrar::with_registry(Arc::new(self.downgrade()), self.codec_registry())
    }

    /// Invoker sending contract calls over this bus.
    ///
    /// Holds a [`WeakBus`], so a provider keeping a client does not keep
    /// the reactors running. Calls fail with [`ContractError::BusClosed`]
    /// once every `EventBus` handle is dropped.
    pub fn invoker(&self) -> Invoker {
        Invoker::with_registry(Arc::new(self.downgrade()), self.codec_registry())
    }

    #[cfg(test)]
    fn running_reactors(&self) -> Arc<AtomicUsize> {
        self.inner.reactors.running()
    }

    /// Stop every reactor. Later sends fail with [`ContractError::BusClosed`].
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("Closing event bus");
            self.inner.reactors.shutdown();
        }
    }

    /// Whether [`close`](EventBus::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn pick_consumer(&self, address: &str) -> Option<Arc<ConsumerEntry>> {
        let consumers = self.inner.consumers.read();
        let group = consumers.get(address)?;
        if group.entries.is_empty() {
            return None;
        }
        let index = group.next.fetch_add(1, Ordering::Relaxed) % group.entries.len();
        Some(group.entries[index].clone())
    }

    fn route(
        &self,
        address: &str,
        body: Bytes,
        options: DeliveryOptions,
        expect_reply: bool,
    ) -> Result<Option<oneshot::Receiver<ReplyResult>>> {
        if self.is_closed() {
            return Err(ContractError::BusClosed);
        }
        self.inner.codecs.check(&options.codec_name)?;
        let consumer = self
            .pick_consumer(address)
            .ok_or_else(|| ContractError::NoHandler(address.to_string()))?;

        if !expect_reply {
            let envelope = Envelope::new(address.to_string(), body, options.codec_name, None);
            let reactor = consumer.reactor;
            self.inner
                .reactors
                .spawn(reactor, async move { (consumer.handler)(envelope).await });
            return Ok(None);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let slot = ReplySlot::new(reply_tx, self.inner.codecs.clone());
        let envelope = Envelope::new(address.to_string(), body, options.codec_name, Some(slot));
        let timeout = options.timeout.unwrap_or(self.inner.config.reply_timeout);
        let address = address.to_string();

        let reactor = consumer.reactor;
        self.inner
            .reactors
            .spawn(reactor, async move { (consumer.handler)(envelope).await });
        self.inner.reactors.spawn(reactor, async move {
            let outcome = match tokio::time::timeout(timeout, reply_rx).await {
                Ok(Ok(outcome)) => outcome,
                // Every copy of the envelope is gone; no answer can come.
                Ok(Err(_)) => Err(ContractError::Timeout(address)),
                Err(_) => Err(ContractError::Timeout(address)),
            };
            let _ = done_tx.send(outcome);
        });

        Ok(Some(done_rx))
    }
}

impl MessageBus for EventBus {
    fn send(&self, address: &str, body: Bytes, options: DeliveryOptions) -> ReplyFuture {
        match self.route(address, body, options, true) {
            Ok(Some(rx)) => ReplyFuture::pending(rx),
            Ok(None) => ReplyFuture::failed(ContractError::BusClosed),
            Err(e) => ReplyFuture::failed(e),
        }
    }

    fn send_oneway(&self, address: &str, body: Bytes, options: DeliveryOptions) -> Result<()> {
        self.route(address, body, options, false).map(|_| ())
    }

    fn consumer(&self, address: &str, handler: ConsumerHandler) -> Result<()> {
        if self.is_closed() {
            return Err(ContractError::BusClosed);
        }
        let reactor = self.inner.reactors.pick();
        self.inner
            .consumers
            .write()
            .entry(address.to_string())
            .or_default()
            .entries
            .push(Arc::new(ConsumerEntry { reactor, handler }));
        tracing::debug!("Bound consumer for {} on reactor {}", address, reactor);
        Ok(())
    }

    fn register_codec(&self, codec: Arc<dyn BusCodec>) -> Result<()> {
        self.inner.codecs.insert(codec)
    }

    fn has_codec(&self, name: &str) -> bool {
        self.inner.codecs.contains(name)
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        tracing::debug!("Last event bus handle dropped");
        self.reactors.shutdown();
    }
}

/// Non-owning handle to an [`EventBus`].
///
/// Upgrades on every operation. Once the last `EventBus` handle is gone,
/// sends and bindings fail with [`ContractError::BusClosed`].
#[derive(Clone)]
pub struct WeakBus {
    inner: Weak<BusInner>,
}

impl WeakBus {
    /// The bus, if any `EventBus` handle is still alive.
    pub fn upgrade(&self) -> Option<EventBus> {
        self.inner.upgrade().map(|inner| EventBus { inner })
    }

    fn live(&self) -> Result<EventBus> {
        self.upgrade().ok_or(ContractError::BusClosed)
    }
}

impl MessageBus for WeakBus {
    fn send(&self, address: &str, body: Bytes, options: DeliveryOptions) -> ReplyFuture {
        match self.live() {
            Ok(bus) => bus.send(address, body, options),
            Err(e) => ReplyFuture::failed(e),
        }
    }

    fn send_oneway(&self, address: &str, body: Bytes, options: DeliveryOptions) -> Result<()> {
        self.live()?.send_oneway(address, body, options)
    }

    fn consumer(&self, address: &str, handler: ConsumerHandler) -> Result<()> {
        self.live()?.consumer(address, handler)
    }

    fn register_codec(&self, codec: Arc<dyn BusCodec>) -> Result<()> {
        self.live()?.register_codec(codec)
    }

    fn has_codec(&self, name: &str) -> bool {
        self.upgrade().is_some_and(|bus| bus.has_codec(name))
    }
}
