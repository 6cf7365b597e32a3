//! Codec registry.
//!
//! Codecs are immutable once built, so one instance per type is enough.
//! The registry hands out shared instances keyed by type and installs them
//! into a bus codec table, treating repeated installs as a no-op.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::args::{ArgList, ArgsCodec};
use super::value::{ValueCodec, WireValue, SIMPLE_CODEC_NAME};
use crate::bus::MessageBus;
use crate::error::{ContractError, Result};

type CacheMap = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

thread_local! {
    static REACTOR_CACHE: RefCell<CacheMap> = RefCell::new(HashMap::new());
}

/// A codec as seen by the bus codec table.
pub trait BusCodec: Send + Sync + 'static {
    /// Name messages refer to this codec by.
    fn name(&self) -> &str;

    /// Human-readable bound type(s), for diagnostics.
    fn bound_type(&self) -> String;
}

impl<T: WireValue> BusCodec for ValueCodec<T> {
    fn name(&self) -> &str {
        ValueCodec::name(self)
    }

    fn bound_type(&self) -> String {
        self.descriptor().type_name()
    }
}

impl<A: ArgList> BusCodec for ArgsCodec<A> {
    fn name(&self) -> &str {
        ArgsCodec::name(self)
    }

    fn bound_type(&self) -> String {
        let names: Vec<String> = self.descriptors().iter().map(|d| d.type_name()).collect();
        format!("({})", names.join(", "))
    }
}

/// Where cached codec instances live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheScope {
    /// One table for the whole process, write-locked only on first insert.
    #[default]
    Process,
    /// One table per thread. No locking; each reactor builds its own instances.
    Reactor,
}

/// Flyweight cache of codec instances.
pub struct CodecRegistry {
    scope: CacheScope,
    shared: RwLock<CacheMap>,
}

impl CodecRegistry {
    /// Create a registry with the given cache scope.
    pub fn new(scope: CacheScope) -> Self {
        Self {
            scope,
            shared: RwLock::new(HashMap::new()),
        }
    }

    /// Cache scope of this registry.
    pub fn scope(&self) -> CacheScope {
        self.scope
    }

    /// Shared codec for a single value type.
    pub fn for_type<T: WireValue>(&self) -> Arc<ValueCodec<T>> {
        self.cached(ValueCodec::<T>::new)
    }

    /// Shared codec for a parameter list.
    pub fn for_signature<A: ArgList>(&self) -> Arc<ArgsCodec<A>> {
        self.cached(ArgsCodec::<A>::new)
    }

    /// Install a codec into the bus codec table.
    ///
    /// Simple-type codecs are skipped. A codec whose name is already present
    /// is skipped as well: codecs are stateless, so the first one is as good
    /// as any.
    pub fn register(&self, bus: &dyn MessageBus, codec: Arc<dyn BusCodec>) -> Result<()> {
        if codec.name() == SIMPLE_CODEC_NAME {
            return Ok(());
        }
        match bus.register_codec(codec) {
            Err(ContractError::CodecAlreadyRegistered(name)) => {
                tracing::debug!("Skipped registering codec {}: already registered", name);
                Ok(())
            }
            other => other,
        }
    }

    /// Cached value codec, installed into the bus.
    pub fn ensure_type<T: WireValue>(&self, bus: &dyn MessageBus) -> Result<Arc<ValueCodec<T>>> {
        let codec = self.for_type::<T>();
        self.register(bus, codec.clone())?;
        Ok(codec)
    }

    /// Cached argument-list codec, installed into the bus.
    pub fn ensure_signature<A: ArgList>(
        &self,
        bus: &dyn MessageBus,
    ) -> Result<Arc<ArgsCodec<A>>> {
        let codec = self.for_signature::<A>();
        self.register(bus, codec.clone())?;
        Ok(codec)
    }

    /// Number of instances cached in the scope visible from this thread.
    pub fn cached_count(&self) -> usize {
        match self.scope {
            CacheScope::Process => self.shared.read().len(),
            CacheScope::Reactor => REACTOR_CACHE.with(|cache| cache.borrow().len()),
        }
    }

    fn cached<C: Any + Send + Sync>(&self, make: fn() -> C) -> Arc<C> {
        let key = TypeId::of::<C>();
        let entry = match self.scope {
            CacheScope::Process => {
                let hit = self.shared.read().get(&key).cloned();
                match hit {
                    Some(entry) => entry,
                    None => self
                        .shared
                        .write()
                        .entry(key)
                        .or_insert_with(|| Arc::new(make()) as Arc<dyn Any + Send + Sync>)
                        .clone(),
                }
            }
            CacheScope::Reactor => REACTOR_CACHE.with(|cache| {
                cache
                    .borrow_mut()
                    .entry(key)
                    .or_insert_with(|| Arc::new(make()) as Arc<dyn Any + Send + Sync>)
                    .clone()
            }),
        };
        // Keys are the codec's own TypeId, so the downcast cannot miss.
        entry.downcast::<C>().unwrap_or_else(|_| Arc::new(make()))
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new(CacheScope::default())
    }
}
