//! # contract-bus
//!
//! Typed contract RPC over an asynchronous publish/subscribe message bus.
//!
//! A contract is a Rust trait declared with [`contract!`]. Providers
//! implement it and are bound to bus addresses by an [`ActorRegistrar`];
//! consumers call it through a generated client that encodes the
//! arguments, sends them, and decodes the reply.
//!
//! ## Architecture
//!
//! - **Codec engine** ([`codec`]): type classification, value and argument
//!   tuple encoding, shared codec instances
//! - **Addressing** ([`address`]): deterministic addresses derived from
//!   method signatures
//! - **Provider side** ([`registrar`]): one bus consumer per eligible method
//! - **Consumer side** ([`proxy`]): async, blocking and fire-and-forget calls
//! - **Bus** ([`bus`]): the `MessageBus` seam and an in-process `EventBus`
//!   running on reactor threads
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use contract_bus::bus::BoxFuture;
//! use contract_bus::contract::Contract;
//! use contract_bus::{EventBus, Result};
//!
//! contract_bus::contract! {
//!     pub trait Greeter {
//!         async fn hello(&self, name: String) -> String;
//!     }
//! }
//!
//! struct English;
//!
//! impl Greeter for English {
//!     fn hello(&self, name: String) -> BoxFuture<'_, Result<String>> {
//!         Box::pin(async move { Ok(format!("Hello {name}")) })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let bus = EventBus::builder().reactors(2).build()?;
//!     let provider: Arc<dyn Greeter> = Arc::new(English);
//!     bus.registrar().register::<GreeterContract>(provider)?;
//!
//!     let greeter = bus.invoker().client::<GreeterContract>();
//!     assert_eq!(greeter.hello("Bob".into()).await?, "Hello Bob");
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod bus;
pub mod codec;
pub mod config;
pub mod contract;
pub mod copy;
pub mod error;
pub mod messages;
pub mod proxy;
pub mod registrar;

#[doc(hidden)]
pub use paste;

pub use bus::{Envelope, EventBus, EventBusBuilder, MessageBus, WeakBus};
pub use config::BusConfig;
pub use contract::{CallKind, Contract, MethodSignature};
pub use error::{ContractError, Result};
pub use proxy::Invoker;
pub use registrar::{ActorRegistrar, ContractBinding};
