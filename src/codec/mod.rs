//! Codec engine - type classification and wire encoding for contract calls.
//!
//! - [`types`] - classifies a [`TypeDescriptor`] as simple or complex
//! - [`ValueCodec`] - one value as a length-prefixed block
//! - [`ArgsCodec`] - a whole argument tuple as one message
//! - [`CodecRegistry`] - shared codec instances and idempotent bus installation
//!
//! # Design
//!
//! Types describe themselves statically through [`WireValue::descriptor`],
//! so classification happens without runtime reflection. Codecs are bound
//! to one static type and carry no state beyond it, which is what makes
//! them safe to cache and share.
//!
//! # Example
//!
//! ```
//! use contract_bus::codec::{ArgsCodec, ValueCodec};
//!
//! let args = ArgsCodec::<(String, i32)>::new();
//! let bytes = args.encode(&("Bob".to_string(), 42)).unwrap();
//! assert_eq!(args.decode(&bytes).unwrap(), ("Bob".to_string(), 42));
//! assert_eq!(args.name(), "[String, i32]");
//!
//! let value = ValueCodec::<String>::new();
//! assert!(value.is_simple());
//! ```

pub mod args;
pub mod registry;
pub mod types;
pub mod value;

pub use args::{shape_name, ArgList, ArgsCodec};
pub use registry::{BusCodec, CacheScope, CodecRegistry};
pub use types::{is_simple, raw_type, unwrap_async, TypeDescriptor, WireType};
pub use value::{
    codec_name_for, decode_block, encode_block, from_json, to_json, ValueCodec, WireValue,
    LENGTH_PREFIX_SIZE, NULL_LENGTH, SIMPLE_CODEC_NAME,
};
