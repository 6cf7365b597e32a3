//! Payload copy guard.
//!
//! [`copy`] produces a value that can be handed to another party without
//! sharing mutable state with the original. Strategies, in priority order:
//!
//! 1. Pass-through: immutable or trivially copied values are returned as is
//! 2. Self-copy: the type copies itself (opted in with [`transferable!`](crate::transferable!))
//! 3. Serialization: a MsgPack round trip through `rmp-serde`
//! 4. Codec: an encode/decode round trip through the value codec
//!
//! A type with no applicable strategy fails with
//! [`ContractError::UnsupportedCopy`] instead of being aliased.
//!
//! # Example
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use contract_bus::copy::{copy_with_strategy, CopyStrategy};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Order {
//!     id: u64,
//!     lines: Vec<String>,
//! }
//!
//! contract_bus::transferable!(serde: Order);
//!
//! let order = Order { id: 1, lines: vec!["tea".into()] };
//! let (copy, strategy) = copy_with_strategy(&order).unwrap();
//! assert_eq!(copy, order);
//! assert_eq!(strategy, CopyStrategy::Serialization);
//! ```

use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::bus::Envelope;
use crate::codec::{decode_block, encode_block, WireValue};
use crate::error::{ContractError, Result};

/// Strategy that produced a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStrategy {
    /// The value itself, shared.
    PassThrough,
    /// The type's own copy.
    SelfCopy,
    /// Serialization round trip.
    Serialization,
    /// Value codec round trip.
    Codec,
}

/// A value that can cross an ownership boundary.
///
/// Each method returns `None` when its strategy does not apply.
pub trait Transferable: Sized {
    /// The value itself, for immutable or trivially copied types.
    fn pass_through(&self) -> Option<Self> {
        None
    }

    /// An explicit copy provided by the type.
    fn self_copy(&self) -> Option<Result<Self>> {
        None
    }

    /// A deep copy through serialization.
    fn serial_copy(&self) -> Option<Result<Self>> {
        None
    }

    /// A deep copy through the value codec.
    fn codec_copy(&self) -> Option<Result<Self>> {
        None
    }
}

/// Copy `value` with the first applicable strategy.
pub fn copy<T: Transferable>(value: &T) -> Result<T> {
    copy_with_strategy(value).map(|(copy, _)| copy)
}

/// Copy `value` and report which strategy was used.
pub fn copy_with_strategy<T: Transferable>(value: &T) -> Result<(T, CopyStrategy)> {
    if let Some(copy) = value.pass_through() {
        return Ok((copy, CopyStrategy::PassThrough));
    }
    if let Some(copy) = value.self_copy() {
        return copy.map(|copy| (copy, CopyStrategy::SelfCopy));
    }
    if let Some(copy) = value.serial_copy() {
        return copy.map(|copy| (copy, CopyStrategy::Serialization));
    }
    if let Some(copy) = value.codec_copy() {
        return copy.map(|copy| (copy, CopyStrategy::Codec));
    }
    Err(ContractError::UnsupportedCopy(std::any::type_name::<T>()))
}

/// Deep copy through MsgPack, with structs written as maps.
pub fn serial_round_trip<T: Serialize + DeserializeOwned>(value: &T) -> Result<T> {
    let bytes = rmp_serde::to_vec_named(value)?;
    Ok(rmp_serde::from_slice(&bytes)?)
}

/// Deep copy through the value codec.
pub fn codec_round_trip<T: WireValue>(value: &T) -> Result<T> {
    decode_block(&encode_block(value)?)
}

/// Implement [`Transferable`] for types with a given strategy.
///
/// - `clone:` copies with `Clone` (self-copy)
/// - `serde:` copies through a MsgPack round trip
/// - `codec:` copies through the value codec ([`WireValue`] required)
#[macro_export]
macro_rules! transferable {
    (clone: $($ty:ty),+ $(,)?) => {
        $(
            impl $crate::copy::Transferable for $ty {
                fn self_copy(&self) -> Option<$crate::error::Result<Self>> {
                    Some(Ok(::std::clone::Clone::clone(self)))
                }
            }
        )+
    };
    (serde: $($ty:ty),+ $(,)?) => {
        $(
            impl $crate::copy::Transferable for $ty {
                fn serial_copy(&self) -> Option<$crate::error::Result<Self>> {
                    Some($crate::copy::serial_round_trip(self))
                }
            }
        )+
    };
    (codec: $($ty:ty),+ $(,)?) => {
        $(
            impl $crate::copy::Transferable for $ty {
                fn codec_copy(&self) -> Option<$crate::error::Result<Self>> {
                    Some($crate::copy::codec_round_trip(self))
                }
            }
        )+
    };
}

macro_rules! pass_through {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Transferable for $ty {
                fn pass_through(&self) -> Option<Self> {
                    Some(*self)
                }
            }
        )+
    };
}

pass_through!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, (),
    &'static str
);

impl Transferable for Bytes {
    fn pass_through(&self) -> Option<Self> {
        Some(self.clone())
    }
}

impl<T: ?Sized> Transferable for Arc<T> {
    fn pass_through(&self) -> Option<Self> {
        Some(Arc::clone(self))
    }
}

impl Transferable for Envelope {
    fn pass_through(&self) -> Option<Self> {
        Some(self.clone())
    }
}

transferable!(clone: String);
transferable!(serde: serde_json::Value);

impl<T: Transferable> Transferable for Option<T> {
    fn pass_through(&self) -> Option<Self> {
        match self {
            None => Some(None),
            Some(value) => value.pass_through().map(Some),
        }
    }

    fn self_copy(&self) -> Option<Result<Self>> {
        match self {
            None => Some(Ok(None)),
            Some(value) => value.self_copy().map(|copy| copy.map(Some)),
        }
    }

    fn serial_copy(&self) -> Option<Result<Self>> {
        self.as_ref()
            .and_then(|value| value.serial_copy().map(|copy| copy.map(Some)))
    }

    fn codec_copy(&self) -> Option<Result<Self>> {
        self.as_ref()
            .and_then(|value| value.codec_copy().map(|copy| copy.map(Some)))
    }
}

impl<T: Transferable> Transferable for Vec<T> {
    /// Element-wise; the first element that cannot be copied fails the whole.
    fn self_copy(&self) -> Option<Result<Self>> {
        Some(self.iter().map(copy).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Inventory {
        items: HashMap<String, u32>,
    }

    transferable!(serde: Inventory);

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Label {
        text: String,
    }

    crate::wire_pojo!(Label);
    transferable!(codec: Label);

    #[derive(Clone, PartialEq, Debug)]
    struct Cursor {
        position: usize,
    }

    transferable!(clone: Cursor);

    #[derive(Debug)]
    struct Socket;

    impl Transferable for Socket {}

    #[derive(Debug)]
    struct Poisoned;

    impl Serialize for Poisoned {
        fn serialize<S: serde::Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("poisoned"))
        }
    }

    impl<'de> Deserialize<'de> for Poisoned {
        fn deserialize<D: serde::Deserializer<'de>>(_: D) -> std::result::Result<Self, D::Error> {
            Ok(Poisoned)
        }
    }

    transferable!(serde: Poisoned);

    #[test]
    fn test_primitives_pass_through() {
        assert_eq!(copy_with_strategy(&42i32).unwrap(), (42, CopyStrategy::PassThrough));
        assert_eq!(copy(&"static").unwrap(), "static");

        let shared = Arc::new(vec![1, 2, 3]);
        let copy = copy(&shared).unwrap();
        assert!(Arc::ptr_eq(&shared, &copy));
    }

    #[test]
    fn test_bytes_share_storage() {
        let bytes = Bytes::from_static(b"frozen");
        let (copy, strategy) = copy_with_strategy(&bytes).unwrap();
        assert_eq!(strategy, CopyStrategy::PassThrough);
        assert_eq!(copy.as_ptr(), bytes.as_ptr());
    }

    #[test]
    fn test_self_copy() {
        let cursor = Cursor { position: 3 };
        let (copy, strategy) = copy_with_strategy(&cursor).unwrap();
        assert_eq!(strategy, CopyStrategy::SelfCopy);
        assert_eq!(copy, cursor);

        let (text, strategy) = copy_with_strategy(&"owned".to_string()).unwrap();
        assert_eq!(strategy, CopyStrategy::SelfCopy);
        assert_eq!(text, "owned");
    }

    #[test]
    fn test_serialization_is_deep() {
        let inventory = Inventory {
            items: HashMap::from([("tea".to_string(), 3)]),
        };
        let (mut copy, strategy) = copy_with_strategy(&inventory).unwrap();
        assert_eq!(strategy, CopyStrategy::Serialization);
        assert_eq!(copy, inventory);

        copy.items.insert("milk".into(), 1);
        assert_eq!(inventory.items.len(), 1);
    }

    #[test]
    fn test_codec_fallback() {
        let label = Label { text: "fragile".into() };
        let (copy, strategy) = copy_with_strategy(&label).unwrap();
        assert_eq!(strategy, CopyStrategy::Codec);
        assert_eq!(copy, label);
    }

    #[test]
    fn test_json_value() {
        let value = serde_json::json!({"a": [1, 2]});
        assert_eq!(copy(&value).unwrap(), value);
    }

    #[test]
    fn test_containers() {
        let cursors = vec![Cursor { position: 1 }, Cursor { position: 2 }];
        assert_eq!(copy(&cursors).unwrap(), cursors);

        assert_eq!(copy(&Some(5u8)).unwrap(), Some(5));
        assert_eq!(copy(&None::<Cursor>).unwrap(), None);
    }

    #[test]
    fn test_vec_reports_element_error() {
        let err = copy(&vec![Poisoned, Poisoned]).unwrap_err();
        assert!(matches!(err, ContractError::MsgPackEncode(_)));

        let err = copy(&vec![Socket]).unwrap_err();
        assert!(matches!(err, ContractError::UnsupportedCopy(name) if name.ends_with("Socket")));
    }

    #[test]
    fn test_unsupported_copy_fails() {
        let err = copy(&Socket).unwrap_err();
        assert!(matches!(err, ContractError::UnsupportedCopy(name) if name.ends_with("Socket")));
    }
}
