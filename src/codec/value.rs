//! Value codec.
//!
//! One value travels as a length-prefixed block:
//!
//! ```text
//! ┌────────────────────┬────────────────────────────┐
//! │ length (i32 BE)    │ encoded bytes              │
//! │ 4 bytes            │ `length` bytes             │
//! └────────────────────┴────────────────────────────┘
//! ```
//!
//! Simple values are written natively: big-endian numerics, UTF-8 strings,
//! raw bytes. Complex values (objects, collections, sets, maps) are written
//! as JSON text and decoded back against the static type.
//!
//! A length of `-1` marks an absent value. Only `Option<T>` reads it back
//! (as `None`); every other type rejects it.
//!
//! # Example
//!
//! ```
//! use contract_bus::codec::ValueCodec;
//!
//! let codec = ValueCodec::<Vec<String>>::new();
//! let block = codec.encode(&vec!["a".to_string(), "b".to_string()]).unwrap();
//! assert_eq!(codec.decode(&block).unwrap(), vec!["a", "b"]);
//! assert_eq!(codec.name(), "Vec");
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::types::{is_simple, raw_type, TypeDescriptor, WireType};
use crate::bus::Envelope;
use crate::error::{ContractError, Result};

/// Codec name for values the bus carries natively.
pub const SIMPLE_CODEC_NAME: &str = "<simple>";

/// Size of the length prefix in front of every block.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Length prefix marking an absent value.
pub const NULL_LENGTH: i32 = -1;

/// A type that can cross the bus as a single value.
///
/// Implemented for scalars, strings, [`Bytes`], [`serde_json::Value`], the
/// standard collections, [`Envelope`], `Option` of any of these, and any
/// struct opted in with [`wire_pojo!`](crate::wire_pojo).
pub trait WireValue: Sized + Send + 'static {
    /// Static description of the type.
    fn descriptor() -> TypeDescriptor;

    /// Encode the value body (without length prefix).
    fn to_wire(&self) -> Result<Vec<u8>>;

    /// Decode a value body (without length prefix).
    fn from_wire(bytes: &[u8]) -> Result<Self>;

    /// Append the value as one `[length][bytes]` block.
    fn write_value(&self, out: &mut Vec<u8>) -> Result<()> {
        write_block(out, &self.to_wire()?)
    }

    /// The value a null block decodes to.
    fn from_null() -> Result<Self> {
        Err(ContractError::Decode(format!(
            "unexpected null {}",
            raw_type(&Self::descriptor())
        )))
    }

    /// Turn a reply envelope into a value. Envelopes are returned as they are.
    fn from_reply(reply: Envelope) -> Result<Self> {
        decode_block(reply.body())
    }

    /// Take an inbound envelope as-is. Only envelopes accept this.
    fn from_native(envelope: Envelope) -> Option<Self> {
        let _ = envelope;
        None
    }

    /// Hand out the value as a raw envelope, if it is one.
    fn into_native(self) -> std::result::Result<Envelope, Self> {
        Err(self)
    }
}

/// Codec bound to one static type.
///
/// Construction classifies the type and computes its name once; instances
/// are immutable and shared through the [`CodecRegistry`](super::CodecRegistry).
pub struct ValueCodec<T> {
    descriptor: TypeDescriptor,
    wire_type: WireType,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: WireValue> ValueCodec<T> {
    /// Create a codec for `T`.
    pub fn new() -> Self {
        let descriptor = T::descriptor();
        let wire_type = WireType::of(&descriptor);
        let name = codec_name_for(&descriptor);
        Self {
            descriptor,
            wire_type,
            name,
            _marker: PhantomData,
        }
    }

    /// Codec name: the simple sentinel, or the erased type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptor of the bound type.
    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    /// Classification of the bound type.
    pub fn wire_type(&self) -> &WireType {
        &self.wire_type
    }

    /// Whether the bound type needs no codec on the bus.
    pub fn is_simple(&self) -> bool {
        self.wire_type.is_simple()
    }

    /// Encode a value as `[length][bytes]`.
    pub fn encode(&self, value: &T) -> Result<Bytes> {
        encode_block(value).map(Bytes::from)
    }

    /// Decode a `[length][bytes]` block.
    pub fn decode(&self, bytes: &[u8]) -> Result<T> {
        decode_block(bytes)
    }
}

impl<T: WireValue> Default for ValueCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Codec name for a descriptor: sentinel for simple types, erased name otherwise.
pub fn codec_name_for(descriptor: &TypeDescriptor) -> String {
    if is_simple(descriptor) {
        SIMPLE_CODEC_NAME.to_string()
    } else {
        raw_type(descriptor)
    }
}

/// Encode a value as one length-prefixed block.
pub fn encode_block<T: WireValue>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    value.write_value(&mut out)?;
    Ok(out)
}

/// Decode exactly one length-prefixed block.
pub fn decode_block<T: WireValue>(bytes: &[u8]) -> Result<T> {
    let (value, rest) = read_value(bytes)?;
    if !rest.is_empty() {
        return Err(ContractError::Decode(format!(
            "{} trailing bytes after value block",
            rest.len()
        )));
    }
    Ok(value)
}

/// Split one value off the front of `bytes`, returning `(value, rest)`.
/// A null block goes through [`WireValue::from_null`].
pub(crate) fn read_value<T: WireValue>(bytes: &[u8]) -> Result<(T, &[u8])> {
    if read_i32(bytes)? == NULL_LENGTH {
        return Ok((T::from_null()?, &bytes[LENGTH_PREFIX_SIZE..]));
    }
    let (body, rest) = read_block(bytes)?;
    Ok((T::from_wire(body)?, rest))
}

/// Append `[length][payload]` to `out`.
pub(crate) fn write_block(out: &mut Vec<u8>, payload: &[u8]) -> Result<()> {
    let len = i32::try_from(payload.len()).map_err(|_| {
        ContractError::Decode(format!("block of {} bytes exceeds i32 length", payload.len()))
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

/// Split one block off the front of `bytes`, returning `(body, rest)`.
pub(crate) fn read_block(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    let len = read_i32(bytes)?;
    if len == NULL_LENGTH {
        return Err(ContractError::Decode("unexpected null value".into()));
    }
    let len = usize::try_from(len)
        .map_err(|_| ContractError::Decode(format!("negative block length {len}")))?;
    let rest = &bytes[LENGTH_PREFIX_SIZE..];
    if rest.len() < len {
        return Err(ContractError::Decode(format!(
            "block truncated: expected {} bytes, found {}",
            len,
            rest.len()
        )));
    }
    Ok(rest.split_at(len))
}

pub(crate) fn read_i32(bytes: &[u8]) -> Result<i32> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = bytes
        .get(..LENGTH_PREFIX_SIZE)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| {
            ContractError::Decode(format!(
                "need {} bytes for length prefix, found {}",
                LENGTH_PREFIX_SIZE,
                bytes.len()
            ))
        })?;
    Ok(i32::from_be_bytes(prefix))
}

/// Encode a complex value as JSON text.
pub fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode JSON text against the static type.
pub fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| ContractError::Decode(e.to_string()))
}

fn fixed<const N: usize>(bytes: &[u8], type_name: &str) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        ContractError::Decode(format!(
            "{} needs {} bytes, found {}",
            type_name,
            N,
            bytes.len()
        ))
    })
}

macro_rules! impl_numeric {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl WireValue for $ty {
                fn descriptor() -> TypeDescriptor {
                    TypeDescriptor::Primitive($name)
                }

                #[inline]
                fn to_wire(&self) -> Result<Vec<u8>> {
                    Ok(self.to_be_bytes().to_vec())
                }

                #[inline]
                fn from_wire(bytes: &[u8]) -> Result<Self> {
                    Ok(<$ty>::from_be_bytes(fixed(bytes, $name)?))
                }
            }
        )*
    };
}

impl_numeric!(
    i8 => "i8", i16 => "i16", i32 => "i32", i64 => "i64",
    u8 => "u8", u16 => "u16", u32 => "u32", u64 => "u64",
    f32 => "f32", f64 => "f64",
);

impl WireValue for bool {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Primitive("bool")
    }

    fn to_wire(&self) -> Result<Vec<u8>> {
        Ok(vec![u8::from(*self)])
    }

    fn from_wire(bytes: &[u8]) -> Result<Self> {
        match fixed::<1>(bytes, "bool")? {
            [0] => Ok(false),
            [1] => Ok(true),
            [other] => Err(ContractError::Decode(format!("invalid bool byte {other}"))),
        }
    }
}

impl WireValue for char {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Primitive("char")
    }

    fn to_wire(&self) -> Result<Vec<u8>> {
        Ok(u32::from(*self).to_be_bytes().to_vec())
    }

    fn from_wire(bytes: &[u8]) -> Result<Self> {
        let code = u32::from_be_bytes(fixed(bytes, "char")?);
        char::from_u32(code)
            .ok_or_else(|| ContractError::Decode(format!("invalid char code point {code:#x}")))
    }
}

impl WireValue for String {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Primitive("String")
    }

    fn to_wire(&self) -> Result<Vec<u8>> {
        Ok(self.as_bytes().to_vec())
    }

    fn from_wire(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(bytes.to_vec()).map_err(|e| ContractError::Decode(e.to_string()))
    }
}

impl WireValue for Bytes {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Binary
    }

    fn to_wire(&self) -> Result<Vec<u8>> {
        Ok(self.to_vec())
    }

    fn from_wire(bytes: &[u8]) -> Result<Self> {
        Ok(Bytes::copy_from_slice(bytes))
    }
}

impl WireValue for serde_json::Value {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Json
    }

    fn to_wire(&self) -> Result<Vec<u8>> {
        to_json(self)
    }

    fn from_wire(bytes: &[u8]) -> Result<Self> {
        from_json(bytes)
    }
}

impl WireValue for () {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Unit
    }

    fn to_wire(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn from_wire(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            Ok(())
        } else {
            Err(ContractError::Decode(format!(
                "unit value carries {} bytes",
                bytes.len()
            )))
        }
    }
}

impl WireValue for Envelope {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Envelope
    }

    fn to_wire(&self) -> Result<Vec<u8>> {
        Ok(self.body().to_vec())
    }

    fn from_wire(bytes: &[u8]) -> Result<Self> {
        Ok(Envelope::from_body(Bytes::copy_from_slice(bytes)))
    }

    fn from_reply(reply: Envelope) -> Result<Self> {
        Ok(reply)
    }

    fn from_native(envelope: Envelope) -> Option<Self> {
        Some(envelope)
    }

    fn into_native(self) -> std::result::Result<Envelope, Self> {
        Ok(self)
    }
}

impl<T: WireValue> WireValue for Option<T> {
    fn descriptor() -> TypeDescriptor {
        T::descriptor()
    }

    fn to_wire(&self) -> Result<Vec<u8>> {
        match self {
            Some(value) => value.to_wire(),
            None => Err(ContractError::UnsupportedOperation(
                "an absent value has no body, only a null block".into(),
            )),
        }
    }

    fn from_wire(bytes: &[u8]) -> Result<Self> {
        T::from_wire(bytes).map(Some)
    }

    fn write_value(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Some(value) => value.write_value(out),
            None => {
                out.extend_from_slice(&NULL_LENGTH.to_be_bytes());
                Ok(())
            }
        }
    }

    fn from_null() -> Result<Self> {
        Ok(None)
    }

    fn from_reply(reply: Envelope) -> Result<Self> {
        match T::descriptor() {
            TypeDescriptor::Envelope => T::from_reply(reply).map(Some),
            _ => decode_block(reply.body()),
        }
    }

    fn from_native(envelope: Envelope) -> Option<Self> {
        T::from_native(envelope).map(Some)
    }

    fn into_native(self) -> std::result::Result<Envelope, Self> {
        match self {
            Some(value) => value.into_native().map_err(Some),
            None => Err(None),
        }
    }
}

macro_rules! impl_sequence {
    ($kind:ident, $name:literal, $container:ident<$item:ident> where $($bound:path),*) => {
        impl<$item> WireValue for $container<$item>
        where
            $item: WireValue + Serialize + DeserializeOwned $(+ $bound)*,
        {
            fn descriptor() -> TypeDescriptor {
                TypeDescriptor::$kind($name, Box::new($item::descriptor()))
            }

            fn to_wire(&self) -> Result<Vec<u8>> {
                to_json(self)
            }

            fn from_wire(bytes: &[u8]) -> Result<Self> {
                // Decoded as an ordered array first; sets collapse duplicates here.
                let items: Vec<$item> = from_json(bytes)?;
                Ok(items.into_iter().collect())
            }
        }
    };
}

impl_sequence!(Collection, "Vec", Vec<T> where);
impl_sequence!(Collection, "VecDeque", VecDeque<T> where);
impl_sequence!(Set, "HashSet", HashSet<T> where Eq, Hash);
impl_sequence!(Set, "BTreeSet", BTreeSet<T> where Ord);

macro_rules! impl_map {
    ($name:literal, $container:ident where $($bound:path),*) => {
        impl<K, V> WireValue for $container<K, V>
        where
            K: WireValue + Serialize + DeserializeOwned $(+ $bound)*,
            V: WireValue + Serialize + DeserializeOwned,
        {
            fn descriptor() -> TypeDescriptor {
                TypeDescriptor::Map(
                    $name,
                    Box::new(K::descriptor()),
                    Box::new(V::descriptor()),
                )
            }

            fn to_wire(&self) -> Result<Vec<u8>> {
                to_json(self)
            }

            fn from_wire(bytes: &[u8]) -> Result<Self> {
                from_json(bytes)
            }
        }
    };
}

impl_map!("HashMap", HashMap where Eq, Hash);
impl_map!("BTreeMap", BTreeMap where Ord);

/// Opt serde structs into the bus as field-mapped objects.
///
/// The codec name is the type's qualified name (`module::Type`).
///
/// ```
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize, PartialEq, Debug)]
/// struct User {
///     name: String,
/// }
///
/// contract_bus::wire_pojo!(User);
///
/// let codec = contract_bus::codec::ValueCodec::<User>::new();
/// assert!(codec.name().ends_with("::User"));
/// ```
#[macro_export]
macro_rules! wire_pojo {
    ($($ty:ident),+ $(,)?) => {
        $(
            impl $crate::codec::WireValue for $ty {
                fn descriptor() -> $crate::codec::TypeDescriptor {
                    $crate::codec::TypeDescriptor::Named(concat!(
                        module_path!(),
                        "::",
                        stringify!($ty)
                    ))
                }

                fn to_wire(&self) -> $crate::error::Result<Vec<u8>> {
                    $crate::codec::to_json(self)
                }

                fn from_wire(bytes: &[u8]) -> $crate::error::Result<Self> {
                    $crate::codec::from_json(bytes)
                }
            }
        )+
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Debug, Clone, PartialOrd, Ord)]
    struct User {
        name: String,
        age: u32,
    }

    crate::wire_pojo!(User);

    fn user(name: &str, age: u32) -> User {
        User {
            name: name.to_string(),
            age,
        }
    }

    #[test]
    fn test_simple_codec_name_is_sentinel() {
        assert_eq!(ValueCodec::<String>::new().name(), SIMPLE_CODEC_NAME);
        assert_eq!(ValueCodec::<i64>::new().name(), SIMPLE_CODEC_NAME);
        assert_eq!(ValueCodec::<Bytes>::new().name(), SIMPLE_CODEC_NAME);
        assert!(ValueCodec::<serde_json::Value>::new().is_simple());
    }

    #[test]
    fn test_pojo_codec_name_is_qualified() {
        let codec = ValueCodec::<User>::new();
        assert_eq!(codec.name(), concat!(module_path!(), "::User"));
        assert_eq!(codec.wire_type(), &WireType::Pojo(codec.name().to_string()));
    }

    #[test]
    fn test_same_erased_type_same_name() {
        assert_eq!(
            ValueCodec::<Vec<User>>::new().name(),
            ValueCodec::<Vec<String>>::new().name()
        );
    }

    #[test]
    fn test_string_is_written_natively() {
        let block = ValueCodec::<String>::new().encode(&"Bob".to_string()).unwrap();
        assert_eq!(&block[..], &[0, 0, 0, 3, b'B', b'o', b'b']);
    }

    #[test]
    fn test_i32_is_big_endian() {
        let block = ValueCodec::<i32>::new().encode(&0x0102_0304).unwrap();
        assert_eq!(&block[..], &[0, 0, 0, 4, 1, 2, 3, 4]);
    }

    #[test]
    fn test_scalars() {
        assert!(ValueCodec::<bool>::new().decode(&[0, 0, 0, 1, 1]).unwrap());
        let c = ValueCodec::<char>::new();
        assert_eq!(c.decode(&c.encode(&'λ').unwrap()).unwrap(), 'λ');
        let f = ValueCodec::<f64>::new();
        assert_eq!(f.decode(&f.encode(&1.5).unwrap()).unwrap(), 1.5);
    }

    #[test]
    fn test_pojo_decode() {
        let codec = ValueCodec::<User>::new();
        let block = codec.encode(&user("Bob", 42)).unwrap();
        assert_eq!(codec.decode(&block).unwrap(), user("Bob", 42));
    }

    #[test]
    fn test_collection_of_pojos() {
        let codec = ValueCodec::<Vec<User>>::new();
        let users = vec![user("Ann", 33), user("Bob", 42), user("Ann", 33)];

        let decoded = codec.decode(&codec.encode(&users).unwrap()).unwrap();
        assert_eq!(decoded, users);
        assert!(matches!(codec.wire_type(), WireType::Collection(_)));
    }

    #[test]
    fn test_set_of_pojos() {
        let codec = ValueCodec::<HashSet<User>>::new();
        let users = HashSet::from([user("Alice", 30), user("Bob", 42), user("Carol", 25)]);

        let decoded = codec.decode(&codec.encode(&users).unwrap()).unwrap();
        assert_eq!(decoded, users);
        assert_eq!(codec.name(), "HashSet");
    }

    #[test]
    fn test_option_writes_null_block() {
        let codec = ValueCodec::<Option<User>>::new();
        assert_eq!(codec.name(), ValueCodec::<User>::new().name());

        let absent = codec.encode(&None).unwrap();
        assert_eq!(&absent[..], &NULL_LENGTH.to_be_bytes());
        assert_eq!(codec.decode(&absent).unwrap(), None);

        let present = codec.encode(&Some(user("Bob", 42))).unwrap();
        assert_eq!(
            &present[..],
            &ValueCodec::<User>::new().encode(&user("Bob", 42)).unwrap()[..]
        );
        assert_eq!(codec.decode(&present).unwrap(), Some(user("Bob", 42)));
    }

    #[test]
    fn test_optional_simple_value() {
        let codec = ValueCodec::<Option<u32>>::new();
        assert!(codec.is_simple());
        assert_eq!(codec.decode(&codec.encode(&Some(7)).unwrap()).unwrap(), Some(7));
        assert_eq!(codec.decode(&codec.encode(&None).unwrap()).unwrap(), None);
    }

    #[test]
    fn test_set_collapses_duplicates() {
        let mut body = Vec::new();
        write_block(
            &mut body,
            br#"[{"name":"a","age":1},{"name":"a","age":1},{"name":"b","age":2}]"#,
        )
        .unwrap();

        let set = ValueCodec::<HashSet<User>>::new().decode(&body).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&user("b", 2)));
    }

    #[test]
    fn test_map_of_pojos() {
        let codec = ValueCodec::<HashMap<String, User>>::new();
        let mut map = HashMap::new();
        map.insert("bob".to_string(), user("Bob", 42));
        map.insert("eve".to_string(), user("Eve", 7));

        let decoded = codec.decode(&codec.encode(&map).unwrap()).unwrap();
        assert_eq!(decoded, map);
        assert_eq!(codec.name(), "HashMap");
    }

    #[test]
    fn test_truncated_block_fails() {
        let err = ValueCodec::<String>::new().decode(&[0, 0, 0, 9, b'x']).unwrap_err();
        assert!(matches!(err, ContractError::Decode(_)));

        let err = ValueCodec::<String>::new().decode(&[0, 0]).unwrap_err();
        assert!(matches!(err, ContractError::Decode(_)));
    }

    #[test]
    fn test_null_and_negative_lengths_fail() {
        let codec = ValueCodec::<String>::new();
        assert!(matches!(
            codec.decode(&NULL_LENGTH.to_be_bytes()),
            Err(ContractError::Decode(_))
        ));
        assert!(matches!(
            codec.decode(&(-7i32).to_be_bytes()),
            Err(ContractError::Decode(_))
        ));
    }

    #[test]
    fn test_shape_mismatch_fails() {
        let mut body = Vec::new();
        write_block(&mut body, br#"{"unexpected":true}"#).unwrap();
        let err = ValueCodec::<Vec<User>>::new().decode(&body).unwrap_err();
        assert!(matches!(err, ContractError::Decode(_)));
    }

    #[test]
    fn test_wrong_width_scalar_fails() {
        let err = ValueCodec::<i64>::new().decode(&[0, 0, 0, 2, 1, 2]).unwrap_err();
        assert!(matches!(err, ContractError::Decode(_)));
    }

    #[test]
    fn test_trailing_bytes_fail() {
        let err = ValueCodec::<u8>::new().decode(&[0, 0, 0, 1, 7, 0]).unwrap_err();
        assert!(matches!(err, ContractError::Decode(_)));
    }
}
