//! Type classification.
//!
//! Every type that can cross the bus describes itself with a [`TypeDescriptor`].
//! The classifier answers three questions about a descriptor:
//!
//! - [`is_simple`] - can the bus carry it without a registered codec?
//! - [`raw_type`] - what is its erased name (generic parameters dropped)?
//! - [`unwrap_async`] - what payload does an async wrapper eventually produce?
//!
//! [`WireType`] is the classification the value codec works from.

use std::fmt;

/// Erased name of the universal type that unknown or bare wrapper types collapse to.
pub const ANY_TYPE: &str = "any";

/// Static description of a type as seen by the codec engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// Scalars and strings (`bool`, `i32`, `String`, ...).
    Primitive(&'static str),
    /// Raw binary blob (`bytes::Bytes`).
    Binary,
    /// Bus-native JSON container (`serde_json::Value`).
    Json,
    /// The bus-native message envelope.
    Envelope,
    /// No value.
    Unit,
    /// Field-mapped object, identified by its qualified name.
    Named(&'static str),
    /// Ordered collection: erased container name and item type.
    Collection(&'static str, Box<TypeDescriptor>),
    /// Unordered set: erased container name and item type.
    Set(&'static str, Box<TypeDescriptor>),
    /// Key/value map: erased container name, key and value types.
    Map(&'static str, Box<TypeDescriptor>, Box<TypeDescriptor>),
    /// A value available later. `None` is a bare wrapper with no payload type.
    Async(Option<Box<TypeDescriptor>>),
    /// A type token the engine cannot inspect.
    Unknown,
}

impl TypeDescriptor {
    /// Wrap a payload type in an async wrapper.
    pub fn async_of(inner: TypeDescriptor) -> Self {
        TypeDescriptor::Async(Some(Box::new(inner)))
    }

    /// Full name including generic parameters, e.g. `Vec<app::User>`.
    pub fn type_name(&self) -> String {
        match self {
            TypeDescriptor::Collection(name, item) | TypeDescriptor::Set(name, item) => {
                format!("{}<{}>", name, item.type_name())
            }
            TypeDescriptor::Map(name, key, value) => {
                format!("{}<{}, {}>", name, key.type_name(), value.type_name())
            }
            TypeDescriptor::Async(Some(inner)) => format!("Future<{}>", inner.type_name()),
            other => erased_name(other).to_string(),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_name())
    }
}

/// Classification of a type for encoding purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireType {
    /// Natively transportable, no codec needed.
    Simple,
    /// Field-mapped object with its erased type name.
    Pojo(String),
    /// Ordered collection of the item type.
    Collection(TypeDescriptor),
    /// Set of the item type.
    Set(TypeDescriptor),
    /// Map of key type to value type.
    Map(TypeDescriptor, TypeDescriptor),
    /// Async wrapper around the inner type.
    AsyncWrapper(TypeDescriptor),
}

impl WireType {
    /// Classify a descriptor.
    pub fn of(descriptor: &TypeDescriptor) -> Self {
        match descriptor {
            d if is_simple(d) => WireType::Simple,
            TypeDescriptor::Collection(_, item) => WireType::Collection((**item).clone()),
            TypeDescriptor::Set(_, item) => WireType::Set((**item).clone()),
            TypeDescriptor::Map(_, key, value) => WireType::Map((**key).clone(), (**value).clone()),
            TypeDescriptor::Async(_) => WireType::AsyncWrapper(unwrap_async(descriptor)),
            other => WireType::Pojo(raw_type(other)),
        }
    }

    /// Whether the bus can carry this type without a registered codec.
    pub fn is_simple(&self) -> bool {
        matches!(self, WireType::Simple)
    }
}

/// True for primitives, strings, binary blobs and the bus's native containers.
pub fn is_simple(descriptor: &TypeDescriptor) -> bool {
    matches!(
        descriptor,
        TypeDescriptor::Primitive(_)
            | TypeDescriptor::Binary
            | TypeDescriptor::Json
            | TypeDescriptor::Envelope
            | TypeDescriptor::Unit
    )
}

/// True for scalars and strings only.
pub fn is_primitive(descriptor: &TypeDescriptor) -> bool {
    matches!(descriptor, TypeDescriptor::Primitive(_))
}

/// Erased name of a descriptor, seen through its async wrappers.
///
/// `Future<app::User>` and `Future<Future<app::User>>` erase to `app::User`,
/// `Vec<app::User>` to `Vec`. A wrapper around a bare wrapper erases to
/// [`ANY_TYPE`]; a bare wrapper on its own keeps its name.
pub fn raw_type(descriptor: &TypeDescriptor) -> String {
    match descriptor {
        TypeDescriptor::Async(Some(_)) => erased_name(&unwrap_async(descriptor)).to_string(),
        other => erased_name(other).to_string(),
    }
}

/// Strip every async-wrapper layer. A bare wrapper erases to the unknown type.
pub fn unwrap_async(descriptor: &TypeDescriptor) -> TypeDescriptor {
    match descriptor {
        TypeDescriptor::Async(Some(inner)) => unwrap_async(inner),
        TypeDescriptor::Async(None) => TypeDescriptor::Unknown,
        other => other.clone(),
    }
}

fn erased_name(descriptor: &TypeDescriptor) -> &'static str {
    match descriptor {
        TypeDescriptor::Primitive(name) | TypeDescriptor::Named(name) => name,
        TypeDescriptor::Binary => "Bytes",
        TypeDescriptor::Json => "Value",
        TypeDescriptor::Envelope => "Envelope",
        TypeDescriptor::Unit => "()",
        TypeDescriptor::Collection(name, _)
        | TypeDescriptor::Set(name, _)
        | TypeDescriptor::Map(name, _, _) => name,
        TypeDescriptor::Async(_) => "Future",
        TypeDescriptor::Unknown => ANY_TYPE,
    }
}
