//! Argument-list codec.
//!
//! All arguments of one call travel as a single message:
//!
//! ```text
//! [i32 length][i32 count][value block 0][value block 1]...
//! ```
//!
//! Each element is an independent value block (see [`value`](super::value)),
//! decoded against the declared parameter type at its position.

use std::marker::PhantomData;

use bytes::Bytes;

use super::types::{raw_type, unwrap_async, TypeDescriptor};
use super::value::{read_block, read_i32, read_value, write_block, WireValue, LENGTH_PREFIX_SIZE};
use crate::bus::Envelope;
use crate::error::{ContractError, Result};

/// An ordered tuple of arguments.
///
/// Implemented for tuples of up to eight [`WireValue`]s, including `()`.
pub trait ArgList: Sized + Send + 'static {
    /// Declared parameter types, in order.
    fn descriptors() -> Vec<TypeDescriptor>;

    /// Write the element count followed by one block per element.
    fn write_elements(&self, out: &mut Vec<u8>) -> Result<()>;

    /// Read the elements written by [`write_elements`](ArgList::write_elements).
    fn read_elements(array: &[u8]) -> Result<Self>;

    /// Take an inbound envelope as the sole argument (native mode).
    fn from_native(envelope: Envelope) -> Option<Self> {
        let _ = envelope;
        None
    }

    /// Hand out the sole argument as a raw envelope (native mode).
    fn into_native(self) -> std::result::Result<Envelope, Self> {
        Err(self)
    }
}

/// Codec for one parameter list.
pub struct ArgsCodec<A> {
    descriptors: Vec<TypeDescriptor>,
    name: String,
    _marker: PhantomData<fn() -> A>,
}

impl<A: ArgList> ArgsCodec<A> {
    /// Create a codec for the argument tuple `A`.
    pub fn new() -> Self {
        let descriptors = A::descriptors();
        let name = shape_name(&descriptors);
        Self {
            descriptors,
            name,
            _marker: PhantomData,
        }
    }

    /// Bracketed, comma-joined erased parameter names, e.g. `[String, Vec]`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameter types.
    pub fn descriptors(&self) -> &[TypeDescriptor] {
        &self.descriptors
    }

    /// True when the sole parameter is the bus envelope.
    pub fn is_native(&self) -> bool {
        matches!(self.descriptors.as_slice(), [TypeDescriptor::Envelope])
    }

    /// Encode the arguments as one length-prefixed array.
    pub fn encode(&self, args: &A) -> Result<Bytes> {
        let mut array = Vec::new();
        args.write_elements(&mut array)?;
        let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + array.len());
        write_block(&mut out, &array)?;
        Ok(Bytes::from(out))
    }

    /// Decode a length-prefixed array into the argument tuple.
    pub fn decode(&self, bytes: &[u8]) -> Result<A> {
        let (array, rest) = read_block(bytes)?;
        if !rest.is_empty() {
            return Err(ContractError::Decode(format!(
                "{} trailing bytes after argument array",
                rest.len()
            )));
        }
        A::read_elements(array)
    }
}

impl<A: ArgList> Default for ArgsCodec<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Argument shape name used for codec naming and address derivation.
pub fn shape_name(descriptors: &[TypeDescriptor]) -> String {
    let names: Vec<String> = descriptors
        .iter()
        .map(|d| raw_type(&unwrap_async(d)))
        .collect();
    format!("[{}]", names.join(", "))
}

fn check_count(array: &[u8], expected: usize) -> Result<&[u8]> {
    let count = read_i32(array)?;
    if usize::try_from(count).ok() != Some(expected) {
        return Err(ContractError::Decode(format!(
            "expected {expected} arguments, found {count}"
        )));
    }
    Ok(&array[LENGTH_PREFIX_SIZE..])
}

fn take<T: WireValue>(cursor: &mut &[u8]) -> Result<T> {
    let (value, rest) = read_value(cursor)?;
    *cursor = rest;
    Ok(value)
}

fn finish(cursor: &[u8]) -> Result<()> {
    if cursor.is_empty() {
        Ok(())
    } else {
        Err(ContractError::Decode(format!(
            "{} trailing bytes after last argument",
            cursor.len()
        )))
    }
}

macro_rules! impl_arg_list {
    ($count:literal; $($ty:ident $idx:tt),*) => {
        impl<$($ty: WireValue),*> ArgList for ($($ty,)*) {
            fn descriptors() -> Vec<TypeDescriptor> {
                vec![$($ty::descriptor()),*]
            }

            #[allow(unused_variables)]
            fn write_elements(&self, out: &mut Vec<u8>) -> Result<()> {
                out.extend_from_slice(&($count as i32).to_be_bytes());
                $(self.$idx.write_value(out)?;)*
                Ok(())
            }

            #[allow(unused_mut)]
            fn read_elements(array: &[u8]) -> Result<Self> {
                let mut cursor = check_count(array, $count)?;
                let args = ($(take::<$ty>(&mut cursor)?,)*);
                finish(cursor)?;
                Ok(args)
            }
        }
    };
}

impl_arg_list!(0;);
impl_arg_list!(2; A 0, B 1);
impl_arg_list!(3; A 0, B 1, C 2);
impl_arg_list!(4; A 0, B 1, C 2, D 3);
impl_arg_list!(5; A 0, B 1, C 2, D 3, E 4);
impl_arg_list!(6; A 0, B 1, C 2, D 3, E 4, F 5);
impl_arg_list!(7; A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_arg_list!(8; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

impl<A: WireValue> ArgList for (A,) {
    fn descriptors() -> Vec<TypeDescriptor> {
        vec![A::descriptor()]
    }

    fn write_elements(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&1i32.to_be_bytes());
        self.0.write_value(out)
    }

    fn read_elements(array: &[u8]) -> Result<Self> {
        let mut cursor = check_count(array, 1)?;
        let arg = take::<A>(&mut cursor)?;
        finish(cursor)?;
        Ok((arg,))
    }

    fn from_native(envelope: Envelope) -> Option<Self> {
        A::from_native(envelope).map(|a| (a,))
    }

    fn into_native(self) -> std::result::Result<Envelope, Self> {
        self.0.into_native().map_err(|a| (a,))
    }
}
