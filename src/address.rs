//! Address resolution.
//!
//! A method's bus address is a pure function of its static signature:
//!
//! ```text
//! <qualified contract>.<method>(<argument shape>)
//! app::Greeter.hello([String])
//! ```
//!
//! Providers and consumers derive it independently and always agree,
//! without sharing a runtime registry. An explicit override replaces the
//! derived address entirely.

use crate::codec::{shape_name, TypeDescriptor};
use crate::contract::MethodSignature;

/// Bus address of a method: the override if present, the derived address otherwise.
pub fn resolve(signature: &MethodSignature) -> String {
    match signature.address_override {
        Some(address) => address.to_string(),
        None => address_for(signature.contract, signature.method, &signature.params),
    }
}

/// Derived address for a contract method with the given parameter types.
pub fn address_for(contract: &str, method: &str, params: &[TypeDescriptor]) -> String {
    let shape = shape_name(params);
    let mut address = String::with_capacity(contract.len() + method.len() + shape.len() + 3);
    address.push_str(contract);
    address.push('.');
    address.push_str(method);
    address.push('(');
    address.push_str(&shape);
    address.push(')');
    address
}
