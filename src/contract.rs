//! Contracts: typed service interfaces shared by providers and consumers.
//!
//! A contract is declared once with [`contract!`](crate::contract!):
//!
//! ```
//! use contract_bus::bus::BoxFuture;
//! use contract_bus::contract::Contract;
//! use contract_bus::Result;
//!
//! contract_bus::contract! {
//!     /// Greets people.
//!     pub trait Greeter {
//!         /// Async: the client gets a future of the reply.
//!         async fn hello(&self, name: String) -> String;
//!         /// Blocking: the client waits for the reply.
//!         fn count(&self) -> i32;
//!         /// Void: fire-and-forget.
//!         fn notify(&self, message: String);
//!         /// Never reachable over the bus.
//!         #[ignore]
//!         fn local(&self) -> String;
//!         /// Bound to an explicit address.
//!         #[address("greeter.shout")]
//!         async fn shout(&self, name: String) -> String;
//!     }
//! }
//!
//! assert!(GreeterContract::NAME.ends_with("::Greeter"));
//! assert_eq!(GreeterContract::signatures().len(), 5);
//! ```
//!
//! This generates:
//! - the `Greeter` trait providers implement
//! - `GreeterContract`, the [`Contract`] marker (name, signatures, dispatch routes)
//! - `GreeterClient`, a proxy implementing `Greeter` by sending over the bus
//!
//! Trait methods return `BoxFuture<'_, Result<R>>` for async methods and
//! `Result<R>` for blocking and void ones. Arguments are owned values; every
//! argument and return type implements [`WireValue`](crate::codec::WireValue).

use std::fmt;
use std::sync::Arc;

use crate::address;
use crate::codec::{shape_name, unwrap_async, TypeDescriptor};
use crate::proxy::Invoker;
use crate::registrar::Route;

/// How a contract method returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// Returns an async wrapper of the payload.
    Async,
    /// Returns the payload directly; the caller blocks for the reply.
    Blocking,
    /// Returns nothing; no reply is awaited.
    Void,
}

/// Static description of one contract method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    /// Qualified name of the declaring contract.
    pub contract: &'static str,
    /// Method name.
    pub method: &'static str,
    /// Return form.
    pub kind: CallKind,
    /// Declared parameter types, in order.
    pub params: Vec<TypeDescriptor>,
    /// Declared return type (async methods: the async wrapper).
    pub returns: TypeDescriptor,
    /// Explicit address replacing the derived one.
    pub address_override: Option<&'static str>,
    /// Marked as not remotely eligible, on the method or its contract.
    pub ignored: bool,
}

impl MethodSignature {
    /// Describe a method; `payload` is what the method eventually produces.
    pub fn new(
        contract: &'static str,
        method: &'static str,
        kind: CallKind,
        params: Vec<TypeDescriptor>,
        payload: TypeDescriptor,
    ) -> Self {
        let returns = match kind {
            CallKind::Async => TypeDescriptor::async_of(payload),
            CallKind::Blocking => payload,
            CallKind::Void => TypeDescriptor::Unit,
        };
        Self {
            contract,
            method,
            kind,
            params,
            returns,
            address_override: None,
            ignored: false,
        }
    }

    /// Set the address override (builder style).
    pub fn with_address(mut self, address: Option<&'static str>) -> Self {
        self.address_override = address;
        self
    }

    /// Set the ignored flag (builder style).
    pub fn with_ignored(mut self, ignored: bool) -> Self {
        self.ignored = ignored;
        self
    }

    /// Payload type of the reply, with any async wrapper removed.
    pub fn payload_type(&self) -> TypeDescriptor {
        match self.kind {
            CallKind::Async => unwrap_async(&self.returns),
            _ => self.returns.clone(),
        }
    }

    /// Argument shape, e.g. `[String, app::User]`.
    pub fn arg_shape(&self) -> String {
        shape_name(&self.params)
    }

    /// Whether the sole parameter is the bus envelope.
    pub fn is_native(&self) -> bool {
        matches!(self.params.as_slice(), [TypeDescriptor::Envelope])
    }

    /// Whether the method may be reached over the bus.
    pub fn is_eligible(&self) -> bool {
        !self.ignored
    }

    /// Bus address of the method.
    pub fn address(&self) -> String {
        address::resolve(self)
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(|p| p.type_name()).collect();
        write!(
            f,
            "{}::{}({}) -> {}",
            self.contract,
            self.method,
            params.join(", "),
            self.returns
        )
    }
}

/// A contract as seen by the registrar and the proxy.
///
/// Implemented by the `<Name>Contract` marker that
/// [`contract!`](crate::contract!) generates.
pub trait Contract: 'static {
    /// The provider-facing trait object, e.g. `dyn Greeter`.
    type Provider: ?Sized + Send + Sync + 'static;

    /// The generated client type.
    type Client: Clone + Send + Sync + 'static;

    /// Qualified contract name (`module::Trait`).
    const NAME: &'static str;

    /// Whether the whole contract is marked ignored.
    const IGNORED: bool;

    /// Every declared method, eligible or not.
    fn signatures() -> Vec<MethodSignature>;

    /// One dispatch route per declared method, bound to `provider`.
    fn routes(provider: Arc<Self::Provider>) -> Vec<Route>;

    /// Build a client sending through `invoker`.
    fn client(invoker: Invoker) -> Self::Client;
}

/// Declare a contract trait along with its marker and client.
///
/// See the [module documentation](crate::contract) for the accepted syntax.
#[macro_export]
macro_rules! contract {
    // Contract-level attributes: pull out `#[ignore]`, keep the rest.
    (@head $h:tt [$ign:tt] $docs:tt [#[ignore] $($attrs:tt)*] $body:tt) => {
        $crate::contract!(@head $h [true] $docs [$($attrs)*] $body);
    };
    (@head $h:tt $ign:tt [$($docs:tt)*] [#[$meta:meta] $($attrs:tt)*] $body:tt) => {
        $crate::contract!(@head $h $ign [$($docs)* #[$meta]] [$($attrs)*] $body);
    };
    (@head $h:tt $ign:tt $docs:tt [] { $($body:tt)* }) => {
        $crate::contract!(@methods $h $ign $docs [] $($body)*);
    };

    // Methods: one record per declared method.
    (@methods $h:tt $ign:tt $docs:tt $done:tt) => {
        $crate::contract!(@emit $h $ign $docs $done);
    };
    (@methods $h:tt $ign:tt $docs:tt $done:tt $($rest:tt)+) => {
        $crate::contract!(@method $h $ign $docs $done [] [false] [None] $($rest)+);
    };

    (@method $h:tt $ign:tt $docs:tt $done:tt $md:tt [$mi:tt] $addr:tt
        #[ignore] $($rest:tt)*) => {
        $crate::contract!(@method $h $ign $docs $done $md [true] $addr $($rest)*);
    };
    (@method $h:tt $ign:tt $docs:tt $done:tt $md:tt $mi:tt $addr:tt
        #[address($address:literal)] $($rest:tt)*) => {
        $crate::contract!(@method $h $ign $docs $done $md $mi [Some($address)] $($rest)*);
    };
    (@method $h:tt $ign:tt $docs:tt $done:tt [$($md:tt)*] $mi:tt $addr:tt
        #[$meta:meta] $($rest:tt)*) => {
        $crate::contract!(@method $h $ign $docs $done [$($md)* #[$meta]] $mi $addr $($rest)*);
    };
    (@method $h:tt $ign:tt $docs:tt [$($done:tt)*] $md:tt $mi:tt $addr:tt
        async fn $m:ident(&self $(, $arg:ident : $ty:ty)*) -> $ret:ty; $($rest:tt)*) => {
        $crate::contract!(@methods $h $ign $docs
            [$($done)* { Async $md $mi $addr $m ($($arg : $ty),*) -> $ret }] $($rest)*);
    };
    (@method $h:tt $ign:tt $docs:tt [$($done:tt)*] $md:tt $mi:tt $addr:tt
        fn $m:ident(&self $(, $arg:ident : $ty:ty)*) -> $ret:ty; $($rest:tt)*) => {
        $crate::contract!(@methods $h $ign $docs
            [$($done)* { Blocking $md $mi $addr $m ($($arg : $ty),*) -> $ret }] $($rest)*);
    };
    (@method $h:tt $ign:tt $docs:tt [$($done:tt)*] $md:tt $mi:tt $addr:tt
        fn $m:ident(&self $(, $arg:ident : $ty:ty)*); $($rest:tt)*) => {
        $crate::contract!(@methods $h $ign $docs
            [$($done)* { Void $md $mi $addr $m ($($arg : $ty),*) -> () }] $($rest)*);
    };

    (@emit [$vis:vis $name:ident] [$cign:tt] [$($docs:tt)*]
        [$({ $kind:ident [$($md:tt)*] [$mi:tt] [$($addr:tt)*]
            $m:ident ($($arg:ident : $ty:ty),*) -> $ret:ty })*]) => {
        $crate::paste::paste! {
            $($docs)*
            $vis trait $name: Send + Sync + 'static {
                $(
                    $crate::__contract_trait_item!($kind [$($md)*] $m ($($arg : $ty),*) -> $ret);
                )*
            }

            /// Contract marker generated by `contract!`.
            #[derive(Debug, Clone, Copy, Default)]
            $vis struct [<$name Contract>];

            impl $crate::contract::Contract for [<$name Contract>] {
                type Provider = dyn $name;
                type Client = [<$name Client>];

                const NAME: &'static str = concat!(module_path!(), "::", stringify!($name));
                const IGNORED: bool = $cign;

                fn signatures() -> ::std::vec::Vec<$crate::contract::MethodSignature> {
                    ::std::vec![$(
                        $crate::__contract_signature!(
                            $kind [$cign $mi] [$($addr)*] $name $m ($($ty),*) -> $ret
                        )
                    ),*]
                }

                #[allow(unused_variables)]
                fn routes(
                    provider: ::std::sync::Arc<dyn $name>,
                ) -> ::std::vec::Vec<$crate::registrar::Route> {
                    ::std::vec![$(
                        $crate::__contract_route!(
                            $kind provider [$cign $mi] [$($addr)*] $name $m ($($arg : $ty),*) -> $ret
                        )
                    ),*]
                }

                fn client(invoker: $crate::proxy::Invoker) -> Self::Client {
                    [<$name Client>] { invoker }
                }
            }

            /// Bus client generated by `contract!`.
            #[derive(Clone)]
            $vis struct [<$name Client>] {
                invoker: $crate::proxy::Invoker,
            }

            impl [<$name Client>] {
                /// Invoker the client sends through.
                pub fn invoker(&self) -> &$crate::proxy::Invoker {
                    &self.invoker
                }
            }

            impl $name for [<$name Client>] {
                $(
                    $crate::__contract_client_item!(
                        $kind [$cign $mi] [$($addr)*] $name $m ($($arg : $ty),*) -> $ret
                    );
                )*
            }
        }
    };

    ($(#[$($attr:tt)*])* $vis:vis trait $name:ident { $($body:tt)* }) => {
        $crate::contract!(@head [$vis $name] [false] [] [$(#[$($attr)*])*] { $($body)* });
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __contract_trait_item {
    (Async [$($md:tt)*] $m:ident ($($arg:ident : $ty:ty),*) -> $ret:ty) => {
        $($md)*
        fn $m(&self $(, $arg: $ty)*)
            -> $crate::bus::BoxFuture<'_, $crate::error::Result<$ret>>;
    };
    (Blocking [$($md:tt)*] $m:ident ($($arg:ident : $ty:ty),*) -> $ret:ty) => {
        $($md)*
        fn $m(&self $(, $arg: $ty)*) -> $crate::error::Result<$ret>;
    };
    (Void [$($md:tt)*] $m:ident ($($arg:ident : $ty:ty),*) -> $ret:ty) => {
        $($md)*
        fn $m(&self $(, $arg: $ty)*) -> $crate::error::Result<()>;
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __contract_signature {
    ($kind:ident [$cign:tt $mi:tt] [$($addr:tt)*] $name:ident $m:ident ($($ty:ty),*) -> $ret:ty) => {
        $crate::contract::MethodSignature::new(
            concat!(module_path!(), "::", stringify!($name)),
            stringify!($m),
            $crate::contract::CallKind::$kind,
            ::std::vec![$(<$ty as $crate::codec::WireValue>::descriptor()),*],
            <$ret as $crate::codec::WireValue>::descriptor(),
        )
        .with_address($($addr)*)
        .with_ignored($cign || $mi)
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __contract_route {
    (Async $provider:ident $ign:tt $addr:tt $name:ident $m:ident
        ($($arg:ident : $ty:ty),*) -> $ret:ty) => {{
        let provider = ::std::sync::Arc::clone(&$provider);
        $crate::registrar::Route::awaited::<($($ty,)*), $ret, _>(
            $crate::__contract_signature!(Async $ign $addr $name $m ($($ty),*) -> $ret),
            move |($($arg,)*)| -> $crate::bus::BoxFuture<'static, $crate::error::Result<$ret>> {
                let provider = ::std::sync::Arc::clone(&provider);
                ::std::boxed::Box::pin(async move { provider.$m($($arg),*).await })
            },
        )
    }};
    (Blocking $provider:ident $ign:tt $addr:tt $name:ident $m:ident
        ($($arg:ident : $ty:ty),*) -> $ret:ty) => {{
        let provider = ::std::sync::Arc::clone(&$provider);
        $crate::registrar::Route::direct::<($($ty,)*), $ret, _>(
            $crate::__contract_signature!(Blocking $ign $addr $name $m ($($ty),*) -> $ret),
            move |($($arg,)*)| provider.$m($($arg),*),
        )
    }};
    (Void $provider:ident $ign:tt $addr:tt $name:ident $m:ident
        ($($arg:ident : $ty:ty),*) -> $ret:ty) => {{
        let provider = ::std::sync::Arc::clone(&$provider);
        $crate::registrar::Route::oneway::<($($ty,)*), _>(
            $crate::__contract_signature!(Void $ign $addr $name $m ($($ty),*) -> $ret),
            move |($($arg,)*)| provider.$m($($arg),*),
        )
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __contract_client_item {
    (Async $ign:tt $addr:tt $name:ident $m:ident ($($arg:ident : $ty:ty),*) -> $ret:ty) => {
        fn $m(&self $(, $arg: $ty)*)
            -> $crate::bus::BoxFuture<'_, $crate::error::Result<$ret>> {
            static SIGNATURE: ::std::sync::OnceLock<$crate::contract::MethodSignature> =
                ::std::sync::OnceLock::new();
            let signature = SIGNATURE.get_or_init(|| {
                $crate::__contract_signature!(Async $ign $addr $name $m ($($ty),*) -> $ret)
            });
            self.invoker.call_async::<($($ty,)*), $ret>(signature, ($($arg,)*))
        }
    };
    (Blocking $ign:tt $addr:tt $name:ident $m:ident ($($arg:ident : $ty:ty),*) -> $ret:ty) => {
        fn $m(&self $(, $arg: $ty)*) -> $crate::error::Result<$ret> {
            static SIGNATURE: ::std::sync::OnceLock<$crate::contract::MethodSignature> =
                ::std::sync::OnceLock::new();
            let signature = SIGNATURE.get_or_init(|| {
                $crate::__contract_signature!(Blocking $ign $addr $name $m ($($ty),*) -> $ret)
            });
            self.invoker.call_blocking::<($($ty,)*), $ret>(signature, ($($arg,)*))
        }
    };
    (Void $ign:tt $addr:tt $name:ident $m:ident ($($arg:ident : $ty:ty),*) -> $ret:ty) => {
        fn $m(&self $(, $arg: $ty)*) -> $crate::error::Result<()> {
            static SIGNATURE: ::std::sync::OnceLock<$crate::contract::MethodSignature> =
                ::std::sync::OnceLock::new();
            let signature = SIGNATURE.get_or_init(|| {
                $crate::__contract_signature!(Void $ign $addr $name $m ($($ty),*) -> $ret)
            });
            self.invoker.call_oneway::<($($ty,)*)>(signature, ($($arg,)*))
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BoxFuture;
    use crate::error::Result;

    crate::contract! {
        /// Test contract.
        pub trait Greeter {
            /// Says hello.
            async fn hello(&self, name: String) -> String;
            fn count(&self) -> i32;
            fn notify(&self, message: String);
            #[ignore]
            fn local(&self) -> String;
            #[address("greeter.shout")]
            async fn shout(&self, name: String, times: u8) -> String;
        }
    }

    crate::contract! {
        #[ignore]
        pub trait Lifecycle {
            fn start(&self) -> bool;
        }
    }

    struct English;

    impl Greeter for English {
        fn hello(&self, name: String) -> BoxFuture<'_, Result<String>> {
            Box::pin(async move { Ok(format!("Hello {name}")) })
        }

        fn count(&self) -> Result<i32> {
            Ok(1)
        }

        fn notify(&self, _message: String) -> Result<()> {
            Ok(())
        }

        fn local(&self) -> Result<String> {
            Ok("local".into())
        }

        fn shout(&self, name: String, times: u8) -> BoxFuture<'_, Result<String>> {
            Box::pin(async move { Ok(name.to_uppercase().repeat(times as usize)) })
        }
    }

    fn signature(method: &str) -> MethodSignature {
        GreeterContract::signatures()
            .into_iter()
            .find(|s| s.method == method)
            .unwrap()
    }

    #[test]
    fn test_contract_name_is_qualified() {
        assert_eq!(GreeterContract::NAME, concat!(module_path!(), "::Greeter"));
        assert!(!GreeterContract::IGNORED);
    }

    #[test]
    fn test_signature_table() {
        let signatures = GreeterContract::signatures();
        let methods: Vec<&str> = signatures.iter().map(|s| s.method).collect();
        assert_eq!(methods, vec!["hello", "count", "notify", "local", "shout"]);

        let hello = signature("hello");
        assert_eq!(hello.kind, CallKind::Async);
        assert_eq!(hello.params, vec![TypeDescriptor::Primitive("String")]);
        assert_eq!(hello.payload_type(), TypeDescriptor::Primitive("String"));
        assert!(matches!(hello.returns, TypeDescriptor::Async(Some(_))));

        assert_eq!(signature("count").kind, CallKind::Blocking);
        assert_eq!(signature("count").arg_shape(), "[]");
        assert_eq!(signature("notify").kind, CallKind::Void);
        assert_eq!(signature("notify").returns, TypeDescriptor::Unit);
    }

    #[test]
    fn test_ignored_and_override() {
        assert!(!signature("local").is_eligible());
        assert!(signature("hello").is_eligible());
        assert_eq!(signature("shout").address(), "greeter.shout");
        assert_eq!(
            signature("hello").address(),
            concat!(module_path!(), "::Greeter.hello([String])")
        );
    }

    #[test]
    fn test_ignored_contract() {
        assert!(LifecycleContract::IGNORED);
        assert!(LifecycleContract::signatures()
            .iter()
            .all(|s| !s.is_eligible()));
    }

    #[test]
    fn test_one_route_per_method() {
        let provider: Arc<dyn Greeter> = Arc::new(English);
        let routes = GreeterContract::routes(provider);
        assert_eq!(routes.len(), 5);
        assert_eq!(routes[4].signature().method, "shout");
    }

    #[test]
    fn test_display() {
        let text = signature("shout").to_string();
        assert!(text.ends_with("::Greeter::shout(String, u8) -> Future<String>"));
    }

    #[test]
    fn test_native_detection() {
        let native = MethodSignature::new(
            "app::Raw",
            "handle",
            CallKind::Void,
            vec![TypeDescriptor::Envelope],
            TypeDescriptor::Unit,
        );
        assert!(native.is_native());
        assert!(!signature("hello").is_native());
    }
}
