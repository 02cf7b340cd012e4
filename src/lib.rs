//! Declarative object graphs: a struct's field declarations drive its
//! instantiation, with scoped providers, per-context singletons and
//! cycle-safe recursive resolution.
//!
//! # Simple use case
//!
//! ```
//! use autoinit::{get_instance, AutoInit, InitContext, InitError};
//!
//! #[derive(AutoInit, Debug)]
//! struct Point {
//!     x: i64,
//!     y: i64,
//! }
//!
//! fn main() -> Result<(), InitError> {
//!     // Plain resolution: declared attributes get their neutral defaults.
//!     let p: Point = get_instance()?;
//!     assert_eq!((p.x, p.y), (0, 0));
//!
//!     // Builder construction: supplied values are consumed in preference
//!     // to auto-generated ones.
//!     let p = Point::builder().x(1).y(2).build()?;
//!     assert_eq!(p.to_string(), "<Point x=1, y=2>");
//!
//!     // A scoped context overrides resolution while it is active.
//!     let ctx = InitContext::new();
//!     ctx.register_factory::<i64, _>(|| 7);
//!     {
//!         let _scope = ctx.enter();
//!         let p: Point = get_instance()?;
//!         assert_eq!((p.x, p.y), (7, 7));
//!     }
//!     let p: Point = get_instance()?;
//!     assert_eq!((p.x, p.y), (0, 0));
//!     Ok(())
//! }
//! ```
//!
//! # Mechanism
//!
//! The engine combines a thread-local stack of [InitContext] scopes with a
//! per-call [Resolver]. Resolving a type first consults the active context's
//! provider map; without a provider, the type constructs itself and
//! recursively resolves its own declared attributes. The derive macro
//! supplies the declaration schema that a dynamic language would read from
//! runtime type hints: each `#[derive(AutoInit)]` classifies its field types
//! syntactically and generates the resolving constructor, a builder, and
//! attribute-based `Display`/`PartialEq` impls.
//!
//! Cycles terminate through the resolver's pending set: a nullable
//! attribute whose target type is already under construction yields `None`
//! instead of recursing. Singleton semantics live on shared references:
//! resolving `Arc<T>` for a type pinned as a singleton caches the first
//! instance in the active context and hands it out on every later
//! resolution there, invisible to sibling and parent contexts.

// Generated impls refer to the crate by name so that one expansion works in
// downstream crates and in this crate's own tests.
extern crate self as autoinit;

mod context;
mod provide;
mod resolve;
mod schema;

pub use autoinit_macros::AutoInit;
pub use context::{current, ContextGuard, InitContext};
pub use provide::{FactoryProvider, InstanceProvider, Provide, Provider};
pub use resolve::{with_resolver, AutoInit, InitError, Resolution, Resolver};
pub use schema::{AttrKind, AttrSpec, Schema};

/// Resolve an instance of `T` against the currently active context.
pub fn get_instance<T: AutoInit>() -> Result<T, InitError> {
    with_resolver(|resolver| resolver.resolve::<T>())
}

/// Resolve an instance of `T` and return the resolution record describing
/// the dependency tree built along the way. The record is `None` when
/// nothing was recursively constructed.
pub fn create_instance<T: AutoInit>() -> Result<(T, Option<Resolution>), InitError> {
    resolve::top_level(|resolver| resolver.resolve::<T>())
}

/// Populate the declared attributes of an already-allocated value against
/// the currently active context, leaving observably-set attributes alone.
pub fn init_instance<T: Schema>(value: &mut T) -> Result<(), InitError> {
    with_resolver(|resolver| value.init_unset(resolver))
}

#[cfg(test)]
mod tests;
