//! The instance creation engine.
//!
//! Resolution of a type runs against whatever context is currently active
//! and follows a fixed order:
//!
//! 1. an explicit provider registered for the type wins, and its output is
//!    returned verbatim (the provider owns that object's construction);
//! 2. in an explicit-only context, anything without a provider resolves to
//!    its neutral absence;
//! 3. otherwise the type constructs itself, recursively resolving its own
//!    declared attributes.
//!
//! Recursive construction is kept terminating by a pending set: the set of
//! types currently under construction in one top-level resolution call.
//! A nullable attribute whose target is already pending yields `None`
//! instead of recursing, so self-referential and mutually-referential type
//! graphs settle one level past the first cycle detection. The pending set
//! is empty again the moment the top-level call returns.

use std::any::{type_name, Any, TypeId};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::context::current;

/// Errors raised while wiring an object graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    /// A type re-entered its own construction through a non-nullable
    /// reference. Route the cycle through an `Option` to break it.
    #[error("cycle detected while resolving `{0}` through a non-nullable reference")]
    Cycle(&'static str),

    /// A shared reference was requested in an explicit-only context without
    /// a registered provider; shared references have no neutral absence.
    #[error("`{0}` has no provider in an explicit-only context")]
    NotProvided(&'static str),
}

/// Record describing one constructed instance and the dependencies that
/// were recursively constructed for it. Inspection and testing aid; the
/// engine itself never consumes it.
#[derive(Debug)]
pub struct Resolution {
    type_name: &'static str,
    complete: bool,
    dependencies: Vec<Resolution>,
}

impl Resolution {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether attribute population ran to completion.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn dependencies(&self) -> &[Resolution] {
        &self.dependencies
    }
}

/// State of one top-level resolution call: the pending set and the stack of
/// resolution records under construction.
pub struct Resolver {
    pending: HashSet<TypeId>,
    frames: Vec<Resolution>,
    root: Option<Resolution>,
}

impl Resolver {
    pub(crate) fn new() -> Self {
        Resolver {
            pending: HashSet::new(),
            frames: Vec::new(),
            root: None,
        }
    }

    /// Resolve an instance of `T` against the active context.
    pub fn resolve<T: AutoInit>(&mut self) -> Result<T, InitError> {
        T::resolve(self)
    }

    /// Provider lookup, explicit-only handling and construction, without
    /// singleton pinning. This is the flow [AutoInit::resolve]
    /// implementations delegate to once pinning is dealt with.
    pub fn resolve_direct<T: AutoInit>(&mut self) -> Result<T, InitError> {
        let ctx = current();
        if let Some(provider) = ctx.get_provider::<T>() {
            trace!(ty = type_name::<T>(), "resolving through provider");
            return Ok(provider.provide());
        }
        if ctx.is_explicit_only() {
            return T::absent(self);
        }
        trace!(ty = type_name::<T>(), "constructing");
        T::init(self)
    }

    /// Provider-or-default resolution: a registered provider overrides the
    /// supplied default, and nothing is constructed otherwise.
    pub fn resolve_or<T: AutoInit>(
        &mut self,
        default: impl FnOnce() -> T,
    ) -> Result<T, InitError> {
        match current().get_provider::<T>() {
            Some(provider) => Ok(provider.provide()),
            None => Ok(default()),
        }
    }

    /// Output of the provider registered for `T` in the active context,
    /// if there is one.
    pub fn provided<T: AutoInit>(&mut self) -> Option<T> {
        current()
            .get_provider::<T>()
            .map(|provider| provider.provide())
    }

    /// Whether the type guarding `T`'s construction is currently being
    /// constructed somewhere up the call chain.
    pub fn is_pending<T: AutoInit>(&self) -> bool {
        self.pending.contains(&T::guard_id())
    }

    /// Run one recursive construction step for `T`.
    ///
    /// Registers `T` in the pending set for the duration of `build`, opens a
    /// resolution record, and links the record to the enclosing one. Used by
    /// generated [AutoInit::init] implementations.
    pub fn nest<T: AutoInit, F>(&mut self, build: F) -> Result<T, InitError>
    where
        F: FnOnce(&mut Resolver) -> Result<T, InitError>,
    {
        let guard = T::guard_id();
        if !self.pending.insert(guard) {
            return Err(InitError::Cycle(type_name::<T>()));
        }
        self.frames.push(Resolution {
            type_name: type_name::<T>(),
            complete: false,
            dependencies: Vec::new(),
        });
        let outcome = build(self);
        self.pending.remove(&guard);
        if let Some(mut frame) = self.frames.pop() {
            frame.complete = outcome.is_ok();
            match self.frames.last_mut() {
                Some(parent) => parent.dependencies.push(frame),
                None => self.root = Some(frame),
            }
        }
        outcome
    }

    /// Per-context caching for shared references.
    ///
    /// When `pinned` is set, or the active context registered `S` as a
    /// singleton, the first resolution is cached in that context and handed
    /// out on every later one, including output that came from a provider.
    pub fn shared<S, F>(&mut self, pinned: bool, build: F) -> Result<S, InitError>
    where
        S: Any + Clone,
        F: FnOnce(&mut Resolver) -> Result<S, InitError>,
    {
        let ctx = current();
        if pinned || ctx.is_singleton::<S>() {
            if let Some(existing) = ctx.get_singleton::<S>() {
                trace!(ty = type_name::<S>(), "singleton cache hit");
                return Ok(existing);
            }
            let value = build(self)?;
            ctx.set_singleton(value.clone());
            return Ok(value);
        }
        build(self)
    }

    #[cfg(test)]
    pub(crate) fn pending_is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Run one top-level resolution call with a fresh [Resolver].
///
/// This is the entry point generated builders go through; library users
/// normally reach it via [crate::get_instance] and friends.
pub fn with_resolver<T>(
    f: impl FnOnce(&mut Resolver) -> Result<T, InitError>,
) -> Result<T, InitError> {
    top_level(f).map(|(value, _)| value)
}

pub(crate) fn top_level<T>(
    f: impl FnOnce(&mut Resolver) -> Result<T, InitError>,
) -> Result<(T, Option<Resolution>), InitError> {
    let mut resolver = Resolver::new();
    let value = f(&mut resolver)?;
    debug_assert!(
        resolver.pending.is_empty(),
        "the pending set must drain when a top-level resolution returns"
    );
    Ok((value, resolver.root.take()))
}

/// A type the engine knows how to construct.
///
/// Implemented by the crate for the scalar and container universe, by
/// `#[derive(AutoInit)]` for user types, and by [crate::bind_instance] /
/// [crate::bind_singleton] for `Arc<dyn Trait>` seams.
pub trait AutoInit: Any + Sized {
    /// Pins `Arc<Self>` resolution to the per-context singleton cache.
    const SINGLETON: bool = false;

    /// Construct an instance, recursively resolving declared attributes.
    fn init(resolver: &mut Resolver) -> Result<Self, InitError>;

    /// Resolution result in an explicit-only context with no provider.
    /// Defaults to plain construction, which cascades the explicit-only
    /// rule into every attribute.
    fn absent(resolver: &mut Resolver) -> Result<Self, InitError> {
        Self::init(resolver)
    }

    /// The `TypeId` registered in the pending set while this type
    /// constructs. Indirection delegates to its target so that a cycle is
    /// recognised no matter how the back-reference is wrapped.
    fn guard_id() -> TypeId {
        TypeId::of::<Self>()
    }

    /// Full resolution flow. Overridden where singleton pinning applies.
    fn resolve(resolver: &mut Resolver) -> Result<Self, InitError> {
        resolver.resolve_direct::<Self>()
    }
}

macro_rules! zero_default {
    ($($scalar:ty),* $(,)?) => {
        $(
            impl AutoInit for $scalar {
                fn init(_: &mut Resolver) -> Result<Self, InitError> {
                    Ok(<$scalar>::default())
                }
            }
        )*
    };
}

zero_default!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool, char, String,
);

// Containers resolve empty regardless of their element types; elements are
// never recursively populated.

impl<T: 'static> AutoInit for Vec<T> {
    fn init(_: &mut Resolver) -> Result<Self, InitError> {
        Ok(Vec::new())
    }
}

impl<T: 'static> AutoInit for VecDeque<T> {
    fn init(_: &mut Resolver) -> Result<Self, InitError> {
        Ok(VecDeque::new())
    }
}

impl<K: 'static, V: 'static> AutoInit for HashMap<K, V> {
    fn init(_: &mut Resolver) -> Result<Self, InitError> {
        Ok(HashMap::new())
    }
}

impl<K: 'static, V: 'static> AutoInit for BTreeMap<K, V> {
    fn init(_: &mut Resolver) -> Result<Self, InitError> {
        Ok(BTreeMap::new())
    }
}

impl<T: 'static> AutoInit for HashSet<T> {
    fn init(_: &mut Resolver) -> Result<Self, InitError> {
        Ok(HashSet::new())
    }
}

impl<T: 'static> AutoInit for BTreeSet<T> {
    fn init(_: &mut Resolver) -> Result<Self, InitError> {
        Ok(BTreeSet::new())
    }
}

impl<T: AutoInit> AutoInit for Option<T> {
    /// `None` when the target is already under construction (this is where
    /// cyclic type graphs settle), or `Some` of a full resolution otherwise.
    fn init(resolver: &mut Resolver) -> Result<Self, InitError> {
        if resolver.is_pending::<T>() {
            debug!(
                ty = type_name::<T>(),
                "already under construction, settling to None"
            );
            return Ok(None);
        }
        resolver.resolve::<T>().map(Some)
    }

    fn absent(_: &mut Resolver) -> Result<Self, InitError> {
        Ok(None)
    }

    fn guard_id() -> TypeId {
        T::guard_id()
    }
}

impl<T: AutoInit> AutoInit for Box<T> {
    fn init(resolver: &mut Resolver) -> Result<Self, InitError> {
        resolver.resolve::<T>().map(Box::new)
    }

    fn guard_id() -> TypeId {
        T::guard_id()
    }
}

impl<T: AutoInit> AutoInit for Arc<T> {
    fn init(resolver: &mut Resolver) -> Result<Self, InitError> {
        resolver.resolve::<T>().map(Arc::new)
    }

    fn absent(_: &mut Resolver) -> Result<Self, InitError> {
        Err(InitError::NotProvided(type_name::<Self>()))
    }

    fn guard_id() -> TypeId {
        T::guard_id()
    }

    fn resolve(resolver: &mut Resolver) -> Result<Self, InitError> {
        resolver.shared(T::SINGLETON, |r| r.resolve_direct::<Self>())
    }
}

/// Bind an `Arc<dyn Trait>` seam to a concrete default implementation,
/// constructed fresh on every resolution. An explicit provider registered
/// for `Arc<dyn Trait>` in the active context still wins.
///
/// ```ignore
/// trait Clock { fn now(&self) -> u64; }
///
/// #[derive(AutoInit)]
/// struct SystemClock;
/// impl Clock for SystemClock { fn now(&self) -> u64 { 0 } }
///
/// bind_instance!(dyn Clock => SystemClock);
/// ```
#[macro_export]
macro_rules! bind_instance {
    ($iface:ty => $concrete:ty) => {
        impl $crate::AutoInit for ::std::sync::Arc<$iface> {
            fn init(
                resolver: &mut $crate::Resolver,
            ) -> ::std::result::Result<Self, $crate::InitError> {
                Ok(::std::sync::Arc::new(resolver.resolve::<$concrete>()?))
            }

            fn absent(
                _: &mut $crate::Resolver,
            ) -> ::std::result::Result<Self, $crate::InitError> {
                Err($crate::InitError::NotProvided(
                    ::std::any::type_name::<Self>(),
                ))
            }

            fn guard_id() -> ::std::any::TypeId {
                <$concrete as $crate::AutoInit>::guard_id()
            }
        }
    };
}

/// Like [bind_instance], but the first instance built while a context is
/// active is cached there and shared by every later resolution.
#[macro_export]
macro_rules! bind_singleton {
    ($iface:ty => $concrete:ty) => {
        impl $crate::AutoInit for ::std::sync::Arc<$iface> {
            fn init(
                resolver: &mut $crate::Resolver,
            ) -> ::std::result::Result<Self, $crate::InitError> {
                Ok(::std::sync::Arc::new(resolver.resolve::<$concrete>()?))
            }

            fn absent(
                _: &mut $crate::Resolver,
            ) -> ::std::result::Result<Self, $crate::InitError> {
                Err($crate::InitError::NotProvided(
                    ::std::any::type_name::<Self>(),
                ))
            }

            fn guard_id() -> ::std::any::TypeId {
                <$concrete as $crate::AutoInit>::guard_id()
            }

            fn resolve(
                resolver: &mut $crate::Resolver,
            ) -> ::std::result::Result<Self, $crate::InitError> {
                resolver.shared(true, |r| r.resolve_direct::<Self>())
            }
        }
    };
}
