//! Contexts and the thread-local context stack.
//!
//! A context holds the customisations that steer resolution: a provider map,
//! the set of types pinned to singleton behaviour, and the cache of
//! singletons already created while the context was active.
//!
//! Contexts stack. Every thread starts with a permanent base context at the
//! bottom of its stack; it is never popped, and all resolution performed
//! outside an explicit scope runs against it. Entering a context pushes it
//! on top and makes it authoritative: provider lookup consults the top of
//! the stack only, with no merging across frames. Scopes must unwind in
//! reverse order of entry; violating that is a programming error and panics.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::trace;

use crate::provide::{FactoryProvider, InstanceProvider, Provider};
use crate::resolve::{top_level, with_resolver, AutoInit, InitError, Resolution};
use crate::schema::Schema;

thread_local! {
    static STACK: RefCell<Vec<InitContext>> = RefCell::new(vec![InitContext::new()]);
}

/// Handle to the context currently at the top of this thread's stack.
pub fn current() -> InitContext {
    STACK.with(|stack| {
        stack
            .borrow()
            .last()
            .expect("the context stack always holds the base context")
            .clone()
    })
}

struct ContextInner {
    providers: RefCell<HashMap<TypeId, Box<dyn Any>>>,
    singleton_types: RefCell<HashSet<TypeId>>,
    singletons: RefCell<HashMap<TypeId, Box<dyn Any>>>,
    explicit_only: bool,
}

/// A resolution scope: provider map, singleton pins and singleton cache.
///
/// The handle is cheap to clone; clones share the same scope. Dropping all
/// handles discards the scope together with its singleton cache.
#[derive(Clone)]
pub struct InitContext {
    inner: Rc<ContextInner>,
}

impl Default for InitContext {
    fn default() -> Self {
        Self::new()
    }
}

impl InitContext {
    pub fn new() -> Self {
        Self::with_mode(false)
    }

    /// A context that only resolves types with a registered provider.
    /// Everything else yields its neutral absence.
    pub fn explicit_only() -> Self {
        Self::with_mode(true)
    }

    fn with_mode(explicit_only: bool) -> Self {
        InitContext {
            inner: Rc::new(ContextInner {
                providers: RefCell::new(HashMap::new()),
                singleton_types: RefCell::new(HashSet::new()),
                singletons: RefCell::new(HashMap::new()),
                explicit_only,
            }),
        }
    }

    pub fn is_explicit_only(&self) -> bool {
        self.inner.explicit_only
    }

    /// Push this context onto the thread's stack. The returned guard pops it
    /// again on drop and asserts that it still is the top of the stack.
    pub fn enter(&self) -> ContextGuard {
        STACK.with(|stack| stack.borrow_mut().push(self.clone()));
        ContextGuard { ctx: self.clone() }
    }

    /// Register a ready-made value, keyed by its own type. Every resolution
    /// of that type yields a clone of the value while this context is active.
    pub fn register_instance<T: Any + Clone>(&self, value: T) {
        self.put_provider::<T>(Rc::new(InstanceProvider::new(value)));
    }

    /// Register a constructor invoked on every resolution of `T`.
    pub fn register_factory<T: Any, F: Fn() -> T + 'static>(&self, factory: F) {
        self.put_provider::<T>(Rc::new(FactoryProvider::new(factory)));
    }

    /// Pin `T` to singleton behaviour: the first resolution is cached in
    /// this context and handed out on every subsequent one. `T` is the full
    /// resolved type, e.g. `Arc<App>` or `Arc<dyn Service>`.
    pub fn register_singleton<T: Any>(&self) {
        self.inner
            .singleton_types
            .borrow_mut()
            .insert(TypeId::of::<T>());
    }

    /// Pin `T` to singleton behaviour and install the factory that builds
    /// the cached instance.
    pub fn register_singleton_with<T: Any, F: Fn() -> T + 'static>(&self, factory: F) {
        self.register_singleton::<T>();
        self.register_factory::<T, F>(factory);
    }

    /// Register the type itself as its provider: while this context is
    /// active, resolving `T` constructs and populates a fresh instance even
    /// in an explicit-only context. Construction failures propagate as
    /// panics, like any other provider failure.
    pub fn register_type<T: AutoInit>(&self) {
        self.register_factory::<T, _>(|| match with_resolver(T::init) {
            Ok(value) => value,
            Err(err) => panic!("auto-initialisation of a registered type failed: {err}"),
        });
    }

    fn put_provider<T: Any>(&self, provider: Provider<T>) {
        self.inner
            .providers
            .borrow_mut()
            .insert(TypeId::of::<T>(), Box::new(provider));
    }

    /// The provider registered for `T` in this context, if any.
    pub fn get_provider<T: Any>(&self) -> Option<Provider<T>> {
        self.inner
            .providers
            .borrow()
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast_ref::<Provider<T>>())
            .map(Rc::clone)
    }

    pub fn is_singleton<T: Any>(&self) -> bool {
        self.inner
            .singleton_types
            .borrow()
            .contains(&TypeId::of::<T>())
    }

    pub fn has_singleton<T: Any>(&self) -> bool {
        self.inner
            .singletons
            .borrow()
            .contains_key(&TypeId::of::<T>())
    }

    /// Fetch the cached singleton of type `T`, if one was created while this
    /// context was active. The cache is local to this context instance:
    /// sibling and parent contexts never observe it.
    pub fn get_singleton<T: Any + Clone>(&self) -> Option<T> {
        self.inner
            .singletons
            .borrow()
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast_ref::<T>())
            .cloned()
    }

    pub fn set_singleton<T: Any>(&self, value: T) {
        trace!(singleton = std::any::type_name::<T>(), "caching singleton");
        self.inner
            .singletons
            .borrow_mut()
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Resolve an instance of `T` against this context.
    ///
    /// The context is pushed for the duration of the call, so it does not
    /// need to be entered first.
    pub fn get_instance<T: AutoInit>(&self) -> Result<T, InitError> {
        let _scope = self.enter();
        top_level(|resolver| resolver.resolve::<T>()).map(|(value, _)| value)
    }

    /// Resolve `T` through a registered provider, or fall back to the
    /// caller-supplied default. No construction is attempted.
    pub fn get_instance_or<T: AutoInit>(&self, default: T) -> Result<T, InitError> {
        match self.get_provider::<T>() {
            Some(provider) => Ok(provider.provide()),
            None => Ok(default),
        }
    }

    /// Resolve an instance of `T` and return the resolution record
    /// describing the dependency tree that was built along the way.
    ///
    /// The record is `None` when nothing was recursively constructed: scalar
    /// types, provider output and singleton cache hits.
    pub fn create_instance<T: AutoInit>(&self) -> Result<(T, Option<Resolution>), InitError> {
        let _scope = self.enter();
        top_level(|resolver| resolver.resolve::<T>())
    }

    /// Populate the declared attributes of an already-allocated value,
    /// leaving attributes that are observably set alone.
    pub fn init_instance<T: Schema>(&self, value: &mut T) -> Result<(), InitError> {
        let _scope = self.enter();
        top_level(|resolver| value.init_unset(resolver)).map(|(value, _)| value)
    }
}

/// Scope guard returned by [InitContext::enter].
pub struct ContextGuard {
    ctx: InitContext,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            {
                let top = stack
                    .last()
                    .expect("the context stack always holds the base context");
                assert!(
                    Rc::ptr_eq(&top.inner, &self.ctx.inner),
                    "contexts must be exited in reverse order of entry"
                );
            }
            stack.pop();
        });
    }
}
