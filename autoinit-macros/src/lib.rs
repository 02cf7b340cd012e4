//! Derive macro for the `autoinit` crate.
//!
//! `#[derive(AutoInit)]` reads a struct's field declarations, the explicit
//! schema that replaces runtime type-hint introspection. It classifies each
//! declared type syntactically, and generates the resolving constructor,
//! the attribute schema, a builder, and attribute-based `Display` and
//! `PartialEq` impls.

use proc_macro::TokenStream;

mod classify;
mod derive;

/// Derive auto-initialisation for a struct with named fields.
///
/// # Generated items
///
/// - `impl AutoInit`: constructs the struct by resolving every declared
///   field against the active context, guarded by the resolver's pending
///   set.
/// - `impl Schema`: the declared-attribute list and the operations driven
///   by it (attribute formatting, in-place population of unset fields).
/// - `{Name}Builder` with one setter per field; `build()` honours a
///   provider registered for the struct itself, then fills unsupplied
///   fields through the engine.
/// - `impl Display` rendering `<Name attr=…, attr=…>` over the declared
///   attributes, and an all-field `impl PartialEq`.
///
/// The plain struct literal stays available as the unmanaged escape hatch.
///
/// # Options
///
/// Struct level:
///
/// - `#[auto_init(singleton)]`: pin `Arc<Self>` resolution to the active
///   context's singleton cache.
/// - `#[auto_init(repr = false)]`: keep the user's own `Display`.
/// - `#[auto_init(eq = false)]`: keep the user's own `PartialEq`.
///
/// Field level:
///
/// - `#[auto_init(skip)]`: not a declared attribute: excluded from the
///   schema and from resolution, filled with its `Default`, still settable
///   through the builder.
/// - `#[auto_init(default)]` / `#[auto_init(default = expr)]`: declared
///   attribute with a default value; an explicit provider registered for
///   the field's type still overrides it.
/// - `#[auto_init(flatten)]`: splice an embedded base struct's declared
///   attributes at this position, base attributes before derived ones.
///
/// # Example
///
/// ```ignore
/// use autoinit::AutoInit;
///
/// #[derive(AutoInit, Debug)]
/// struct Point {
///     x: i64,
///     y: i64,
///     #[auto_init(skip)]
///     label: Option<String>,
/// }
///
/// let p = Point::builder().x(1).y(2).build()?;
/// assert_eq!(p.to_string(), "<Point x=1, y=2>");
/// ```
#[proc_macro_derive(AutoInit, attributes(auto_init))]
pub fn derive_auto_init(input: TokenStream) -> TokenStream {
    derive::expand(input)
}
