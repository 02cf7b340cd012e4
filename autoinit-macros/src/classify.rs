//! Syntactic classification of declared field types.
//!
//! Classification looks at the rendered form of the declared type only
//! (the last path segment), never at trait bounds or the types behind
//! aliases. A type that merely looks like `Vec` classifies as a list. This
//! mirrors how a dynamic runtime would classify the textual form of a type
//! hint, and its imprecision is accepted.

use syn::{GenericArgument, PathArguments, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldKind {
    Scalar,
    List,
    Map,
    Set,
    Nullable,
    Shared,
    Boxed,
    Custom,
    Opaque,
}

pub(crate) fn classify(ty: &Type) -> FieldKind {
    let Type::Path(type_path) = ty else {
        // Tuples, references, pointers, closures, trait objects outside
        // `Arc`: nothing we know how to initialise.
        return FieldKind::Opaque;
    };
    if type_path.qself.is_some() {
        return FieldKind::Custom;
    }
    let Some(segment) = type_path.path.segments.last() else {
        return FieldKind::Opaque;
    };
    match segment.ident.to_string().as_str() {
        "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16" | "u32" | "u64"
        | "u128" | "usize" | "f32" | "f64" | "bool" | "char" | "String" => FieldKind::Scalar,
        "Vec" | "VecDeque" => FieldKind::List,
        "HashMap" | "BTreeMap" => FieldKind::Map,
        "HashSet" | "BTreeSet" => FieldKind::Set,
        "Option" => FieldKind::Nullable,
        "Arc" => FieldKind::Shared,
        "Box" => FieldKind::Boxed,
        _ => FieldKind::Custom,
    }
}

/// The `T` of an `Option<T>` declaration, if that is what `ty` is.
pub(crate) fn option_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first() {
        Some(GenericArgument::Type(inner)) if args.args.len() == 1 => Some(inner),
        _ => None,
    }
}
