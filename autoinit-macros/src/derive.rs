//! Implementation of #[derive(AutoInit)].

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Expr, Fields, Field, Ident, Type};

use crate::classify::{classify, option_inner, FieldKind};

pub(crate) fn expand(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match try_expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

struct StructOptions {
    singleton: bool,
    repr: bool,
    eq: bool,
}

enum Disposition {
    /// Declared attribute, resolved through the engine.
    Plain,
    /// Declared `Option` of something the classifier cannot initialise;
    /// degrades to `None`.
    NullableOpaque,
    /// Declared attribute with a default; a provider still overrides it.
    Defaulted(Option<Expr>),
    /// Not a declared attribute at all; filled with its `Default`.
    Skip,
    /// Embedded base struct whose declared attributes are spliced in here.
    Flatten,
}

struct FieldPlan<'a> {
    ident: &'a Ident,
    ty: &'a Type,
    kind: FieldKind,
    disposition: Disposition,
}

fn struct_options(input: &DeriveInput) -> syn::Result<StructOptions> {
    let mut opts = StructOptions {
        singleton: false,
        repr: true,
        eq: true,
    };
    for attr in &input.attrs {
        if !attr.path().is_ident("auto_init") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("singleton") {
                opts.singleton = true;
                Ok(())
            } else if meta.path.is_ident("repr") {
                let lit: syn::LitBool = meta.value()?.parse()?;
                opts.repr = lit.value;
                Ok(())
            } else if meta.path.is_ident("eq") {
                let lit: syn::LitBool = meta.value()?.parse()?;
                opts.eq = lit.value;
                Ok(())
            } else {
                Err(meta.error("unsupported auto_init option"))
            }
        })?;
    }
    Ok(opts)
}

fn field_plan(field: &Field) -> syn::Result<FieldPlan<'_>> {
    let mut skip = false;
    let mut flatten = false;
    let mut default: Option<Option<Expr>> = None;
    for attr in &field.attrs {
        if !attr.path().is_ident("auto_init") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skip = true;
                Ok(())
            } else if meta.path.is_ident("flatten") {
                flatten = true;
                Ok(())
            } else if meta.path.is_ident("default") {
                if meta.input.peek(syn::Token![=]) {
                    default = Some(Some(meta.value()?.parse()?));
                } else {
                    default = Some(None);
                }
                Ok(())
            } else {
                Err(meta.error("unsupported auto_init option"))
            }
        })?;
    }
    if usize::from(skip) + usize::from(flatten) + usize::from(default.is_some()) > 1 {
        return Err(syn::Error::new_spanned(
            field,
            "skip, default and flatten are mutually exclusive",
        ));
    }

    let kind = classify(&field.ty);
    let disposition = if skip {
        Disposition::Skip
    } else if flatten {
        if kind != FieldKind::Custom {
            return Err(syn::Error::new_spanned(
                &field.ty,
                "flatten expects an embedded struct deriving AutoInit",
            ));
        }
        Disposition::Flatten
    } else if let Some(expr) = default {
        Disposition::Defaulted(expr)
    } else if kind == FieldKind::Opaque {
        return Err(syn::Error::new_spanned(
            &field.ty,
            "cannot auto-initialise a field of this type; \
             mark it #[auto_init(skip)] or #[auto_init(default = ...)]",
        ));
    } else if kind == FieldKind::Nullable
        && option_inner(&field.ty).map(classify) == Some(FieldKind::Opaque)
    {
        Disposition::NullableOpaque
    } else {
        Disposition::Plain
    };

    Ok(FieldPlan {
        ident: field.ident.as_ref().unwrap(),
        ty: &field.ty,
        kind,
        disposition,
    })
}

fn kind_tokens(kind: FieldKind) -> TokenStream2 {
    match kind {
        FieldKind::Scalar => quote!(::autoinit::AttrKind::Scalar),
        FieldKind::List => quote!(::autoinit::AttrKind::List),
        FieldKind::Map => quote!(::autoinit::AttrKind::Map),
        FieldKind::Set => quote!(::autoinit::AttrKind::Set),
        FieldKind::Nullable => quote!(::autoinit::AttrKind::Nullable),
        FieldKind::Shared => quote!(::autoinit::AttrKind::Shared),
        FieldKind::Boxed => quote!(::autoinit::AttrKind::Boxed),
        FieldKind::Custom => quote!(::autoinit::AttrKind::Custom),
        FieldKind::Opaque => quote!(::autoinit::AttrKind::Opaque),
    }
}

fn try_expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let fields: Vec<&Field> = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => named.named.iter().collect(),
            Fields::Unit => Vec::new(),
            Fields::Unnamed(_) => {
                return Err(syn::Error::new_spanned(
                    input,
                    "AutoInit can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "AutoInit can only be derived for structs",
            ));
        }
    };

    let opts = struct_options(input)?;
    let plans = fields
        .into_iter()
        .map(field_plan)
        .collect::<syn::Result<Vec<_>>>()?;

    let name = &input.ident;
    let vis = &input.vis;
    let name_str = name.to_string();
    let builder_ident = Ident::new(&format!("{name_str}Builder"), name.span());
    let generics = &input.generics;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let uses_resolver = plans.iter().any(|p| {
        matches!(
            p.disposition,
            Disposition::Plain | Disposition::Flatten | Disposition::Defaulted(_)
        )
    });
    let nest_param = if uses_resolver { quote!(r) } else { quote!(_r) };

    // -- AutoInit ---------------------------------------------------------

    let init_fields: Vec<TokenStream2> = plans
        .iter()
        .map(|p| {
            let ident = p.ident;
            match &p.disposition {
                Disposition::Plain | Disposition::Flatten => quote! { #ident: r.resolve()? },
                Disposition::NullableOpaque => quote! { #ident: ::std::option::Option::None },
                Disposition::Defaulted(Some(expr)) => {
                    quote! { #ident: r.resolve_or(|| #expr)? }
                }
                Disposition::Defaulted(None) => {
                    quote! { #ident: r.resolve_or(::std::default::Default::default)? }
                }
                Disposition::Skip => quote! { #ident: ::std::default::Default::default() },
            }
        })
        .collect();

    let singleton = opts.singleton;
    let auto_init_impl = quote! {
        impl #impl_generics ::autoinit::AutoInit for #name #ty_generics #where_clause {
            const SINGLETON: bool = #singleton;

            fn init(
                resolver: &mut ::autoinit::Resolver,
            ) -> ::std::result::Result<Self, ::autoinit::InitError> {
                resolver.nest::<Self, _>(|#nest_param| {
                    ::std::result::Result::Ok(Self { #(#init_fields,)* })
                })
            }
        }
    };

    // -- Schema -----------------------------------------------------------

    let attr_pushes: Vec<TokenStream2> = plans
        .iter()
        .filter_map(|p| {
            let ident_str = p.ident.to_string();
            match &p.disposition {
                Disposition::Skip => None,
                Disposition::Flatten => {
                    let ty = p.ty;
                    Some(quote! { specs.extend(<#ty as ::autoinit::Schema>::attrs()); })
                }
                _ => {
                    let kind = kind_tokens(p.kind);
                    Some(quote! {
                        specs.push(::autoinit::AttrSpec { name: #ident_str, kind: #kind });
                    })
                }
            }
        })
        .collect();
    let attrs_body = if attr_pushes.is_empty() {
        quote! { ::std::vec::Vec::new() }
    } else {
        quote! {
            let mut specs = ::std::vec::Vec::new();
            #(#attr_pushes)*
            specs
        }
    };

    // `write_attrs` backs the generated `Display` impl, which is itself
    // gated on `repr`. When `repr = false` the struct keeps no generated
    // repr, so the formatting statements (which would require every declared
    // field to be `Debug`) are omitted and the method body is left empty.
    let write_stmts: Vec<TokenStream2> = if opts.repr {
        plans
            .iter()
            .filter_map(|p| {
                let ident = p.ident;
                let ident_str = ident.to_string();
                match &p.disposition {
                    Disposition::Skip => None,
                    Disposition::Flatten => {
                        Some(quote! { ::autoinit::Schema::write_attrs(&self.#ident, f, first)?; })
                    }
                    _ => Some(quote! {
                        if *first {
                            ::std::write!(f, " ")?;
                            *first = false;
                        } else {
                            ::std::write!(f, ", ")?;
                        }
                        ::std::write!(f, "{}={:?}", #ident_str, self.#ident)?;
                    }),
                }
            })
            .collect()
    } else {
        Vec::new()
    };
    let (f_param, first_param) = if write_stmts.is_empty() {
        (quote!(_f), quote!(_first))
    } else {
        (quote!(f), quote!(first))
    };

    let unset_stmts: Vec<TokenStream2> = plans
        .iter()
        .filter_map(|p| {
            let ident = p.ident;
            let ty = p.ty;
            match &p.disposition {
                Disposition::Skip | Disposition::Defaulted(_) | Disposition::NullableOpaque => None,
                Disposition::Flatten => {
                    Some(quote! { ::autoinit::Schema::init_unset(&mut self.#ident, resolver)?; })
                }
                Disposition::Plain => match p.kind {
                    FieldKind::Scalar => Some(quote! {
                        if self.#ident == <#ty as ::std::default::Default>::default() {
                            self.#ident = resolver.resolve()?;
                        }
                    }),
                    FieldKind::List | FieldKind::Map | FieldKind::Set => Some(quote! {
                        if self.#ident.is_empty() {
                            self.#ident = resolver.resolve()?;
                        }
                    }),
                    FieldKind::Nullable => Some(quote! {
                        if self.#ident.is_none() {
                            self.#ident = resolver.resolve()?;
                        }
                    }),
                    FieldKind::Custom => Some(quote! {
                        ::autoinit::Schema::init_unset(&mut self.#ident, resolver)?;
                    }),
                    // Reference fields cannot be observably unset.
                    FieldKind::Shared | FieldKind::Boxed | FieldKind::Opaque => None,
                },
            }
        })
        .collect();
    let unset_param = if unset_stmts.is_empty() {
        quote!(_resolver)
    } else {
        quote!(resolver)
    };

    let schema_impl = quote! {
        impl #impl_generics ::autoinit::Schema for #name #ty_generics #where_clause {
            fn attrs() -> ::std::vec::Vec<::autoinit::AttrSpec> {
                #attrs_body
            }

            fn write_attrs(
                &self,
                #f_param: &mut ::std::fmt::Formatter<'_>,
                #first_param: &mut bool,
            ) -> ::std::fmt::Result {
                #(#write_stmts)*
                ::std::result::Result::Ok(())
            }

            fn init_unset(
                &mut self,
                #unset_param: &mut ::autoinit::Resolver,
            ) -> ::std::result::Result<(), ::autoinit::InitError> {
                #(#unset_stmts)*
                ::std::result::Result::Ok(())
            }
        }
    };

    // -- Builder ----------------------------------------------------------

    let builder_fields: Vec<TokenStream2> = plans
        .iter()
        .map(|p| {
            let ident = p.ident;
            let ty = p.ty;
            quote! { #ident: ::std::option::Option<#ty> }
        })
        .collect();
    let builder_defaults: Vec<TokenStream2> = plans
        .iter()
        .map(|p| {
            let ident = p.ident;
            quote! { #ident: ::std::option::Option::None }
        })
        .collect();
    let setters: Vec<TokenStream2> = plans
        .iter()
        .map(|p| {
            let ident = p.ident;
            let ty = p.ty;
            quote! {
                pub fn #ident(mut self, value: #ty) -> Self {
                    self.#ident = ::std::option::Option::Some(value);
                    self
                }
            }
        })
        .collect();
    let build_fields: Vec<TokenStream2> = plans
        .iter()
        .map(|p| {
            let ident = p.ident;
            let fallback = match &p.disposition {
                Disposition::Plain | Disposition::Flatten => quote! { r.resolve()? },
                Disposition::NullableOpaque => quote! { ::std::option::Option::None },
                Disposition::Defaulted(Some(expr)) => quote! { r.resolve_or(|| #expr)? },
                Disposition::Defaulted(None) => {
                    quote! { r.resolve_or(::std::default::Default::default)? }
                }
                Disposition::Skip => quote! { ::std::default::Default::default() },
            };
            quote! {
                #ident: match self.#ident {
                    ::std::option::Option::Some(value) => value,
                    ::std::option::Option::None => #fallback,
                }
            }
        })
        .collect();

    let builder_doc = format!(
        "Builder for [`{name_str}`]: unsupplied fields are auto-initialised on `build`."
    );
    let builder_def = quote! {
        #[doc = #builder_doc]
        #vis struct #builder_ident #generics #where_clause {
            #(#builder_fields,)*
        }

        impl #impl_generics ::std::default::Default for #builder_ident #ty_generics #where_clause {
            fn default() -> Self {
                Self { #(#builder_defaults,)* }
            }
        }

        #[allow(dead_code)]
        impl #impl_generics #name #ty_generics #where_clause {
            /// Start keyword-style construction; unsupplied fields are
            /// auto-initialised against the active context on `build`.
            pub fn builder() -> #builder_ident #ty_generics {
                ::std::default::Default::default()
            }
        }

        #[allow(dead_code)]
        impl #impl_generics #builder_ident #ty_generics #where_clause {
            #(#setters)*

            /// Construct the value. A provider registered for the target
            /// type in the active context wins outright; otherwise supplied
            /// fields are consumed and the rest resolve through the engine.
            pub fn build(
                self,
            ) -> ::std::result::Result<#name #ty_generics, ::autoinit::InitError> {
                ::autoinit::with_resolver(|r| {
                    if let ::std::option::Option::Some(ready) =
                        r.provided::<#name #ty_generics>()
                    {
                        return ::std::result::Result::Ok(ready);
                    }
                    r.nest::<#name #ty_generics, _>(|#nest_param| {
                        ::std::result::Result::Ok(#name { #(#build_fields,)* })
                    })
                })
            }
        }
    };

    // -- Display / PartialEq ----------------------------------------------

    let display_impl = opts.repr.then(|| {
        quote! {
            impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
                fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                    ::std::write!(f, "<{}", #name_str)?;
                    let mut first = true;
                    ::autoinit::Schema::write_attrs(self, f, &mut first)?;
                    ::std::write!(f, ">")
                }
            }
        }
    });

    let eq_impl = opts.eq.then(|| {
        let other_param = if plans.is_empty() {
            quote!(_other)
        } else {
            quote!(other)
        };
        let comparisons: Vec<TokenStream2> = plans
            .iter()
            .map(|p| {
                let ident = p.ident;
                quote! { && self.#ident == other.#ident }
            })
            .collect();
        quote! {
            impl #impl_generics ::std::cmp::PartialEq for #name #ty_generics #where_clause {
                fn eq(&self, #other_param: &Self) -> bool {
                    true #(#comparisons)*
                }
            }
        }
    });

    Ok(quote! {
        #auto_init_impl
        #schema_impl
        #builder_def
        #display_impl
        #eq_impl
    })
}
