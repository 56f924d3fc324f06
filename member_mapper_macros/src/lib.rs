use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;

use darling::FromAttributes;
use quote::quote;
use syn::{
    parse::{Parse, ParseStream, Result as PResult},
    Token,
};

#[derive(Debug, darling::FromAttributes)]
#[darling(attributes(mapper))]
struct ShapeAttributes {
    #[darling(default)]
    capabilities: darling::util::PathList,
}

#[derive(Debug, darling::FromAttributes)]
#[darling(attributes(mapper))]
struct MemberAttributes {
    /// Readable, but never written by a mapping.
    #[darling(default)]
    readonly: bool,
    /// Not a member at all.
    #[darling(default)]
    skip: bool,
    #[darling(default)]
    rename: Option<String>,
    /// The field holds the base value this type is a proxy for.
    #[darling(default)]
    proxy_of: bool,
}

struct ShapeMember {
    ident: syn::Ident,
    name: String,
    ty: syn::Type,
    readonly: bool,
}

struct ShapeStruct {
    name: syn::Ident,
    capabilities: Vec<syn::Path>,
    members: Vec<ShapeMember>,
    proxy_of: Option<syn::Ident>,
}

fn darling_error(e: darling::Error) -> syn::Error {
    syn::Error::new(proc_macro2::Span::call_site(), e.to_string())
}

fn parse_struct(input: &syn::DeriveInput) -> PResult<ShapeStruct> {
    let name = &input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Shape can't be derived for generic types",
        ));
    }

    let fields = match &input.data {
        syn::Data::Struct(s) => match &s.fields {
            syn::Fields::Named(f) => &f.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    name,
                    "Shape can only be derived for structs with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                name,
                "Shape can only be derived for structs",
            ))
        }
    };

    let parsed = ShapeAttributes::from_attributes(&input.attrs).map_err(darling_error)?;

    let mut members = vec![];
    let mut proxy_of = None;

    for field in fields.iter() {
        let attrs = MemberAttributes::from_attributes(&field.attrs).map_err(darling_error)?;
        // Named fields always have an ident.
        let ident = match &field.ident {
            Some(i) => i.clone(),
            None => continue,
        };

        if attrs.proxy_of {
            if proxy_of.is_some() {
                return Err(syn::Error::new_spanned(
                    &ident,
                    "only one field may be marked proxy_of",
                ));
            }
            proxy_of = Some(ident);
            continue;
        }

        if attrs.skip {
            continue;
        }

        let member_name = attrs.rename.unwrap_or_else(|| ident.to_string());
        if members.iter().any(|m: &ShapeMember| m.name == member_name) {
            return Err(syn::Error::new_spanned(
                &ident,
                format!("duplicate member name `{}`", member_name),
            ));
        }

        members.push(ShapeMember {
            ident,
            name: member_name,
            ty: field.ty.clone(),
            readonly: attrs.readonly,
        });
    }

    Ok(ShapeStruct {
        name: name.clone(),
        capabilities: parsed.capabilities.iter().cloned().collect(),
        members,
        proxy_of,
    })
}

/// Build the entries of `Shape::members`.
///
/// Readers clone the field.  Writers downcast the incoming value and hand it back on a type mismatch.
fn build_members(shape: &ShapeStruct) -> Vec<TokenStream2> {
    shape
        .members
        .iter()
        .map(|m| {
            let ShapeMember {
                ref ident,
                ref name,
                ref ty,
                readonly,
            } = *m;

            let write = if readonly {
                quote!(::core::option::Option::None)
            } else {
                quote!(::core::option::Option::Some(
                    (|destination: &mut Self, value: ::member_mapper_internals::Value|
                        -> ::core::result::Result<(), ::member_mapper_internals::Value> {
                        value
                            .downcast::<#ty>()
                            .map(|value| destination.#ident = *value)
                    }) as ::member_mapper_internals::Writer<Self>
                ))
            };

            quote!(::member_mapper_internals::Member::<Self> {
                name: #name,
                value_type: ::member_mapper_internals::ShapeId::of::<#ty>(),
                read: ::core::option::Option::Some(
                    (|source: &Self| -> ::member_mapper_internals::Value {
                        ::std::boxed::Box::new(::core::clone::Clone::clone(&source.#ident))
                    }) as ::member_mapper_internals::Reader<Self>
                ),
                write: #write,
            })
        })
        .collect()
}

/// Build the capability table, initialized on first use.
///
/// Every capability gets a non-capturing caster function which downcasts to the concrete type and then unsizes to the
/// trait object.  These coerce to `Caster<dyn Trait>` function pointers.
fn build_capabilities(shape: &ShapeStruct) -> TokenStream2 {
    let name = &shape.name;
    let casters = shape.capabilities.iter().enumerate().map(|(i, path)| {
        let fname = quote::format_ident!("cast_capability_{}", i);
        quote!({
            fn #fname(
                value: &dyn ::core::any::Any,
            ) -> ::core::option::Option<&(dyn #path + 'static)> {
                value
                    .downcast_ref::<#name>()
                    .map(|v| v as &(dyn #path + 'static))
            }
            ::member_mapper_internals::Capability::new::<dyn #path>(#fname)
        })
    });

    quote!({
        static CAPABILITIES: ::std::sync::OnceLock<::std::vec::Vec<::member_mapper_internals::Capability>> =
            ::std::sync::OnceLock::new();
        CAPABILITIES.get_or_init(|| ::std::vec![#(#casters),*])
    })
}

fn build_proxy_target(shape: &ShapeStruct) -> TokenStream2 {
    match &shape.proxy_of {
        Some(field) => quote!(
            fn proxy_target(&self) -> ::core::option::Option<&dyn ::member_mapper_internals::Mappable> {
                ::core::option::Option::Some(&self.#field as &dyn ::member_mapper_internals::Mappable)
            }
        ),
        None => quote!(),
    }
}

fn expand_shape(input: &syn::DeriveInput) -> PResult<TokenStream2> {
    let shape = parse_struct(input)?;
    let name = &shape.name;
    let members = build_members(&shape);
    let capabilities = build_capabilities(&shape);
    let proxy_target = build_proxy_target(&shape);

    Ok(quote!(
        impl ::member_mapper_internals::Shape for #name {
            fn members() -> ::std::vec::Vec<::member_mapper_internals::Member<Self>> {
                ::std::vec![#(#members),*]
            }
        }

        impl ::member_mapper_internals::Mappable for #name {
            fn shape_id(&self) -> ::member_mapper_internals::ShapeId {
                ::member_mapper_internals::ShapeId::of::<Self>()
            }

            fn as_any(&self) -> &dyn ::core::any::Any {
                self
            }

            fn capabilities(&self) -> &'static [::member_mapper_internals::Capability] {
                #capabilities
            }

            #proxy_target
        }

        impl ::member_mapper_internals::SourceView for #name {
            fn view(
                source: &dyn ::member_mapper_internals::Mappable,
            ) -> ::core::option::Option<&Self> {
                source.as_any().downcast_ref::<Self>()
            }
        }
    ))
}

/// Derive `Shape`, `Mappable` and `SourceView` for a struct with named fields.
///
/// Every field type must be `Clone`.  Supported attributes:
///
/// - `#[mapper(capabilities(TraitA, TraitB))]` on the struct: traits this type can be mapped as, in priority order.
/// - `#[mapper(readonly)]` on a field: the field is never written by a mapping.
/// - `#[mapper(skip)]` on a field: the field isn't a member.
/// - `#[mapper(rename = "name")]` on a field: use a different member name.
/// - `#[mapper(proxy_of)]` on a field: this type is a proxy for the value in that field.
#[proc_macro_derive(Shape, attributes(mapper))]
pub fn derive_shape(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);
    match expand_shape(&input) {
        Ok(t) => t.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

struct CapabilityMember {
    name: syn::Ident,
    ty: syn::Type,
    method: syn::Ident,
}

struct CapabilityDecl {
    path: syn::Path,
    members: Vec<CapabilityMember>,
}

impl Parse for CapabilityMember {
    fn parse(stream: ParseStream) -> PResult<Self> {
        let name: syn::Ident = stream.parse()?;
        stream.parse::<Token![:]>()?;
        let ty: syn::Type = stream.parse()?;

        let mut method = name.clone();
        if stream.peek(Token![=]) {
            stream.parse::<Token![=]>()?;
            method = stream.parse()?;
        }

        Ok(CapabilityMember { name, ty, method })
    }
}

impl Parse for CapabilityDecl {
    fn parse(stream: ParseStream) -> PResult<Self> {
        let path = stream.parse()?;

        let inner;
        syn::braced!(inner in stream);

        let members = syn::punctuated::Punctuated::<CapabilityMember, Token![,]>::parse_terminated(&inner)?
            .into_iter()
            .collect();

        Ok(CapabilityDecl { path, members })
    }
}

fn build_capability(decl: &CapabilityDecl) -> TokenStream2 {
    let path = &decl.path;
    let members = decl.members.iter().map(|m| {
        let name = m.name.to_string();
        let ty = &m.ty;
        let method = &m.method;
        quote!(::member_mapper_internals::Member::<Self> {
            name: #name,
            value_type: ::member_mapper_internals::ShapeId::of::<#ty>(),
            read: ::core::option::Option::Some(
                (|source: &Self| -> ::member_mapper_internals::Value {
                    let value: #ty = source.#method();
                    ::std::boxed::Box::new(value)
                }) as ::member_mapper_internals::Reader<Self>
            ),
            write: ::core::option::Option::None,
        })
    });

    quote!(
        impl ::member_mapper_internals::Shape for dyn #path {
            fn members() -> ::std::vec::Vec<::member_mapper_internals::Member<Self>> {
                ::std::vec![#(#members),*]
            }
        }

        impl ::member_mapper_internals::SourceView for dyn #path {
            fn view(
                source: &dyn ::member_mapper_internals::Mappable,
            ) -> ::core::option::Option<&Self> {
                ::member_mapper_internals::view_capability::<Self>(source)
            }
        }
    )
}

/// Declare a trait as a capability which mappings can use as their source.
///
/// Members are read through trait methods and are never writable.  The method defaults to the member name:
///
/// ```ignore
/// decl_capability! {
///     Named {
///         name: String,
///         label: String = display_label,
///     }
/// }
/// ```
#[proc_macro]
pub fn decl_capability(input: TokenStream) -> TokenStream {
    let decl = syn::parse_macro_input!(input as CapabilityDecl);
    build_capability(&decl).into()
}
