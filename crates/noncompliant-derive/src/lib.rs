//! Provides derive macros for `nc::HasDependencies`.
use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{Data, DataEnum, DataStruct, DeriveInput, Field, Fields};

/// Returns true if the field is marked `#[nc(skip)]`.
fn is_skipped(field: &Field) -> syn::Result<bool> {
    let mut skip = false;
    for att in field.attrs.iter() {
        if att.path().is_ident("nc") {
            att.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    skip = true;
                    Ok(())
                } else {
                    Err(meta.error(format!(
                        "unsupported field attribute {:?} - must be 'skip'",
                        meta.path
                            .get_ident()
                            .map(|id| id.to_string())
                            .unwrap_or("unknown".to_string())
                    )))
                }
            })?;
        }
    }
    Ok(skip)
}

/// Bindings for every field of `fields`, and the ones that carry dependencies.
///
/// Named fields bind to their own name, tuple fields to `field_<index>`.
fn bind_fields(fields: &Fields) -> syn::Result<(Vec<syn::Ident>, Vec<syn::Ident>)> {
    let mut all = vec![];
    let mut merged = vec![];
    for (i, field) in fields.iter().enumerate() {
        let binding = field
            .ident
            .clone()
            .unwrap_or_else(|| format_ident!("field_{i}"));
        if !is_skipped(field)? {
            merged.push(binding.clone());
        }
        all.push(binding);
    }
    Ok((all, merged))
}

fn struct_body(data: &DataStruct) -> syn::Result<TokenStream> {
    let members: Vec<syn::Member> = data
        .fields
        .iter()
        .enumerate()
        .map(|(i, field)| match &field.ident {
            Some(ident) => syn::Member::Named(ident.clone()),
            None => syn::Member::Unnamed(syn::Index::from(i)),
        })
        .collect();
    let mut merged = vec![];
    for (field, member) in data.fields.iter().zip(members) {
        if !is_skipped(field)? {
            merged.push(member);
        }
    }
    Ok(quote! {
        nc::Dependencies::default()
            #(.merge(nc::HasDependencies::dependencies(&self.#merged)))*
    })
}

fn enum_body(data: &DataEnum) -> syn::Result<TokenStream> {
    let mut arms = vec![];
    for variant in data.variants.iter() {
        let name = &variant.ident;
        let (all, merged) = bind_fields(&variant.fields)?;
        let pattern = match &variant.fields {
            Fields::Named(_) => quote! { Self::#name { #(#all),* } },
            Fields::Unnamed(_) => quote! { Self::#name ( #(#all),* ) },
            Fields::Unit => quote! { Self::#name },
        };
        arms.push(quote! {
            #[allow(unused_variables)]
            #pattern => nc::Dependencies::default()
                #(.merge(nc::HasDependencies::dependencies(#merged)))*
        });
    }
    if arms.is_empty() {
        return Ok(quote! { nc::Dependencies::default() });
    }
    Ok(quote! {
        match self {
            #(#arms),*
        }
    })
}

/// Derives `nc::HasDependencies` by merging the dependencies of every field.
///
/// Works on structs and enums. Fields whose type does not carry
/// dependencies and does not implement the trait can be excluded with
/// `#[nc(skip)]`.
#[proc_macro_derive(HasDependencies, attributes(nc))]
pub fn derive_has_dependencies(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input: DeriveInput = syn::parse_macro_input!(input);
    let name = &input.ident;
    let body = match &input.data {
        Data::Struct(data) => struct_body(data),
        Data::Enum(data) => enum_body(data),
        Data::Union(_) => Err(syn::Error::new(
            input.ident.span(),
            "deriving HasDependencies is not supported for unions",
        )),
    };
    let body = match body {
        Ok(body) => body,
        Err(e) => return e.into_compile_error().into(),
    };
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let output = quote! {
        impl #impl_generics nc::HasDependencies for #name #ty_generics #where_clause {
            fn dependencies(&self) -> nc::Dependencies {
                #body
            }
        }
    };
    output.into()
}
