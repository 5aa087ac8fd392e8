//! `#[derive(EnumFromStr)]` for field-less enums.
//!
//! Generates both the inherent `armutil::EnumFromStr` impl and a
//! `std::str::FromStr` impl so the derived type can be used with `.parse()`
//! as well as the explicit trait.

use proc_macro::TokenStream;
use quote::quote;

fn get_enum_variants(
    input: &syn::DeriveInput,
) -> &syn::punctuated::Punctuated<syn::Variant, syn::token::Comma> {
    let variants = match &input.data {
        syn::Data::Enum(enum_item) => &enum_item.variants,
        _ => panic!("EnumFromStr can only be derived for enums"),
    };

    assert!(
        variants.iter().all(|v| v.fields.is_empty()),
        "EnumFromStr requires all variants to be field-less"
    );

    variants
}

#[proc_macro_derive(EnumFromStr)]
pub fn enum_from_str_derive(input: TokenStream) -> TokenStream {
    let syn_item: syn::DeriveInput = syn::parse(input).unwrap();
    let name = &syn_item.ident;
    let name_str = name.to_string();
    let variants = get_enum_variants(&syn_item);
    let literals = variants.iter().map(|v| v.ident.to_string());
    let identifiers = variants.iter().map(|v| &v.ident);

    let expanded = quote! {
        impl ::armutil::EnumFromStr for #name {
            fn from_str(s: &str) -> Result<#name, ::armutil::ParseEnumError> {
                match s {
                    #( #literals => Ok(#name::#identifiers), )*
                    _ => Err(::armutil::ParseEnumError {
                        value: s.to_string(),
                        enum_name: #name_str,
                    }),
                }
            }
        }

        impl ::core::str::FromStr for #name {
            type Err = ::armutil::ParseEnumError;

            fn from_str(s: &str) -> Result<#name, ::armutil::ParseEnumError> {
                <#name as ::armutil::EnumFromStr>::from_str(s)
            }
        }
    };

    expanded.into()
}
