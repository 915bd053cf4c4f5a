use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields};

use crate::attrs::{VariantAttrs, enum_rename_rule};

pub fn derive_enumerated(input: TokenStream) -> TokenStream {
    let input: DeriveInput = match syn::parse2(input) {
        Ok(input) => input,
        Err(err) => return err.to_compile_error(),
    };
    match expand(&input) {
        Ok(tokens) => tokens,
        Err(err) => err.to_compile_error(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream> {
    let ident = &input.ident;
    let Data::Enum(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            ident,
            "Enumerated can only be derived for enums",
        ));
    };
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Enumerated cannot be derived for generic enums",
        ));
    }

    if data.variants.is_empty() {
        return Err(syn::Error::new_spanned(
            ident,
            "Enumerated needs at least one variant",
        ));
    }

    let rule = enum_rename_rule(&input.attrs)?;
    let mut variants = Vec::with_capacity(data.variants.len());
    let mut names: Vec<String> = Vec::with_capacity(data.variants.len());
    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(syn::Error::new_spanned(
                variant,
                "Enumerated variants cannot carry data",
            ));
        }
        let attrs = VariantAttrs::parse(&variant.attrs)?;
        let declared = variant.ident.to_string();
        let name = match (attrs.rename, rule) {
            (Some(rename), _) => rename,
            (None, Some(rule)) => rule.apply(&declared),
            (None, None) => declared,
        };
        if names.contains(&name) {
            return Err(syn::Error::new_spanned(
                variant,
                format!("duplicate stored name '{}'", name),
            ));
        }
        names.push(name);
        variants.push(&variant.ident);
    }

    let enum_name = ident.to_string();
    let to_name = variants.iter().zip(&names).map(|(variant, name)| {
        quote! { #ident::#variant => #name, }
    });
    let from_name = variants.iter().zip(&names).map(|(variant, name)| {
        quote! { #name => ::core::option::Option::Some(#ident::#variant), }
    });

    Ok(quote! {
        impl ::helios_odm::model::Enumerated for #ident {
            const ENUM_NAME: &'static str = #enum_name;
            const VARIANTS: &'static [&'static str] = &[#(#names),*];

            fn name(&self) -> &'static str {
                match self {
                    #(#to_name)*
                }
            }

            fn from_name(name: &str) -> ::core::option::Option<Self> {
                match name {
                    #(#from_name)*
                    _ => ::core::option::Option::None,
                }
            }
        }

        impl ::helios_odm::model::Mapped for #ident {
            fn field_type() -> ::helios_odm::metadata::FieldType {
                ::helios_odm::metadata::FieldType::Enum(
                    <Self as ::helios_odm::model::Enumerated>::enum_type(),
                )
            }

            fn to_field_value(&self) -> ::helios_odm::model::FieldValue {
                ::helios_odm::model::FieldValue::Enum(
                    ::helios_odm::model::Enumerated::name(self).to_string(),
                )
            }

            fn from_field_value(
                value: ::helios_odm::model::FieldValue,
                field: &str,
            ) -> ::helios_odm::error::MappingResult<Self> {
                <Self as ::helios_odm::model::Enumerated>::from_enum_value(value, field)
            }
        }
    })
}
