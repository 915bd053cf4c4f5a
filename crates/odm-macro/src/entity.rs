use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::ext::IdentExt;
use syn::{Data, DeriveInput, Fields, Type};

use crate::attrs::{self, ContainerAttrs, FieldAttrs, IndexOptionAttrs};

pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input: DeriveInput = match syn::parse2(input) {
        Ok(input) => input,
        Err(err) => return err.to_compile_error(),
    };
    match expand(&input) {
        Ok(tokens) => tokens,
        Err(err) => err.to_compile_error(),
    }
}

/// One mapped (non-skipped) field.
struct MappedField {
    ident: syn::Ident,
    name: String,
    ty: Type,
    attrs: FieldAttrs,
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream> {
    let ident = &input.ident;
    if !input.generics.params.is_empty() {
        return Err(attrs::error(
            input.generics.params.first().map_or(ident.span(), |p| {
                syn::spanned::Spanned::span(p)
            }),
            "Entity cannot be derived for generic types",
        ));
    }

    let named = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "Entity can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                ident,
                "Entity can only be derived for structs with named fields",
            ));
        }
    };

    let container = ContainerAttrs::parse(&input.attrs)?;
    let mut fields = Vec::new();
    for field in named {
        let attrs = FieldAttrs::parse(&field.attrs)?;
        if attrs.skip {
            continue;
        }
        let Some(field_ident) = field.ident.clone() else {
            continue;
        };
        fields.push(MappedField {
            name: field_ident.unraw().to_string(),
            ident: field_ident,
            ty: field.ty.clone(),
            attrs,
        });
    }

    let type_name = ident.to_string();
    let object_impl = object_impl(ident, &type_name, &fields);
    let entity_impl = entity_impl(ident, &type_name, &container, &fields);
    let mapped_impl = mapped_impl(ident, &type_name);

    Ok(quote! {
        #object_impl
        #entity_impl
        #mapped_impl
    })
}

fn object_impl(ident: &syn::Ident, type_name: &str, fields: &[MappedField]) -> TokenStream {
    let get_arms = fields.iter().map(|field| {
        let name = &field.name;
        let member = &field.ident;
        quote! {
            #name => ::core::option::Option::Some(
                ::helios_odm::model::Mapped::to_field_value(&self.#member)
            ),
        }
    });
    let set_arms = fields.iter().map(|field| {
        let name = &field.name;
        let member = &field.ident;
        let ty = &field.ty;
        quote! {
            #name => {
                self.#member = <#ty as ::helios_odm::model::Mapped>::from_field_value(value, #name)?;
                ::core::result::Result::Ok(())
            }
        }
    });

    quote! {
        impl ::helios_odm::model::Object for #ident {
            fn type_ref(&self) -> ::helios_odm::metadata::TypeRef {
                ::helios_odm::metadata::TypeRef::of::<Self>()
            }

            fn get_field(&self, name: &str) -> ::core::option::Option<::helios_odm::model::FieldValue> {
                match name {
                    #(#get_arms)*
                    _ => ::core::option::Option::None,
                }
            }

            #[allow(unused_variables)]
            fn set_field(
                &mut self,
                name: &str,
                value: ::helios_odm::model::FieldValue,
            ) -> ::helios_odm::error::MappingResult<()> {
                match name {
                    #(#set_arms)*
                    _ => ::core::result::Result::Err(::helios_odm::error::MappingError::UnknownField {
                        type_name: #type_name.to_string(),
                        field: name.to_string(),
                    }),
                }
            }

            fn clone_object(&self) -> ::std::boxed::Box<dyn ::helios_odm::model::Object> {
                ::std::boxed::Box::new(::core::clone::Clone::clone(self))
            }

            fn as_any(&self) -> &dyn ::core::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::core::any::Any {
                self
            }

            fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn ::core::any::Any> {
                self
            }
        }
    }
}

fn entity_impl(
    ident: &syn::Ident,
    type_name: &str,
    container: &ContainerAttrs,
    fields: &[MappedField],
) -> TokenStream {
    let collection = container.collection.as_ref().map(|collection| {
        quote! { .with_collection(#collection) }
    });

    let field_decls = fields.iter().map(|field| field_descriptor(field, container));

    let compound_decls = container.compound_indexes.iter().map(|compound| {
        let keys = &compound.keys;
        let options = index_options(&compound.options);
        quote! {
            .with_compound_index(
                ::helios_odm::metadata::CompoundIndexTag::new([#(#keys),*]).with_options(#options)
            )
        }
    });

    let trigger_decls = container.triggers.iter().map(|trigger| {
        let action = &trigger.action;
        let phase = &trigger.phase;
        let method = &trigger.method;
        quote! {
            .with_trigger(
                ::helios_odm::metadata::TriggerAction::#action,
                ::helios_odm::metadata::TriggerPhase::#phase,
                |target: &mut dyn ::helios_odm::model::Object| {
                    if let ::core::option::Option::Some(this) =
                        ::helios_odm::model::Object::as_any_mut(target).downcast_mut::<#ident>()
                    {
                        this.#method();
                    }
                },
            )
        }
    });

    let factory = if container.no_default {
        quote! { ::core::option::Option::None }
    } else {
        quote! {
            ::core::option::Option::Some(|| {
                ::std::boxed::Box::new(<#ident as ::core::default::Default>::default())
                    as ::std::boxed::Box<dyn ::helios_odm::model::Object>
            })
        }
    };

    quote! {
        impl ::helios_odm::model::Entity for #ident {
            const TYPE_NAME: &'static str = #type_name;

            fn schema() -> ::helios_odm::metadata::EntitySchema {
                ::helios_odm::metadata::EntitySchema::new(#type_name)
                    #collection
                    #(#field_decls)*
                    #(#compound_decls)*
                    #(#trigger_decls)*
            }

            fn factory() -> ::core::option::Option<fn() -> ::std::boxed::Box<dyn ::helios_odm::model::Object>> {
                #factory
            }
        }
    }
}

fn field_descriptor(field: &MappedField, container: &ContainerAttrs) -> TokenStream {
    let name = &field.name;
    let ty = &field.ty;
    let attrs = &field.attrs;

    // The id key defaults to `_id`; rename_all never applies to it.
    let key = match (&attrs.rename, container.rename_all) {
        (Some(rename), _) => Some(rename.clone()),
        (None, Some(rule)) if attrs.id.is_none() => {
            Some(rule.apply(name)).filter(|renamed| renamed != name)
        }
        _ => None,
    };
    let key = key.map(|key| quote! { .with_key(#key) });

    let id = attrs.id.as_ref().map(|id| {
        let auto_increment = id.auto_increment;
        let generator = match &id.generator {
            Some(generator) => quote! { ::core::option::Option::Some(#generator.to_string()) },
            None => quote! { ::core::option::Option::None },
        };
        quote! {
            .with_id(::helios_odm::metadata::IdTag {
                auto_increment: #auto_increment,
                generator: #generator,
            })
        }
    });

    let generated = attrs.generated.as_ref().map(|generated| {
        let generator = &generated.generator;
        let update = generated.update;
        quote! {
            .with_generated(
                ::helios_odm::metadata::GeneratedTag::new(#generator).with_update(#update)
            )
        }
    });

    let reference = attrs.reference.then(|| quote! { .with_reference() });
    let embedded = attrs.embedded.then(|| quote! { .with_embedded() });

    let index = attrs.index.as_ref().map(|index| {
        let kind = index.kind.as_deref().unwrap_or("1");
        let kind = format_ident!("{}", index_kind_variant(kind));
        let options = index_options(&index.options);
        quote! {
            .with_index(::helios_odm::metadata::IndexTag {
                kind: ::helios_odm::metadata::IndexKind::#kind,
                options: #options,
            })
        }
    });

    quote! {
        .with_field(
            ::helios_odm::metadata::FieldDescriptor::of::<#ty>(#name)
                #key
                #id
                #generated
                #reference
                #embedded
                #index
        )
    }
}

fn index_kind_variant(suffix: &str) -> &'static str {
    match suffix {
        "-1" => "Descending",
        "2d" => "Geo2d",
        "2dsphere" => "Geo2dSphere",
        "text" => "Text",
        "hashed" => "Hashed",
        _ => "Ascending",
    }
}

fn index_options(options: &IndexOptionAttrs) -> TokenStream {
    let name = match &options.name {
        Some(name) => quote! { ::core::option::Option::Some(#name.to_string()) },
        None => quote! { ::core::option::Option::None },
    };
    let IndexOptionAttrs {
        unique,
        sparse,
        background,
        drop_dups,
        ..
    } = options;
    quote! {
        ::helios_odm::metadata::IndexOptions {
            name: #name,
            unique: #unique,
            sparse: #sparse,
            background: #background,
            drop_dups: #drop_dups,
        }
    }
}

fn mapped_impl(ident: &syn::Ident, type_name: &str) -> TokenStream {
    quote! {
        impl ::helios_odm::model::Mapped for #ident {
            fn field_type() -> ::helios_odm::metadata::FieldType {
                ::helios_odm::metadata::FieldType::Object(::helios_odm::metadata::TypeRef::of::<Self>())
            }

            fn to_field_value(&self) -> ::helios_odm::model::FieldValue {
                ::helios_odm::model::FieldValue::Object(::std::boxed::Box::new(
                    ::core::clone::Clone::clone(self),
                ))
            }

            fn from_field_value(
                value: ::helios_odm::model::FieldValue,
                field: &str,
            ) -> ::helios_odm::error::MappingResult<Self> {
                match value {
                    ::helios_odm::model::FieldValue::Object(object) => {
                        ::helios_odm::model::downcast_box::<Self>(object).map_err(|other| {
                            ::helios_odm::error::MappingError::type_mismatch(
                                field,
                                #type_name,
                                ::helios_odm::model::Object::type_ref(&*other).name(),
                            )
                        })
                    }
                    ::helios_odm::model::FieldValue::Null => {
                        ::core::result::Result::Err(::helios_odm::error::MappingError::NullToPrimitive {
                            field: field.to_string(),
                            field_type: #type_name.to_string(),
                        })
                    }
                    other => ::core::result::Result::Err(::helios_odm::error::MappingError::type_mismatch(
                        field,
                        #type_name,
                        other.kind_name(),
                    )),
                }
            }
        }
    }
}
