//! Parsing of `#[odm(...)]` attributes.

use heck::{
    ToKebabCase, ToLowerCamelCase, ToShoutyKebabCase, ToShoutySnakeCase, ToSnakeCase,
    ToUpperCamelCase,
};
use proc_macro2::Span;
use syn::meta::ParseNestedMeta;
use syn::{Attribute, Ident, LitStr, Result};

const ATTRIBUTE: &str = "odm";

// ============================================================================
// Renaming
// ============================================================================

/// Case convention applied by `rename_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameRule {
    Lower,
    Upper,
    Pascal,
    Camel,
    Snake,
    ScreamingSnake,
    Kebab,
    ScreamingKebab,
}

impl RenameRule {
    fn parse(lit: &LitStr) -> Result<Self> {
        match lit.value().as_str() {
            "lowercase" => Ok(RenameRule::Lower),
            "UPPERCASE" => Ok(RenameRule::Upper),
            "PascalCase" => Ok(RenameRule::Pascal),
            "camelCase" => Ok(RenameRule::Camel),
            "snake_case" => Ok(RenameRule::Snake),
            "SCREAMING_SNAKE_CASE" => Ok(RenameRule::ScreamingSnake),
            "kebab-case" => Ok(RenameRule::Kebab),
            "SCREAMING-KEBAB-CASE" => Ok(RenameRule::ScreamingKebab),
            other => Err(syn::Error::new(
                lit.span(),
                format!("unknown rename_all rule '{}'", other),
            )),
        }
    }

    pub fn apply(&self, name: &str) -> String {
        match self {
            RenameRule::Lower => name.to_lowercase(),
            RenameRule::Upper => name.to_uppercase(),
            RenameRule::Pascal => name.to_upper_camel_case(),
            RenameRule::Camel => name.to_lower_camel_case(),
            RenameRule::Snake => name.to_snake_case(),
            RenameRule::ScreamingSnake => name.to_shouty_snake_case(),
            RenameRule::Kebab => name.to_kebab_case(),
            RenameRule::ScreamingKebab => name.to_shouty_kebab_case(),
        }
    }
}

// ============================================================================
// Container attributes
// ============================================================================

/// Index options shared by field and compound declarations.
#[derive(Debug, Default, Clone)]
pub struct IndexOptionAttrs {
    pub name: Option<String>,
    pub unique: bool,
    pub sparse: bool,
    pub background: bool,
    pub drop_dups: bool,
}

impl IndexOptionAttrs {
    /// Consumes an option key; returns false if `meta` is not one.
    fn parse_option(&mut self, meta: &ParseNestedMeta<'_>) -> Result<bool> {
        if meta.path.is_ident("name") {
            self.name = Some(string_value(meta)?.value());
        } else if meta.path.is_ident("unique") {
            self.unique = true;
        } else if meta.path.is_ident("sparse") {
            self.sparse = true;
        } else if meta.path.is_ident("background") {
            self.background = true;
        } else if meta.path.is_ident("drop_dups") {
            self.drop_dups = true;
        } else {
            return Ok(false);
        }
        Ok(true)
    }
}

#[derive(Debug)]
pub struct CompoundIndexAttr {
    pub keys: Vec<String>,
    pub options: IndexOptionAttrs,
}

#[derive(Debug)]
pub struct TriggerAttr {
    pub action: Ident,
    pub phase: Ident,
    pub method: Ident,
}

#[derive(Debug, Default)]
pub struct ContainerAttrs {
    pub collection: Option<String>,
    pub rename_all: Option<RenameRule>,
    pub no_default: bool,
    pub compound_indexes: Vec<CompoundIndexAttr>,
    pub triggers: Vec<TriggerAttr>,
}

impl ContainerAttrs {
    pub fn parse(attrs: &[Attribute]) -> Result<Self> {
        let mut out = ContainerAttrs::default();
        for attr in odm_attributes(attrs) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("collection") {
                    out.collection = Some(string_value(&meta)?.value());
                } else if meta.path.is_ident("rename_all") {
                    out.rename_all = Some(RenameRule::parse(&string_value(&meta)?)?);
                } else if meta.path.is_ident("no_default") {
                    out.no_default = true;
                } else if meta.path.is_ident("compound_index") {
                    out.compound_indexes.push(parse_compound_index(&meta)?);
                } else if meta.path.is_ident("trigger") {
                    out.triggers.push(parse_trigger(&meta)?);
                } else {
                    return Err(meta.error("unknown odm container attribute"));
                }
                Ok(())
            })?;
        }
        Ok(out)
    }
}

fn parse_compound_index(meta: &ParseNestedMeta<'_>) -> Result<CompoundIndexAttr> {
    let mut keys = None;
    let mut options = IndexOptionAttrs::default();
    meta.parse_nested_meta(|inner| {
        if inner.path.is_ident("keys") {
            let lit = string_value(&inner)?;
            let parsed: Vec<String> = lit
                .value()
                .split(',')
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty())
                .collect();
            if parsed.is_empty() {
                return Err(syn::Error::new(lit.span(), "compound index needs at least one key"));
            }
            keys = Some(parsed);
            Ok(())
        } else if options.parse_option(&inner)? {
            Ok(())
        } else {
            Err(inner.error("unknown compound_index option"))
        }
    })?;
    let keys = keys.ok_or_else(|| meta.error("compound_index requires `keys = \"...\"`"))?;
    Ok(CompoundIndexAttr { keys, options })
}

fn parse_trigger(meta: &ParseNestedMeta<'_>) -> Result<TriggerAttr> {
    let mut action = None;
    let mut phase = None;
    let mut method = None;
    meta.parse_nested_meta(|inner| {
        let lit = string_value(&inner)?;
        if inner.path.is_ident("action") {
            let variant = match lit.value().as_str() {
                "insert" => "Insert",
                "update" => "Update",
                "delete" => "Delete",
                "load" => "Load",
                other => {
                    return Err(syn::Error::new(
                        lit.span(),
                        format!("unknown trigger action '{}'", other),
                    ));
                }
            };
            action = Some(Ident::new(variant, lit.span()));
        } else if inner.path.is_ident("phase") {
            let variant = match lit.value().as_str() {
                "pre" => "Pre",
                "post" => "Post",
                other => {
                    return Err(syn::Error::new(
                        lit.span(),
                        format!("unknown trigger phase '{}'", other),
                    ));
                }
            };
            phase = Some(Ident::new(variant, lit.span()));
        } else if inner.path.is_ident("method") {
            method = Some(lit.parse::<Ident>()?);
        } else {
            return Err(inner.error("unknown trigger option"));
        }
        Ok(())
    })?;
    Ok(TriggerAttr {
        action: action.ok_or_else(|| meta.error("trigger requires `action`"))?,
        phase: phase.ok_or_else(|| meta.error("trigger requires `phase`"))?,
        method: method.ok_or_else(|| meta.error("trigger requires `method`"))?,
    })
}

// ============================================================================
// Field attributes
// ============================================================================

#[derive(Debug, Default)]
pub struct IdAttr {
    pub auto_increment: bool,
    pub generator: Option<String>,
}

#[derive(Debug)]
pub struct GeneratedAttr {
    pub generator: String,
    pub update: bool,
}

#[derive(Debug, Default)]
pub struct IndexAttr {
    /// Suffix form of the key kind: `1`, `-1`, `2d`, `2dsphere`, `text`, `hashed`.
    pub kind: Option<String>,
    pub options: IndexOptionAttrs,
}

#[derive(Debug, Default)]
pub struct FieldAttrs {
    pub id: Option<IdAttr>,
    pub generated: Option<GeneratedAttr>,
    pub reference: bool,
    pub embedded: bool,
    pub index: Option<IndexAttr>,
    pub rename: Option<String>,
    pub skip: bool,
}

impl FieldAttrs {
    pub fn parse(attrs: &[Attribute]) -> Result<Self> {
        let mut out = FieldAttrs::default();
        for attr in odm_attributes(attrs) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("id") {
                    out.id = Some(parse_id(&meta)?);
                } else if meta.path.is_ident("generated") {
                    out.generated = Some(parse_generated(&meta)?);
                } else if meta.path.is_ident("reference") {
                    out.reference = true;
                } else if meta.path.is_ident("embedded") {
                    out.embedded = true;
                } else if meta.path.is_ident("index") {
                    out.index = Some(parse_index(&meta)?);
                } else if meta.path.is_ident("rename") {
                    out.rename = Some(string_value(&meta)?.value());
                } else if meta.path.is_ident("skip") {
                    out.skip = true;
                } else {
                    return Err(meta.error("unknown odm field attribute"));
                }
                Ok(())
            })?;
        }
        Ok(out)
    }
}

fn parse_id(meta: &ParseNestedMeta<'_>) -> Result<IdAttr> {
    let mut id = IdAttr::default();
    if !has_arguments(meta) {
        return Ok(id);
    }
    meta.parse_nested_meta(|inner| {
        if inner.path.is_ident("auto_increment") {
            id.auto_increment = true;
        } else if inner.path.is_ident("generator") {
            id.generator = Some(string_value(&inner)?.value());
        } else {
            return Err(inner.error("unknown id option"));
        }
        Ok(())
    })?;
    Ok(id)
}

fn parse_generated(meta: &ParseNestedMeta<'_>) -> Result<GeneratedAttr> {
    let mut generated = GeneratedAttr {
        generator: "sequence".to_string(),
        update: false,
    };
    if !has_arguments(meta) {
        return Ok(generated);
    }
    meta.parse_nested_meta(|inner| {
        if inner.path.is_ident("generator") {
            generated.generator = string_value(&inner)?.value();
        } else if inner.path.is_ident("update") {
            generated.update = true;
        } else {
            return Err(inner.error("unknown generated option"));
        }
        Ok(())
    })?;
    Ok(generated)
}

fn parse_index(meta: &ParseNestedMeta<'_>) -> Result<IndexAttr> {
    let mut index = IndexAttr::default();
    if !has_arguments(meta) {
        return Ok(index);
    }
    meta.parse_nested_meta(|inner| {
        if inner.path.is_ident("order") {
            let lit = string_value(&inner)?;
            let suffix = match lit.value().as_str() {
                "asc" | "1" => "1",
                "desc" | "-1" => "-1",
                other => {
                    return Err(syn::Error::new(
                        lit.span(),
                        format!("unknown index order '{}', expected asc or desc", other),
                    ));
                }
            };
            index.kind = Some(suffix.to_string());
        } else if inner.path.is_ident("kind") {
            let lit = string_value(&inner)?;
            match lit.value().as_str() {
                "2d" | "2dsphere" | "text" | "hashed" => index.kind = Some(lit.value()),
                other => {
                    return Err(syn::Error::new(
                        lit.span(),
                        format!("unknown index kind '{}'", other),
                    ));
                }
            }
        } else if !index.options.parse_option(&inner)? {
            return Err(inner.error("unknown index option"));
        }
        Ok(())
    })?;
    Ok(index)
}

// ============================================================================
// Variant attributes
// ============================================================================

#[derive(Debug, Default)]
pub struct VariantAttrs {
    pub rename: Option<String>,
}

impl VariantAttrs {
    pub fn parse(attrs: &[Attribute]) -> Result<Self> {
        let mut out = VariantAttrs::default();
        for attr in odm_attributes(attrs) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("rename") {
                    out.rename = Some(string_value(&meta)?.value());
                    Ok(())
                } else {
                    Err(meta.error("unknown odm variant attribute"))
                }
            })?;
        }
        Ok(out)
    }
}

/// Reads only `rename_all` from an enum's container attributes.
pub fn enum_rename_rule(attrs: &[Attribute]) -> Result<Option<RenameRule>> {
    let mut rule = None;
    for attr in odm_attributes(attrs) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename_all") {
                rule = Some(RenameRule::parse(&string_value(&meta)?)?);
                Ok(())
            } else {
                Err(meta.error("unknown odm enum attribute"))
            }
        })?;
    }
    Ok(rule)
}

// ============================================================================
// Helpers
// ============================================================================

fn odm_attributes(attrs: &[Attribute]) -> impl Iterator<Item = &Attribute> {
    attrs.iter().filter(|attr| attr.path().is_ident(ATTRIBUTE))
}

fn string_value(meta: &ParseNestedMeta<'_>) -> Result<LitStr> {
    meta.value()?.parse::<LitStr>()
}

fn has_arguments(meta: &ParseNestedMeta<'_>) -> bool {
    meta.input.peek(syn::token::Paren)
}

pub fn error(span: Span, message: impl std::fmt::Display) -> syn::Error {
    syn::Error::new(span, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_rename_rules() {
        assert_eq!(RenameRule::Camel.apply("first_name"), "firstName");
        assert_eq!(RenameRule::Pascal.apply("first_name"), "FirstName");
        assert_eq!(RenameRule::Kebab.apply("first_name"), "first-name");
        assert_eq!(RenameRule::ScreamingSnake.apply("Admin"), "ADMIN");
        assert_eq!(RenameRule::Snake.apply("PendingReview"), "pending_review");
        assert_eq!(RenameRule::Lower.apply("Admin"), "admin");
    }

    #[test]
    fn test_container_attrs() {
        let attrs: Vec<Attribute> = vec![
            parse_quote!(#[odm(collection = "users", rename_all = "camelCase")]),
            parse_quote!(#[odm(compound_index(name = "by_name", keys = "last_1, first_-1", unique))]),
            parse_quote!(#[odm(trigger(action = "insert", phase = "pre", method = "stamp"))]),
            parse_quote!(#[derive(Debug)]),
        ];
        let parsed = ContainerAttrs::parse(&attrs).unwrap();
        assert_eq!(parsed.collection.as_deref(), Some("users"));
        assert_eq!(parsed.rename_all, Some(RenameRule::Camel));
        assert_eq!(parsed.compound_indexes[0].keys, vec!["last_1", "first_-1"]);
        assert!(parsed.compound_indexes[0].options.unique);
        assert_eq!(parsed.compound_indexes[0].options.name.as_deref(), Some("by_name"));
        assert_eq!(parsed.triggers[0].action.to_string(), "Insert");
        assert_eq!(parsed.triggers[0].method.to_string(), "stamp");
    }

    #[test]
    fn test_field_attrs() {
        let attrs: Vec<Attribute> = vec![parse_quote!(
            #[odm(id(auto_increment, generator = "sequence"), index(order = "desc", sparse))]
        )];
        let parsed = FieldAttrs::parse(&attrs).unwrap();
        let id = parsed.id.unwrap();
        assert!(id.auto_increment);
        assert_eq!(id.generator.as_deref(), Some("sequence"));
        let index = parsed.index.unwrap();
        assert_eq!(index.kind.as_deref(), Some("-1"));
        assert!(index.options.sparse);

        let bare: Vec<Attribute> = vec![parse_quote!(#[odm(id, generated, index)])];
        let parsed = FieldAttrs::parse(&bare).unwrap();
        assert!(!parsed.id.unwrap().auto_increment);
        assert_eq!(parsed.generated.unwrap().generator, "sequence");
        assert!(parsed.index.unwrap().kind.is_none());
    }

    #[test]
    fn test_unknown_attribute_rejected() {
        let attrs: Vec<Attribute> = vec![parse_quote!(#[odm(primary)])];
        assert!(FieldAttrs::parse(&attrs).is_err());

        let attrs: Vec<Attribute> = vec![parse_quote!(#[odm(index(kind = "spiral"))])];
        assert!(FieldAttrs::parse(&attrs).is_err());

        let attrs: Vec<Attribute> = vec![parse_quote!(#[odm(trigger(action = "insert"))])];
        assert!(ContainerAttrs::parse(&attrs).is_err());
    }
}
