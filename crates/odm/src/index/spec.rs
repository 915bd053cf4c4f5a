use bson::Document;

use crate::error::{MappingError, MappingResult};
use crate::metadata::{EntityMetadata, IndexKind, IndexOptions};
use crate::store::default_index_name;

/// One entry of an index key: a document key and its direction or type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKey {
    /// Document key, possibly a dotted path.
    pub field: String,
    /// Direction or special index type.
    pub kind: IndexKind,
}

impl IndexKey {
    pub fn new(field: impl Into<String>, kind: IndexKind) -> Self {
        Self {
            field: field.into(),
            kind,
        }
    }
}

/// A store-level index derived from entity metadata.
///
/// Recomputed on every derivation; never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    name: String,
    keys: Vec<IndexKey>,
    options: IndexOptions,
}

impl IndexSpec {
    /// Creates a spec; the name defaults to the conventional name of `keys`.
    pub fn new(keys: Vec<IndexKey>, mut options: IndexOptions) -> Self {
        let name = match options.name.clone() {
            Some(name) => name,
            None => default_index_name(&keys_document(&keys)),
        };
        options.name = Some(name.clone());
        Self {
            name,
            keys,
            options,
        }
    }

    /// Index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key entries in index order.
    pub fn keys(&self) -> &[IndexKey] {
        &self.keys
    }

    /// Index options, with the name filled in.
    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    /// Returns true if the index spans more than one key.
    pub fn is_compound(&self) -> bool {
        self.keys.len() > 1
    }

    /// Builds the key document passed to the store.
    pub fn keys_document(&self) -> Document {
        keys_document(&self.keys)
    }

    fn push_key(&mut self, key: IndexKey) {
        if !self.keys.iter().any(|k| k.field == key.field) {
            self.keys.push(key);
        }
    }
}

fn keys_document(keys: &[IndexKey]) -> Document {
    let mut document = Document::new();
    for key in keys {
        document.insert(key.field.clone(), key.kind.to_bson());
    }
    document
}

/// Parses a compound index key token of the form `<field>_<direction-or-type>`.
///
/// The token is split on its last underscore. A field name starting with an
/// underscore is escaped: the leading underscore is stripped before the split
/// and put back on the recovered field, so `_id_1` names `_id` ascending.
pub fn parse_index_key(collection: &str, token: &str) -> MappingResult<IndexKey> {
    let invalid = |message: &str| MappingError::InvalidIndexKey {
        collection: collection.to_string(),
        token: token.to_string(),
        message: message.to_string(),
    };

    let (escaped, body) = match token.strip_prefix('_') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    let (field, suffix) = body
        .rsplit_once('_')
        .ok_or_else(|| invalid("expected '<field>_<direction-or-type>'"))?;
    if field.is_empty() {
        return Err(invalid("field name is empty"));
    }
    let kind = IndexKind::parse(suffix)
        .ok_or_else(|| invalid(&format!("unknown direction or type '{}'", suffix)))?;

    let field = if escaped {
        format!("_{}", field)
    } else {
        field.to_string()
    };
    Ok(IndexKey::new(field, kind))
}

/// Derives the index specs of a type.
///
/// Indexed fields sharing an explicit index name are merged into one compound
/// spec, in field declaration order, with their options combined. Unnamed
/// indexed fields get a single-key spec each. Type-level compound
/// declarations follow; a declaration whose name matches an existing spec
/// extends it. Key tokens naming a declared field are mapped to that field's
/// document key; other tokens (e.g. dotted paths) are used as given.
pub fn derive_index_specs(metadata: &EntityMetadata) -> MappingResult<Vec<IndexSpec>> {
    let mut specs: Vec<IndexSpec> = Vec::new();

    for field in metadata.indexed_fields() {
        let Some(tag) = field.index_tag() else {
            continue;
        };
        let key = IndexKey::new(field.key(), tag.kind);
        match find_named(&mut specs, tag.options.name.as_deref()) {
            Some(existing) => {
                existing.push_key(key);
                existing.options.merge(&tag.options);
            }
            None => specs.push(IndexSpec::new(vec![key], tag.options.clone())),
        }
    }

    for compound in metadata.compound_indexes() {
        let mut keys = Vec::with_capacity(compound.keys.len());
        for token in &compound.keys {
            let mut key = parse_index_key(metadata.collection_name(), token)?;
            if let Some(field) = metadata.field(&key.field) {
                key.field = field.key().to_string();
            }
            keys.push(key);
        }
        if keys.is_empty() {
            return Err(MappingError::InvalidMetadata {
                type_name: metadata.type_name().to_string(),
                message: "compound index declares no keys".to_string(),
            });
        }
        match find_named(&mut specs, compound.options.name.as_deref()) {
            Some(existing) => {
                for key in keys {
                    existing.push_key(key);
                }
                existing.options.merge(&compound.options);
            }
            None => specs.push(IndexSpec::new(keys, compound.options.clone())),
        }
    }

    Ok(specs)
}

fn find_named<'a>(specs: &'a mut [IndexSpec], name: Option<&str>) -> Option<&'a mut IndexSpec> {
    let name = name?;
    specs.iter_mut().find(|spec| spec.name == name)
}
