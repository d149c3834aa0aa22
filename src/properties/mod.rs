//! Properties Metadata: maps CEL property paths to schema field
//! mappings (§4.4).
//!
//! The registry is read-mostly and process-wide (§5, §9): it is built
//! once at startup and swapped atomically on reload via
//! [`SharedPropertiesMetadata`], which wraps an [`arc_swap::ArcSwap`] so
//! readers never block behind a writer.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::cel::DataType;
use crate::error::{EngineError, Result};

/// A declarative rule taking a CEL dotted path to a SQL expression
/// (§3 "Field Mapping").
#[derive(Debug, Clone, PartialEq)]
pub enum FieldMapping {
    Simple { map_to: String },
    Json { json_prop: String, prop_in_json: Vec<String> },
}

impl FieldMapping {
    pub fn simple(column: impl Into<String>) -> Self {
        FieldMapping::Simple { map_to: column.into() }
    }

    pub fn json(json_prop: impl Into<String>, prop_in_json: Vec<impl Into<String>>) -> Self {
        FieldMapping::Json {
            json_prop: json_prop.into(),
            prop_in_json: prop_in_json.into_iter().map(Into::into).collect(),
        }
    }
}

/// The resolved mapping(s) for one CEL property, plus the declared
/// data type used by the SQL provider for casts.
#[derive(Debug, Clone, Default)]
pub struct PropertyMetadata {
    pub field_mappings: Vec<FieldMapping>,
    pub data_type: Option<DataType>,
}

#[derive(Debug, Clone)]
struct WildcardEntry {
    prefix: String,
    json_prop: String,
    json_base_path: Vec<String>,
    data_type: Option<DataType>,
    registration_order: usize,
}

/// Declarative registry mapping CEL paths to field mappings (§4.4).
///
/// Lookup is deterministic: exact match wins over a wildcard match;
/// among wildcards the longest prefix wins; ties are broken by
/// registration order.
#[derive(Debug, Clone, Default)]
pub struct PropertiesMetadata {
    exact: HashMap<String, PropertyMetadata>,
    wildcards: Vec<WildcardEntry>,
    next_order: usize,
}

impl PropertiesMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an exact-path mapping. Calling this more than once for
    /// the same path accumulates a fallback chain (combined via
    /// `COALESCE` by the SQL provider), per §3.
    pub fn register_exact(
        &mut self,
        cel_path: impl Into<String>,
        mapping: FieldMapping,
        data_type: Option<DataType>,
    ) -> &mut Self {
        let entry = self.exact.entry(cel_path.into()).or_default();
        entry.field_mappings.push(mapping);
        if data_type.is_some() {
            entry.data_type = data_type;
        }
        self
    }

    /// Registers a wildcard suffix mapping, e.g. `labels.*` → JSON
    /// sub-path under `column`/`base_path` + the matched remainder.
    pub fn register_wildcard(
        &mut self,
        prefix_pattern: impl Into<String>,
        json_prop: impl Into<String>,
        json_base_path: Vec<impl Into<String>>,
        data_type: Option<DataType>,
    ) -> &mut Self {
        let pattern = prefix_pattern.into();
        let prefix = pattern
            .strip_suffix('*')
            .map(|s| s.to_string())
            .unwrap_or(pattern);
        let order = self.next_order;
        self.next_order += 1;
        self.wildcards.push(WildcardEntry {
            prefix,
            json_prop: json_prop.into(),
            json_base_path: json_base_path.into_iter().map(Into::into).collect(),
            data_type,
            registration_order: order,
        });
        self
    }

    /// Registers `alias_path` as resolving to whatever `canonical_path`
    /// currently resolves to (§4.4 "Aliases"). Must be called after the
    /// canonical path has been registered.
    pub fn register_alias(&mut self, alias_path: impl Into<String>, canonical_path: &str) -> Result<&mut Self> {
        let canonical = self
            .exact
            .get(canonical_path)
            .cloned()
            .ok_or_else(|| EngineError::config(format!("alias target '{canonical_path}' not registered")))?;
        self.exact.insert(alias_path.into(), canonical);
        Ok(self)
    }

    pub fn get_property_metadata(&self, cel_path: &str) -> Result<PropertyMetadata> {
        if let Some(exact) = self.exact.get(cel_path) {
            return Ok(exact.clone());
        }

        let best = self
            .wildcards
            .iter()
            .filter(|w| cel_path.starts_with(&w.prefix))
            .max_by_key(|w| (w.prefix.len(), std::cmp::Reverse(w.registration_order)));

        match best {
            Some(w) => {
                let remainder = &cel_path[w.prefix.len()..];
                let mut prop_in_json = w.json_base_path.clone();
                prop_in_json.extend(remainder.split('.').filter(|s| !s.is_empty()).map(str::to_string));
                Ok(PropertyMetadata {
                    field_mappings: vec![FieldMapping::Json {
                        json_prop: w.json_prop.clone(),
                        prop_in_json,
                    }],
                    data_type: w.data_type,
                })
            }
            None => Err(EngineError::unmapped_property(cel_path)),
        }
    }
}

/// Process-wide, atomically-swappable handle to a
/// [`PropertiesMetadata`] registry (§5, §9 "PropertiesMetadata ... is
/// process-wide; initialized at startup, atomically swapped on reload").
#[derive(Clone)]
pub struct SharedPropertiesMetadata(Arc<ArcSwap<PropertiesMetadata>>);

impl SharedPropertiesMetadata {
    pub fn new(initial: PropertiesMetadata) -> Self {
        SharedPropertiesMetadata(Arc::new(ArcSwap::new(Arc::new(initial))))
    }

    pub fn load(&self) -> Arc<PropertiesMetadata> {
        self.0.load_full()
    }

    pub fn reload(&self, new_metadata: PropertiesMetadata) {
        self.0.store(Arc::new(new_metadata));
    }
}
