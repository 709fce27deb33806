//! How object properties map to RDF.

use crate::query::model::Property;
use rustc_hash::FxHashMap;

/// The role of a property in the RDF mapping.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PropertyMappingType {
    /// The local identifier of the entity, turned into its IRI by [`PropertyHintResolver::map_id_to_uri`].
    Identifier,
    /// The full IRI of the entity.
    Address,
    /// A literal valued predicate.
    DataProperty,
    /// A resource valued predicate from the entity to the value.
    ObjectProperty,
    /// A resource valued predicate from the value to the entity.
    InverseProperty,
}

#[derive(Eq, PartialEq, Debug, Clone, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PropertyHint {
    pub mapping_type: PropertyMappingType,
    /// Unset for identifiers and addresses.
    #[cfg_attr(feature = "serde", serde(default))]
    pub predicate_uri: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub data_type_uri: Option<String>,
}

impl PropertyHint {
    pub fn identifier() -> Self {
        Self {
            mapping_type: PropertyMappingType::Identifier,
            predicate_uri: None,
            data_type_uri: None,
        }
    }

    pub fn address() -> Self {
        Self {
            mapping_type: PropertyMappingType::Address,
            predicate_uri: None,
            data_type_uri: None,
        }
    }

    pub fn data_property(predicate_uri: impl Into<String>) -> Self {
        Self {
            mapping_type: PropertyMappingType::DataProperty,
            predicate_uri: Some(predicate_uri.into()),
            data_type_uri: None,
        }
    }

    pub fn object_property(predicate_uri: impl Into<String>) -> Self {
        Self {
            mapping_type: PropertyMappingType::ObjectProperty,
            predicate_uri: Some(predicate_uri.into()),
            data_type_uri: None,
        }
    }

    pub fn inverse_property(predicate_uri: impl Into<String>) -> Self {
        Self {
            mapping_type: PropertyMappingType::InverseProperty,
            predicate_uri: Some(predicate_uri.into()),
            data_type_uri: None,
        }
    }

    #[must_use]
    pub fn with_data_type(mut self, data_type_uri: impl Into<String>) -> Self {
        self.data_type_uri = Some(data_type_uri.into());
        self
    }

    /// Identifier or address: the property value is the entity itself.
    #[inline]
    pub fn is_identity(&self) -> bool {
        matches!(
            self.mapping_type,
            PropertyMappingType::Identifier | PropertyMappingType::Address
        )
    }
}

/// Source of the RDF mapping of the object model.
pub trait PropertyHintResolver {
    /// The mapping of a property, `None` if the property is not mapped.
    fn property_hint(&self, property: &Property) -> Option<PropertyHint>;

    /// Builds the IRI of the entity with the given identifier.
    ///
    /// `identifier_property` is the identifier property of the entity type.
    fn map_id_to_uri(&self, identifier_property: &Property, id: &str) -> String;

    /// The `rdf:type` of the entities of a type, `None` if the type is not mapped.
    fn entity_type_uri(&self, entity_type: &str) -> Option<String>;
}

/// Mapping of one entity type.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EntityMapping {
    pub type_uri: Option<String>,
    /// Prepended to identifiers to build entity IRIs.
    pub identifier_prefix: String,
    pub properties: FxHashMap<String, PropertyHint>,
}

impl EntityMapping {
    pub fn new(type_uri: impl Into<String>, identifier_prefix: impl Into<String>) -> Self {
        Self {
            type_uri: Some(type_uri.into()),
            identifier_prefix: identifier_prefix.into(),
            properties: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, hint: PropertyHint) -> Self {
        self.properties.insert(name.into(), hint);
        self
    }
}

/// A [`PropertyHintResolver`] backed by a static table, keyed by entity type name.
///
/// With the `serde` feature it can be loaded from JSON:
/// ```json
/// {"types": {"Person": {
///   "type_uri": "http://example.com/Person",
///   "identifier_prefix": "http://example.com/people/",
///   "properties": {
///     "Id": {"mapping_type": "identifier"},
///     "Age": {"mapping_type": "data_property", "predicate_uri": "http://example.com/age"}
///   }
/// }}}
/// ```
///
/// ```
/// use sparmap::query::{EntityMapping, MappingTable, Property, PropertyHint, PropertyHintResolver, ValueType};
///
/// let mappings = MappingTable::new().with_entity_type(
///     "Person",
///     EntityMapping::new("http://example.com/Person", "http://example.com/people/")
///         .with_property("Id", PropertyHint::identifier()),
/// );
/// let id = Property::new("Person", "Id", ValueType::String);
/// assert_eq!(mappings.map_id_to_uri(&id, "alice"), "http://example.com/people/alice");
/// ```
#[derive(Eq, PartialEq, Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MappingTable {
    pub types: FxHashMap<String, EntityMapping>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_entity_type(mut self, name: impl Into<String>, mapping: EntityMapping) -> Self {
        self.types.insert(name.into(), mapping);
        self
    }
}

impl PropertyHintResolver for MappingTable {
    fn property_hint(&self, property: &Property) -> Option<PropertyHint> {
        self.types
            .get(&property.declaring_type)?
            .properties
            .get(&property.name)
            .cloned()
    }

    fn map_id_to_uri(&self, identifier_property: &Property, id: &str) -> String {
        match self.types.get(&identifier_property.declaring_type) {
            Some(mapping) if !mapping.identifier_prefix.is_empty() => {
                format!("{}{id}", mapping.identifier_prefix)
            }
            _ => id.into(),
        }
    }

    fn entity_type_uri(&self, entity_type: &str) -> Option<String> {
        self.types.get(entity_type)?.type_uri.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::model::ValueType;

    fn table() -> MappingTable {
        MappingTable::new()
            .with_entity_type(
                "Person",
                EntityMapping::new("http://example.com/Person", "http://example.com/people/")
                    .with_property("Id", PropertyHint::identifier())
                    .with_property(
                        "Age",
                        PropertyHint::data_property("http://example.com/age")
                            .with_data_type("http://www.w3.org/2001/XMLSchema#integer"),
                    ),
            )
            .with_entity_type("Tag", EntityMapping::default())
    }

    #[test]
    fn property_lookup() {
        let table = table();
        let age = Property::new("Person", "Age", ValueType::Integer);
        let hint = table.property_hint(&age).unwrap();
        assert_eq!(hint.mapping_type, PropertyMappingType::DataProperty);
        assert_eq!(hint.predicate_uri.as_deref(), Some("http://example.com/age"));
        assert!(!hint.is_identity());
        let unknown = Property::new("Person", "Shoe", ValueType::String);
        assert_eq!(table.property_hint(&unknown), None);
    }

    #[test]
    fn identifiers_without_prefix_are_kept() {
        let table = table();
        let id = Property::new("Tag", "Id", ValueType::String);
        assert_eq!(
            table.map_id_to_uri(&id, "http://example.com/tags/1"),
            "http://example.com/tags/1"
        );
        assert_eq!(table.entity_type_uri("Tag"), None);
        assert_eq!(
            table.entity_type_uri("Person").as_deref(),
            Some("http://example.com/Person")
        );
    }
}
