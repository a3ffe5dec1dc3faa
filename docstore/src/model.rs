//! Base conventions for persisted documents.
//!
//! Every persisted entity carries an identifier, creation/update timestamps,
//! and a discriminator field (`doctype`) identifying its concrete type so a
//! polymorphic index can resolve raw hits back into typed instances.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Persistence metadata shared by all models.
///
/// Embed this in a model struct with `#[serde(flatten)]` so the fields land
/// at the top level of the stored document. The identifier and timestamps are
/// populated by [`crate::store::Store`] on write; the discriminator is
/// stamped by the persistence layer and is never caller-supplied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// String identifier, unique within an index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Creation time in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Last-update time in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    /// Discriminator value identifying the concrete model type.
    #[serde(default)]
    pub doctype: String,
}

/// A self-describing persisted document.
///
/// Implementations declare their discriminator value and the field-schema
/// fragment they contribute to the index mapping. The discriminator field
/// name defaults to `"doctype"` and can be overridden per model hierarchy.
pub trait Model: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The discriminator value for this concrete type, conventionally the
    /// lowercased type name.
    fn doctype() -> &'static str;

    /// The document field holding the discriminator.
    fn doctype_field() -> &'static str {
        "doctype"
    }

    /// Shared persistence metadata.
    fn meta(&self) -> &Meta;

    /// Mutable access to shared persistence metadata.
    fn meta_mut(&mut self) -> &mut Meta;

    /// Field mapping fragment for this model, merged additively into the
    /// index mapping on registration. Shape: `{"properties": {...}}`.
    fn mapping() -> Value {
        json!({ "properties": {} })
    }

    /// The identifier, if assigned.
    fn id(&self) -> Option<&str> {
        self.meta().id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Employee, Person};

    #[test]
    fn test_meta_skips_unset_fields() {
        let person = Person::new("Kevin", "Durant");
        let value = serde_json::to_value(&person).unwrap();
        let obj = value.as_object().unwrap();

        assert!(!obj.contains_key("id"));
        assert!(!obj.contains_key("created_at"));
        assert!(!obj.contains_key("updated_at"));
        assert!(obj.contains_key("doctype"));
    }

    #[test]
    fn test_roundtrip_preserves_fields() {
        let mut person = Person::new("Kevin", "Durant");
        person.meta.id = Some("abc".to_string());
        person.meta.created_at = Some(1000);
        person.meta.updated_at = Some(2000);
        person.meta.doctype = Person::doctype().to_string();

        let value = serde_json::to_value(&person).unwrap();
        let back: Person = serde_json::from_value(value).unwrap();

        assert_eq!(back, person);
        assert_eq!(back.id(), Some("abc"));
    }

    #[test]
    fn test_doctypes_are_distinct_per_model() {
        assert_eq!(Person::doctype(), "person");
        assert_eq!(Employee::doctype(), "employee");
        assert_eq!(Person::doctype_field(), Employee::doctype_field());

        // Both mapping fragments coexist on one index.
        let mut mapping = crate::mapping::base_mapping(Person::doctype_field());
        crate::mapping::merge_mapping(&mut mapping, &Person::mapping());
        crate::mapping::merge_mapping(&mut mapping, &Employee::mapping());
        assert_eq!(mapping["properties"]["middle"]["type"], "text");
        assert_eq!(mapping["properties"]["employee_id"]["type"], "keyword");
    }

    #[test]
    fn test_equality_ignores_nothing_but_type() {
        let a = Person::new("Kevin", "Durant");
        let b = Person::new("Kevin", "Durant");
        let c = Person::new("Steph", "Curry");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
