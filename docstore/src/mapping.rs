//! Index mapping composition.
//!
//! An index holds documents of many model types, so its mapping is the union
//! of the field declarations contributed by every registered model, layered
//! over the base fields all models share. Merging is additive: registering a
//! model never erases fields contributed by another.

use serde_json::{json, Value};

/// The mapping fragment every index starts from: identifier, timestamps, and
/// the discriminator field.
pub fn base_mapping(doctype_field: &str) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert("id".to_string(), json!({ "type": "keyword" }));
    properties.insert(
        "created_at".to_string(),
        json!({ "type": "date", "format": "epoch_millis" }),
    );
    properties.insert(
        "updated_at".to_string(),
        json!({ "type": "date", "format": "epoch_millis" }),
    );
    properties.insert(doctype_field.to_string(), json!({ "type": "keyword" }));
    json!({ "properties": properties })
}

/// Merge a mapping fragment into an existing mapping.
///
/// Unions the `properties` objects; keys already present in `target` are
/// kept unchanged so later registrations cannot clobber earlier ones.
pub fn merge_mapping(target: &mut Value, fragment: &Value) {
    let Some(incoming) = fragment.get("properties").and_then(Value::as_object) else {
        return;
    };

    if !target.is_object() {
        *target = json!({ "properties": {} });
    }
    let Some(obj) = target.as_object_mut() else {
        return;
    };
    let properties = obj
        .entry("properties")
        .or_insert_with(|| json!({}));
    let Some(existing) = properties.as_object_mut() else {
        return;
    };

    for (key, value) in incoming {
        existing.entry(key.clone()).or_insert_with(|| value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_mapping_fields() {
        let mapping = base_mapping("doctype");
        let properties = &mapping["properties"];

        assert_eq!(properties["id"]["type"], "keyword");
        assert_eq!(properties["created_at"]["type"], "date");
        assert_eq!(properties["created_at"]["format"], "epoch_millis");
        assert_eq!(properties["doctype"]["type"], "keyword");
    }

    #[test]
    fn test_merge_is_additive() {
        let mut mapping = base_mapping("doctype");
        merge_mapping(
            &mut mapping,
            &json!({ "properties": { "first": { "type": "text" } } }),
        );
        merge_mapping(
            &mut mapping,
            &json!({ "properties": { "last": { "type": "text" } } }),
        );

        assert_eq!(mapping["properties"]["first"]["type"], "text");
        assert_eq!(mapping["properties"]["last"]["type"], "text");
        assert_eq!(mapping["properties"]["id"]["type"], "keyword");
    }

    #[test]
    fn test_merge_does_not_clobber_existing_fields() {
        let mut mapping = json!({ "properties": { "first": { "type": "text" } } });
        merge_mapping(
            &mut mapping,
            &json!({ "properties": { "first": { "type": "keyword" } } }),
        );

        assert_eq!(mapping["properties"]["first"]["type"], "text");
    }

    #[test]
    fn test_merge_into_empty_target() {
        let mut mapping = Value::Null;
        merge_mapping(
            &mut mapping,
            &json!({ "properties": { "area": { "type": "keyword" } } }),
        );

        assert_eq!(mapping["properties"]["area"]["type"], "keyword");
    }
}
