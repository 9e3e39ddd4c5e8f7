//! Schema description used to validate and diff JSON projections of CRDT
//! documents (§4.1).
//!
//! This is the "Zod schemas as runtime validators" design note (§9) made
//! concrete: instead of deriving validators from Rust types at compile time,
//! a `Schema` value describes the shape a node's `attributes` or a
//! document's `content` is expected to have, and is interpreted at runtime
//! by both the validator and the diff walker. That keeps the union/optional
//! resolution semantics ("first alternative that validates wins") explicit
//! and shared between validation and diffing instead of duplicated.

use serde_json::Value;

/// Describes the expected shape of a JSON value inside a CRDT document.
#[derive(Debug, Clone)]
pub enum Schema {
    /// A fixed set of named fields, each with its own schema.
    Object(Vec<(String, Schema)>),
    /// A homogeneous map with dynamic keys, all values sharing one schema.
    Record(Box<Schema>),
    /// A homogeneous list.
    Array(Box<Schema>),
    /// Character-level collaborative text (diffed via `text_diff`).
    Text,
    /// A JSON scalar: string, number, bool, or null.
    Primitive,
    /// The value must validate against at least one of the alternatives;
    /// the first alternative that validates is authoritative for diffing.
    Union(Vec<Schema>),
    /// Shorthand for `Union([inner, Primitive-null])`: the field may be absent or null.
    Optional(Box<Schema>),
}

impl Schema {
    /// Convenience constructor for a field that may be omitted or `null`.
    pub fn optional(inner: Schema) -> Schema {
        Schema::Optional(Box::new(inner))
    }

    /// Whether `value` conforms to this schema.
    pub fn validate(&self, value: &Value) -> bool {
        match self {
            Schema::Object(fields) => match value.as_object() {
                Some(obj) => fields.iter().all(|(name, schema)| {
                    match obj.get(name) {
                        Some(v) => schema.validate(v),
                        // A missing key only validates if its schema accepts null/absence.
                        None => schema.accepts_absence(),
                    }
                }),
                None => false,
            },
            Schema::Record(value_schema) => match value.as_object() {
                Some(obj) => obj.values().all(|v| value_schema.validate(v)),
                None => false,
            },
            Schema::Array(item_schema) => match value.as_array() {
                Some(items) => items.iter().all(|v| item_schema.validate(v)),
                None => false,
            },
            Schema::Text => value.is_string(),
            Schema::Primitive => {
                value.is_string() || value.is_number() || value.is_boolean() || value.is_null()
            }
            Schema::Union(variants) => variants.iter().any(|s| s.validate(value)),
            Schema::Optional(inner) => value.is_null() || inner.validate(value),
        }
    }

    /// Whether a field with this schema may legally be absent from its parent object.
    fn accepts_absence(&self) -> bool {
        matches!(self, Schema::Optional(_))
    }

    /// The first alternative schema that validates `value`, for resolving
    /// unions during diffing. Returns `self` for non-union schemas.
    ///
    /// `Optional(inner)` also validates an explicit `null` (see `validate`
    /// above), so `null` must resolve to something the diff walker knows how
    /// to handle rather than falling through to the `Optional` variant
    /// itself — it always resolves to `Primitive`, since `null` is never a
    /// meaningful object/array/text value to recurse into.
    pub fn resolve<'a>(&'a self, value: &Value) -> &'a Schema {
        match self {
            Schema::Union(variants) => variants
                .iter()
                .find(|s| s.validate(value))
                .unwrap_or(self),
            Schema::Optional(inner) => {
                if value.is_null() {
                    &PRIMITIVE_SCHEMA
                } else {
                    inner.resolve(value)
                }
            }
            other => other,
        }
    }
}

const PRIMITIVE_SCHEMA: Schema = Schema::Primitive;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_schema_rejects_missing_required_field() {
        let schema = Schema::Object(vec![
            ("title".into(), Schema::Primitive),
            ("body".into(), Schema::Text),
        ]);
        assert!(!schema.validate(&json!({"title": "x"})));
        assert!(schema.validate(&json!({"title": "x", "body": "y"})));
    }

    #[test]
    fn optional_field_may_be_absent_or_null() {
        let schema = Schema::Object(vec![(
            "description".into(),
            Schema::optional(Schema::Primitive),
        )]);
        assert!(schema.validate(&json!({})));
        assert!(schema.validate(&json!({"description": null})));
        assert!(schema.validate(&json!({"description": "hi"})));
    }

    #[test]
    fn record_schema_validates_every_value() {
        let schema = Schema::Record(Box::new(Schema::Primitive));
        assert!(schema.validate(&json!({"a": 1, "b": "two"})));
        assert!(!schema.validate(&json!({"a": {"nested": true}})));
    }

    #[test]
    fn union_resolves_to_first_matching_alternative() {
        let schema = Schema::Union(vec![
            Schema::Object(vec![("kind".into(), Schema::Primitive)]),
            Schema::Primitive,
        ]);
        let resolved = schema.resolve(&json!("plain string"));
        assert!(matches!(resolved, Schema::Primitive));
    }

    #[test]
    fn array_schema_validates_each_item() {
        let schema = Schema::Array(Box::new(Schema::Primitive));
        assert!(schema.validate(&json!([1, "two", true])));
        assert!(!schema.validate(&json!([1, {"x": 1}])));
    }
}
