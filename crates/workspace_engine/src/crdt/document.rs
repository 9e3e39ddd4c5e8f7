//! `CrdtDocument`: the typed facade over a `yrs::Doc` described in §4.1.
//!
//! A document holds a single root map (`"object"`) whose JSON projection is
//! expected to match a [`Schema`]. `update()` implements the diff algorithm
//! of §4.1: it walks the new object against the current CRDT structure and
//! emits the minimal set of CRDT operations needed to converge on it,
//! instead of replacing the whole document on every edit.

use std::sync::Arc;

use serde_json::{Map as JsonMap, Value};
use yrs::Value as YValue;
use yrs::undo::UndoManager;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Any, Array, ArrayPrelim, ArrayRef, Doc, GetString, Map, MapPrelim, MapRef, ReadTxn, Text,
    TextPrelim, TextRef, Transact, TransactionMut, Update,
};

use super::schema::Schema;
use super::text_diff::apply_text_diff;
use super::types::UpdateOrigin;
use crate::error::{EngineError, Result};

const ROOT_KEY: &str = "object";
const LOCAL_ORIGIN: &str = "local";

/// A CRDT-backed document with a schema-validated JSON projection.
pub struct CrdtDocument {
    doc: Doc,
    root: MapRef,
    undo_manager: UndoManager<()>,
}

impl CrdtDocument {
    /// Create a new, empty document.
    pub fn new() -> Self {
        let doc = Doc::new();
        let root = doc.get_or_insert_map(ROOT_KEY);
        let mut undo_manager = UndoManager::new(&doc, &root);
        undo_manager.include_origin(LOCAL_ORIGIN);
        Self {
            doc,
            root,
            undo_manager,
        }
    }

    /// Rebuild a document from a prior state snapshot or a sequence of updates.
    pub fn from_updates(updates: &[Vec<u8>]) -> Result<Self> {
        let mut this = Self::new();
        for update in updates {
            this.apply_update(update, UpdateOrigin::Sync)?;
        }
        Ok(this)
    }

    /// Diff `new_object` (validated against `schema`) into the document,
    /// returning the resulting binary update, or `None` if nothing changed.
    ///
    /// Runs in a single transaction tagged with the local origin, so it
    /// participates in undo/redo (§4.1 "Undo/redo").
    pub fn update(&mut self, schema: &Schema, new_object: &Value) -> Result<Option<Vec<u8>>> {
        if !schema.validate(new_object) {
            return Err(EngineError::Validation(
                "value does not conform to schema".into(),
            ));
        }
        let fields = match schema {
            Schema::Object(fields) => fields,
            _ => {
                return Err(EngineError::Validation(
                    "root schema must be Schema::Object".into(),
                ));
            }
        };
        let new_obj = new_object
            .as_object()
            .ok_or_else(|| EngineError::Validation("root value must be an object".into()))?;

        let sv_before = {
            let txn = self.doc.transact();
            txn.state_vector()
        };

        {
            let mut txn = self.doc.transact_mut_with(LOCAL_ORIGIN);
            diff_object(&mut txn, &self.root, fields, new_obj);
        }

        // Revalidate the post-image: a mismatch here means the diff walker
        // produced a structure that doesn't match its own schema (§4.1, InternalInvariant).
        let projection = self.to_json();
        if !schema.validate(&projection) {
            return Err(EngineError::Integrity(
                "post-update projection failed schema revalidation".into(),
            ));
        }

        let txn = self.doc.transact();
        let sv_after = txn.state_vector();
        if sv_after == sv_before {
            Ok(None)
        } else {
            Ok(Some(txn.encode_state_as_update_v1(&sv_before)))
        }
    }

    /// Merge a binary update from another replica. Idempotent and commutative.
    ///
    /// Remote and sync-handshake updates are never applied under the local
    /// origin, so they never enter the undo stack (§9 "Undo/redo").
    pub fn apply_update(&mut self, update: &[u8], _origin: UpdateOrigin) -> Result<()> {
        let decoded = Update::decode_v1(update).map_err(|e| EngineError::Crdt(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(decoded)
            .map_err(|e| EngineError::Crdt(e.to_string()))?;
        Ok(())
    }

    /// Revert the last locally-originated transaction, if any.
    pub fn undo(&mut self) -> bool {
        self.undo_manager.undo_blocking()
    }

    /// Reapply the last undone locally-originated transaction, if any.
    pub fn redo(&mut self) -> bool {
        self.undo_manager.redo_blocking()
    }

    /// Full binary snapshot of the current state.
    pub fn state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&Default::default())
    }

    /// Base64-encoded snapshot, for embedding in JSON payloads (e.g. the
    /// `NodeState`/`DocumentState` rows of §3).
    pub fn encoded_state(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.state())
    }

    /// Current JSON projection of the document's root map.
    pub fn to_json(&self) -> Value {
        let txn = self.doc.transact();
        map_to_json(&txn, &self.root)
    }
}

impl Default for CrdtDocument {
    fn default() -> Self {
        Self::new()
    }
}

fn diff_object(
    txn: &mut TransactionMut,
    map: &MapRef,
    fields: &[(String, Schema)],
    new_obj: &JsonMap<String, Value>,
) {
    for (name, field_schema) in fields {
        match new_obj.get(name) {
            Some(new_val) => diff_entry(txn, map, name, field_schema, new_val),
            None => {
                map.remove(txn, name);
            }
        }
    }
}

fn diff_record(
    txn: &mut TransactionMut,
    map: &MapRef,
    value_schema: &Schema,
    new_obj: &JsonMap<String, Value>,
) {
    let existing_keys: Vec<String> = map.iter(txn).map(|(k, _)| k.to_string()).collect();
    for key in existing_keys {
        if !new_obj.contains_key(&key) {
            map.remove(txn, &key);
        }
    }
    for (key, value) in new_obj {
        diff_entry(txn, map, key, value_schema, value);
    }
}

fn diff_entry(txn: &mut TransactionMut, map: &MapRef, key: &str, schema: &Schema, new_value: &Value) {
    let resolved = schema.resolve(new_value);
    match resolved {
        Schema::Object(fields) => {
            let nested = get_or_create_map(txn, map, key);
            diff_object(txn, &nested, fields, as_obj(new_value));
        }
        Schema::Record(value_schema) => {
            let nested = get_or_create_map(txn, map, key);
            diff_record(txn, &nested, value_schema, as_obj(new_value));
        }
        Schema::Array(item_schema) => {
            let nested = get_or_create_array(txn, map, key);
            diff_array(txn, &nested, item_schema, as_arr(new_value));
        }
        Schema::Text => {
            let nested = get_or_create_text(txn, map, key);
            apply_text_diff(txn, &nested, new_value.as_str().unwrap_or_default());
        }
        Schema::Primitive => set_primitive_if_changed(txn, map, key, new_value),
        Schema::Union(_) | Schema::Optional(_) => {
            unreachable!("Schema::resolve strips unions and optionals")
        }
    }
}

fn diff_array(txn: &mut TransactionMut, arr: &ArrayRef, item_schema: &Schema, new_items: &[Value]) {
    let old_len = arr.len(txn) as usize;
    let common = old_len.min(new_items.len());

    for (i, item) in new_items.iter().enumerate().take(common) {
        diff_array_index(txn, arr, i as u32, item_schema, item);
    }

    if new_items.len() > old_len {
        for item in &new_items[old_len..] {
            let resolved = item_schema.resolve(item);
            let index = arr.len(txn);
            insert_fresh(txn, arr, index, resolved, item);
        }
    } else if old_len > new_items.len() {
        let remove_count = (old_len - new_items.len()) as u32;
        arr.remove_range(txn, new_items.len() as u32, remove_count);
    }
}

fn diff_array_index(
    txn: &mut TransactionMut,
    arr: &ArrayRef,
    index: u32,
    schema: &Schema,
    new_value: &Value,
) {
    let resolved = schema.resolve(new_value);
    let existing = arr.get(txn, index);

    match (resolved, existing) {
        (Schema::Object(fields), Some(YValue::YMap(m))) => {
            diff_object(txn, &m, fields, as_obj(new_value));
        }
        (Schema::Record(value_schema), Some(YValue::YMap(m))) => {
            diff_record(txn, &m, value_schema, as_obj(new_value));
        }
        (Schema::Array(item_schema), Some(YValue::YArray(a))) => {
            diff_array(txn, &a, item_schema, as_arr(new_value));
        }
        (Schema::Text, Some(YValue::YText(t))) => {
            apply_text_diff(txn, &t, new_value.as_str().unwrap_or_default());
        }
        (Schema::Primitive, Some(YValue::Any(current))) => {
            let new_any = json_to_any(new_value);
            if current != new_any {
                arr.remove_range(txn, index, 1);
                arr.insert(txn, index, new_any);
            }
        }
        _ => {
            // No existing entry, or its type no longer matches the schema: recreate.
            arr.remove_range(txn, index, 1);
            insert_fresh(txn, arr, index, resolved, new_value);
        }
    }
}

fn insert_fresh(txn: &mut TransactionMut, arr: &ArrayRef, index: u32, schema: &Schema, value: &Value) {
    match schema {
        Schema::Object(fields) => {
            let m = arr.insert(txn, index, MapPrelim::default());
            diff_object(txn, &m, fields, as_obj(value));
        }
        Schema::Record(value_schema) => {
            let m = arr.insert(txn, index, MapPrelim::default());
            diff_record(txn, &m, value_schema, as_obj(value));
        }
        Schema::Array(item_schema) => {
            let a = arr.insert(txn, index, ArrayPrelim::default());
            diff_array(txn, &a, item_schema, as_arr(value));
        }
        Schema::Text => {
            arr.insert(txn, index, TextPrelim::new(value.as_str().unwrap_or_default()));
        }
        Schema::Primitive => {
            arr.insert(txn, index, json_to_any(value));
        }
        Schema::Union(_) | Schema::Optional(_) => {
            unreachable!("Schema::resolve strips unions and optionals")
        }
    }
}

fn get_or_create_map(txn: &mut TransactionMut, parent: &MapRef, key: &str) -> MapRef {
    match parent.get(txn, key) {
        Some(YValue::YMap(m)) => m,
        _ => parent.insert(txn, key, MapPrelim::default()),
    }
}

fn get_or_create_array(txn: &mut TransactionMut, parent: &MapRef, key: &str) -> ArrayRef {
    match parent.get(txn, key) {
        Some(YValue::YArray(a)) => a,
        _ => parent.insert(txn, key, ArrayPrelim::default()),
    }
}

fn get_or_create_text(txn: &mut TransactionMut, parent: &MapRef, key: &str) -> TextRef {
    match parent.get(txn, key) {
        Some(YValue::YText(t)) => t,
        _ => parent.insert(txn, key, TextPrelim::new("")),
    }
}

fn set_primitive_if_changed(txn: &mut TransactionMut, map: &MapRef, key: &str, new_value: &Value) {
    let new_any = json_to_any(new_value);
    let changed = match map.get(txn, key) {
        Some(YValue::Any(current)) => current != new_any,
        _ => true,
    };
    if changed {
        map.insert(txn, key, new_any);
    }
}

fn as_obj(value: &Value) -> &JsonMap<String, Value> {
    static EMPTY: std::sync::OnceLock<JsonMap<String, Value>> = std::sync::OnceLock::new();
    value
        .as_object()
        .unwrap_or_else(|| EMPTY.get_or_init(JsonMap::new))
}

fn as_arr(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or(&[])
}

fn json_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => Any::Number(n.as_f64().unwrap_or_default()),
        Value::String(s) => Any::String(Arc::from(s.as_str())),
        Value::Array(items) => Any::Array(items.iter().map(json_to_any).collect::<Vec<_>>().into()),
        Value::Object(obj) => Any::Map(Arc::new(
            obj.iter().map(|(k, v)| (k.clone(), json_to_any(v))).collect(),
        )),
    }
}

fn any_to_json(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(n) => {
            serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null)
        }
        Any::BigInt(i) => Value::Number((*i).into()),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(_) => Value::Null,
        Any::Array(items) => Value::Array(items.iter().map(any_to_json).collect()),
        Any::Map(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), any_to_json(v))).collect()),
    }
}

fn map_to_json<T: ReadTxn>(txn: &T, map: &MapRef) -> Value {
    let mut obj = JsonMap::new();
    for (k, v) in map.iter(txn) {
        obj.insert(k.to_string(), yvalue_to_json(txn, v));
    }
    Value::Object(obj)
}

fn array_to_json<T: ReadTxn>(txn: &T, arr: &ArrayRef) -> Value {
    Value::Array(arr.iter(txn).map(|v| yvalue_to_json(txn, v)).collect())
}

fn yvalue_to_json<T: ReadTxn>(txn: &T, value: YValue) -> Value {
    match value {
        YValue::Any(any) => any_to_json(&any),
        YValue::YMap(m) => map_to_json(txn, &m),
        YValue::YArray(a) => array_to_json(txn, &a),
        YValue::YText(t) => Value::String(t.get_string(txn)),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page_schema() -> Schema {
        Schema::Object(vec![
            ("title".into(), Schema::Text),
            ("tags".into(), Schema::Array(Box::new(Schema::Primitive))),
            (
                "meta".into(),
                Schema::Record(Box::new(Schema::Primitive)),
            ),
            ("icon".into(), Schema::optional(Schema::Primitive)),
        ])
    }

    #[test]
    fn update_with_no_prior_state_populates_the_whole_object() {
        let mut doc = CrdtDocument::new();
        let update = doc
            .update(
                &page_schema(),
                &json!({"title": "Hello", "tags": ["a", "b"], "meta": {"pinned": true}}),
            )
            .unwrap();
        assert!(update.is_some());
        assert_eq!(
            doc.to_json(),
            json!({"title": "Hello", "tags": ["a", "b"], "meta": {"pinned": true}})
        );
    }

    #[test]
    fn repeating_the_same_update_produces_no_further_delta() {
        let mut doc = CrdtDocument::new();
        let value = json!({"title": "Hello", "tags": [], "meta": {}});
        doc.update(&page_schema(), &value).unwrap();
        let second = doc.update(&page_schema(), &value).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn text_field_diffs_instead_of_replacing() {
        let mut doc = CrdtDocument::new();
        doc.update(
            &page_schema(),
            &json!({"title": "hello world", "tags": [], "meta": {}}),
        )
        .unwrap();
        doc.update(
            &page_schema(),
            &json!({"title": "hello brave world", "tags": [], "meta": {}}),
        )
        .unwrap();
        assert_eq!(doc.to_json()["title"], json!("hello brave world"));
    }

    #[test]
    fn array_extension_and_truncation_converge() {
        let mut doc = CrdtDocument::new();
        doc.update(
            &page_schema(),
            &json!({"title": "x", "tags": ["a"], "meta": {}}),
        )
        .unwrap();
        doc.update(
            &page_schema(),
            &json!({"title": "x", "tags": ["a", "b", "c"], "meta": {}}),
        )
        .unwrap();
        assert_eq!(doc.to_json()["tags"], json!(["a", "b", "c"]));

        doc.update(&page_schema(), &json!({"title": "x", "tags": [], "meta": {}}))
            .unwrap();
        assert_eq!(doc.to_json()["tags"], json!([]));
    }

    #[test]
    fn invalid_input_is_rejected_without_mutating_the_document() {
        let mut doc = CrdtDocument::new();
        doc.update(&page_schema(), &json!({"title": "x", "tags": [], "meta": {}}))
            .unwrap();
        let before = doc.to_json();

        let err = doc.update(&page_schema(), &json!({"tags": []})).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(doc.to_json(), before);
    }

    #[test]
    fn two_replicas_converge_regardless_of_apply_order() {
        let mut a = CrdtDocument::new();
        let u1 = a
            .update(&page_schema(), &json!({"title": "a", "tags": [], "meta": {}}))
            .unwrap()
            .unwrap();
        let u2 = a
            .update(&page_schema(), &json!({"title": "ab", "tags": [], "meta": {}}))
            .unwrap()
            .unwrap();

        let mut replica_in_order = CrdtDocument::new();
        replica_in_order.apply_update(&u1, UpdateOrigin::Remote).unwrap();
        replica_in_order.apply_update(&u2, UpdateOrigin::Remote).unwrap();

        let mut replica_reordered = CrdtDocument::new();
        replica_reordered.apply_update(&u2, UpdateOrigin::Remote).unwrap();
        replica_reordered.apply_update(&u1, UpdateOrigin::Remote).unwrap();

        assert_eq!(replica_in_order.to_json(), replica_reordered.to_json());
        assert_eq!(replica_in_order.to_json(), a.to_json());
    }

    #[test]
    fn state_round_trips_through_from_updates() {
        let mut doc = CrdtDocument::new();
        let u1 = doc
            .update(&page_schema(), &json!({"title": "a", "tags": [], "meta": {}}))
            .unwrap()
            .unwrap();

        let rebuilt = CrdtDocument::from_updates(&[u1]).unwrap();
        assert_eq!(rebuilt.to_json(), doc.to_json());
    }

    #[test]
    fn undo_reverts_the_last_local_transaction_but_not_remote_ones() {
        let mut doc = CrdtDocument::new();
        doc.update(&page_schema(), &json!({"title": "a", "tags": [], "meta": {}}))
            .unwrap();
        doc.update(&page_schema(), &json!({"title": "ab", "tags": [], "meta": {}}))
            .unwrap();

        assert!(doc.undo());
        assert_eq!(doc.to_json()["title"], json!("a"));
    }

    #[test]
    fn explicit_null_on_an_optional_field_does_not_panic() {
        let mut doc = CrdtDocument::new();
        doc.update(
            &page_schema(),
            &json!({"title": "x", "tags": [], "meta": {}, "icon": "\u{1f4c4}"}),
        )
        .unwrap();

        doc.update(
            &page_schema(),
            &json!({"title": "x", "tags": [], "meta": {}, "icon": null}),
        )
        .unwrap();

        assert_eq!(doc.to_json()["icon"], Value::Null);
    }

    #[test]
    fn encoded_state_is_valid_base64() {
        let doc = CrdtDocument::new();
        let encoded = doc.encoded_state();
        use base64::Engine;
        assert!(base64::engine::general_purpose::STANDARD.decode(encoded).is_ok());
    }
}
