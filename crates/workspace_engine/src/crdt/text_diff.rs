//! Character-level diff for collaborative text fields (§4.1 "Collaborative text").
//!
//! Computes the minimal common-prefix/common-suffix split between the current
//! text and a new value, then applies exactly one delete and one insert to
//! the `yrs::TextRef`. This mirrors how a text field's diff is computed
//! against the rest of the object diff in the CRDT update algorithm.

use yrs::{GetString, Text, TextRef, TransactionMut};

/// Replace the content of `text` with `new_value`, emitting the smallest
/// possible delete+insert pair rather than clearing and rewriting the field.
///
/// Returns `true` if the text was actually changed.
pub fn apply_text_diff(txn: &mut TransactionMut, text: &TextRef, new_value: &str) -> bool {
    let current = text.get_string(txn);
    if current == new_value {
        return false;
    }

    let current_chars: Vec<char> = current.chars().collect();
    let new_chars: Vec<char> = new_value.chars().collect();

    let prefix_len = current_chars
        .iter()
        .zip(new_chars.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let max_suffix = (current_chars.len() - prefix_len).min(new_chars.len() - prefix_len);
    let suffix_len = (0..max_suffix)
        .take_while(|i| {
            current_chars[current_chars.len() - 1 - i] == new_chars[new_chars.len() - 1 - i]
        })
        .count();

    let delete_start = prefix_len;
    let delete_len = current_chars.len() - prefix_len - suffix_len;
    let insert_slice: String = new_chars[prefix_len..new_chars.len() - suffix_len]
        .iter()
        .collect();

    // Delete-then-insert at the same offset: removing first keeps the insert
    // index valid even when replacing the whole middle region.
    if delete_len > 0 {
        text.remove_range(txn, delete_start as u32, delete_len as u32);
    }
    if !insert_slice.is_empty() {
        text.insert(txn, delete_start as u32, &insert_slice);
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use yrs::{Doc, Transact};

    fn doc_with_text(initial: &str) -> (Doc, TextRef) {
        let doc = Doc::new();
        let text = doc.get_or_insert_text("content");
        {
            let mut txn = doc.transact_mut();
            text.insert(&mut txn, 0, initial);
        }
        (doc, text)
    }

    #[test]
    fn appending_a_word_produces_a_single_insert() {
        let (doc, text) = doc_with_text("hello world");
        {
            let mut txn = doc.transact_mut();
            let changed = apply_text_diff(&mut txn, &text, "hello brave world");
            assert!(changed);
        }
        let txn = doc.transact();
        assert_eq!(text.get_string(&txn), "hello brave world");
    }

    #[test]
    fn identical_value_is_a_no_op() {
        let (doc, text) = doc_with_text("same");
        let mut txn = doc.transact_mut();
        assert!(!apply_text_diff(&mut txn, &text, "same"));
    }

    #[test]
    fn full_replacement_deletes_and_inserts_the_whole_body() {
        let (doc, text) = doc_with_text("abc");
        {
            let mut txn = doc.transact_mut();
            apply_text_diff(&mut txn, &text, "xyz");
        }
        let txn = doc.transact();
        assert_eq!(text.get_string(&txn), "xyz");
    }

    #[test]
    fn truncation_is_a_pure_delete() {
        let (doc, text) = doc_with_text("hello world");
        {
            let mut txn = doc.transact_mut();
            apply_text_diff(&mut txn, &text, "hello");
        }
        let txn = doc.transact();
        assert_eq!(text.get_string(&txn), "hello");
    }
}
