//! Property-based test generators using proptest.

use crate::fixtures::book;
use proptest::prelude::*;
use stashdb_codec::{Key, Value};
use std::collections::BTreeMap;

/// Strategy for valid keys: finite numbers, strings, byte strings and
/// shallow arrays of those.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    let leaf = prop_oneof![
        (-1.0e9f64..1.0e9).prop_map(Key::Number),
        any::<i32>().prop_map(Key::from),
        "[a-z0-9]{0,12}".prop_map(Key::Text),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(Key::Binary),
    ];
    leaf.prop_recursive(2, 16, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(Key::Array)
    })
}

/// Strategy for record values.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[ -~]{0,24}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(Value::Bytes),
    ];
    leaf.prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Map),
        ]
    })
}

/// Strategy for object store names.
pub fn store_name_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_]{0,15}"
}

/// Strategy for one `(isbn, title)` book record.
pub fn book_strategy() -> impl Strategy<Value = (String, Value)> {
    ("[0-9]{3,10}", "[A-Za-z ]{1,20}").prop_map(|(isbn, title)| {
        let value = book(&isbn, &title);
        (isbn, value)
    })
}

/// Strategy for up to `max` books with distinct ISBNs, in ISBN order.
pub fn books_strategy(max: usize) -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::vec(book_strategy(), 0..=max).prop_map(|books| {
        books
            .into_iter()
            .collect::<BTreeMap<_, _>>()
            .into_iter()
            .collect()
    })
}
