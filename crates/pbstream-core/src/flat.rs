//! Conversion between value trees and flat `path = value` lists.
//!
//! Paths join field names and sequence indices with dots: the first element
//! of `items` inside `order` is `order.items.0`. Only leaves are listed, so
//! empty messages and sequences do not survive a round trip.

use crate::error::{Error, Result};
use crate::value::{Message, Value};

/// Lists the leaves of `value` with their dotted paths.
///
/// Message fields come in name order and sequence elements in index order.
/// A non-container `value` yields a single entry with an empty path.
pub fn flatten(value: &Value) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    flatten_into(value, String::new(), &mut out);
    out
}

fn flatten_into(value: &Value, path: String, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Message(fields) => {
            for (name, field) in fields {
                flatten_into(field, join(&path, name), out);
            }
        }
        Value::List(items) => {
            for (index, item) in items.iter().enumerate() {
                flatten_into(item, join(&path, &index.to_string()), out);
            }
        }
        leaf => out.push((path, leaf.clone())),
    }
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", path, segment)
    }
}

/// Rebuilds a message value from dotted paths.
///
/// A numeric segment following a path makes that path a sequence. Indices
/// must address an existing element or the next one to append, as the
/// paths from [`flatten`] do. A later entry for the same path replaces an
/// earlier one. A path that needs a container where a leaf already sits,
/// the reverse, or an index past the end fails with [`Error::PathConflict`].
pub fn unflatten<K, I>(entries: I) -> Result<Value>
where
    K: AsRef<str>,
    I: IntoIterator<Item = (K, Value)>,
{
    let mut root = Value::Message(Message::new());
    for (path, value) in entries {
        let path = path.as_ref();
        let segments: Vec<&str> = path.split('.').collect();
        insert(&mut root, &segments, value, path)?;
    }
    Ok(root)
}

fn insert(node: &mut Value, segments: &[&str], value: Value, path: &str) -> Result<()> {
    let conflict = || Error::PathConflict {
        path: path.to_string(),
    };
    let Some((head, rest)) = segments.split_first() else {
        return Err(conflict());
    };

    let slot = match node {
        Value::Message(fields) => fields.entry(head.to_string()).or_default(),
        Value::List(items) => {
            let index: usize = head.parse().map_err(|_| conflict())?;
            if index == items.len() {
                items.push(Value::Absent);
            }
            items.get_mut(index).ok_or_else(conflict)?
        }
        _ => return Err(conflict()),
    };

    let Some(next) = rest.first() else {
        if matches!(slot, Value::Message(_) | Value::List(_)) {
            return Err(conflict());
        }
        *slot = value;
        return Ok(());
    };

    if slot.is_absent() {
        *slot = if next.parse::<usize>().is_ok() {
            Value::List(Vec::new())
        } else {
            Value::Message(Message::new())
        };
    }
    insert(slot, rest, value, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Value {
        Value::message([
            (
                "a",
                Value::message([(
                    "b",
                    Value::message([("c", Value::Int(42)), ("d", Value::Int(43))]),
                )]),
            ),
            (
                "d",
                Value::message([(
                    "e",
                    Value::message([
                        ("f", Value::List(vec![Value::Int(10), Value::Int(20), Value::Int(30)])),
                        ("g", Value::Int(12)),
                    ]),
                )]),
            ),
        ])
    }

    #[test]
    fn test_flatten() {
        let flat = flatten(&sample());
        let paths: Vec<&str> = flat.iter().map(|(path, _)| path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["a.b.c", "a.b.d", "d.e.f.0", "d.e.f.1", "d.e.f.2", "d.e.g"]
        );
        assert_eq!(flat[3].1, Value::Int(20));
    }

    #[test]
    fn test_unflatten_inverts_flatten() {
        assert_eq!(unflatten(flatten(&sample())).unwrap(), sample());
    }

    #[test]
    fn test_sequence_indices() {
        let value = unflatten([
            ("xs.0", Value::Int(1)),
            ("xs.1", Value::Int(2)),
            ("xs.0", Value::Int(3)),
        ])
        .unwrap();
        assert_eq!(
            value.get("xs"),
            Some(&Value::List(vec![Value::Int(3), Value::Int(2)]))
        );

        let err = unflatten([("xs.0", Value::Int(1)), ("xs.2", Value::Int(3))]).unwrap_err();
        assert!(matches!(err, Error::PathConflict { path } if path == "xs.2"));
    }

    #[test]
    fn test_huge_index_rejected() {
        for path in ["xs.18446744073709551615", "xs.5000000000", "xs.99999999999999999999999"] {
            let err = unflatten([(path, Value::Int(1))]).unwrap_err();
            assert!(matches!(err, Error::PathConflict { .. }), "{path}");
        }
    }

    #[test]
    fn test_sequence_of_messages() {
        let value = unflatten([
            ("items.0.id", Value::UInt(1)),
            ("items.1.id", Value::UInt(2)),
            ("items.0.name", Value::from("first")),
        ])
        .unwrap();
        assert_eq!(value.get_path("items.0.name"), Some(&Value::from("first")));
        assert_eq!(value.get_path("items.1.id"), Some(&Value::UInt(2)));
    }

    #[test]
    fn test_conflicts() {
        let err = unflatten([("a", Value::Int(1)), ("a.b", Value::Int(2))]).unwrap_err();
        assert!(matches!(err, Error::PathConflict { path } if path == "a.b"));

        assert!(unflatten([("a.b", Value::Int(1)), ("a", Value::Int(2))]).is_err());
        assert!(unflatten([("xs.0", Value::Int(1)), ("xs.name", Value::Int(2))]).is_err());
    }

    #[test]
    fn test_scalar_root() {
        assert_eq!(flatten(&Value::Int(7)), vec![(String::new(), Value::Int(7))]);
    }
}
