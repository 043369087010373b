//! Pure helpers for reading and rewriting nested state
//!
//! Every state mutation in the runtime goes through [`set_in`], whose
//! no-op-on-equal short circuit is the basis for change detection: writing a
//! value that is already present returns the original state untouched, so
//! nothing downstream sees a change.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Result, RippleError};
use crate::value::{Path, Value};

/// Walk nested mappings by successive keys. Returns `None` on a missing key
/// or a non-indexable intermediate.
pub fn get_in<'a>(m: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut cur = m;
    for key in path {
        match cur {
            Value::Map(entries) => cur = entries.get(key)?,
            _ => return None,
        }
    }
    Some(cur)
}

/// Like [`get_in`], but yields `default` instead of `None`.
pub fn get_in_or(m: &Value, path: &[String], default: Value) -> Value {
    get_in(m, path).cloned().unwrap_or(default)
}

/// Copy-on-write set: returns a new value identical to `m` except that the
/// value at `path` is `v`. Intermediate mappings are created where absent or
/// of the wrong shape. If the existing value already equals `v`, `m` is
/// returned unchanged (same shared subtrees).
///
/// The root must be a mapping unless the path is empty, in which case `v`
/// replaces the whole value.
pub fn set_in(m: &Value, path: &[String], v: Value) -> Result<Value> {
    if path.is_empty() {
        return Ok(v);
    }
    if !m.is_map() {
        return Err(RippleError::TypeMismatch { found: m.kind() });
    }
    if get_in(m, path) == Some(&v) {
        return Ok(m.clone());
    }
    Ok(set_in_unchecked(m, path, v))
}

fn set_in_unchecked(m: &Value, path: &[String], v: Value) -> Value {
    match path {
        [] => v,
        [key, rest @ ..] => {
            let mut entries = match m {
                Value::Map(e) => e.as_ref().clone(),
                _ => BTreeMap::new(),
            };
            let child = if rest.is_empty() {
                v
            } else {
                let cur = entries.get(key).cloned().unwrap_or(Value::Null);
                set_in_unchecked(&cur, rest, v)
            };
            entries.insert(key.clone(), child);
            Value::Map(Arc::new(entries))
        }
    }
}

/// Copy-on-write delete: removes the entry at `path`. A missing path or an
/// empty path returns `m` unchanged.
pub fn delete_in(m: &Value, path: &[String]) -> Result<Value> {
    if !m.is_map() {
        return Err(RippleError::TypeMismatch { found: m.kind() });
    }
    if path.is_empty() || get_in(m, path).is_none() {
        return Ok(m.clone());
    }
    Ok(delete_in_unchecked(m, path))
}

fn delete_in_unchecked(m: &Value, path: &[String]) -> Value {
    match (m, path) {
        (Value::Map(e), [key]) => {
            let mut entries = e.as_ref().clone();
            entries.remove(key);
            Value::Map(Arc::new(entries))
        }
        (Value::Map(e), [key, rest @ ..]) => {
            let mut entries = e.as_ref().clone();
            if let Some(child) = entries.get(key) {
                let child = delete_in_unchecked(child, rest);
                entries.insert(key.clone(), child);
            }
            Value::Map(Arc::new(entries))
        }
        _ => m.clone(),
    }
}

/// One leaf present on only one side of a diff, or equal on both.
#[derive(Clone, Debug, PartialEq)]
pub struct DiffEntry {
    pub path: Path,
    pub value: Value,
}

/// One leaf present on both sides with differing values.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangedEntry {
    pub path: Path,
    pub old: Value,
    pub new: Value,
}

/// Structural difference between two nested values, partitioned four ways.
/// Each partition is sorted by path.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateDiff {
    /// Leaves reachable only in the old value
    pub only_old: Vec<DiffEntry>,
    /// Leaves reachable only in the new value
    pub only_new: Vec<DiffEntry>,
    /// Leaves present on both sides with equal values
    pub common_equal: Vec<DiffEntry>,
    /// Leaves present on both sides with differing values
    pub common_changed: Vec<ChangedEntry>,
}

impl StateDiff {
    /// True if the two values differ anywhere.
    pub fn is_changed(&self) -> bool {
        !self.only_old.is_empty() || !self.only_new.is_empty() || !self.common_changed.is_empty()
    }
}

/// Structural diff between two nested values. Mappings are recursed into;
/// sequences and scalars are compared as leaves.
pub fn diff(old: &Value, new: &Value) -> StateDiff {
    let mut acc = StateDiff::default();
    let mut prefix = Path::new();
    walk(old, new, &mut prefix, &mut acc);
    acc.only_old.sort_by(|a, b| a.path.cmp(&b.path));
    acc.only_new.sort_by(|a, b| a.path.cmp(&b.path));
    acc.common_equal.sort_by(|a, b| a.path.cmp(&b.path));
    acc.common_changed.sort_by(|a, b| a.path.cmp(&b.path));
    acc
}

fn walk(old: &Value, new: &Value, prefix: &mut Path, acc: &mut StateDiff) {
    match (old, new) {
        (Value::Map(a), Value::Map(b)) => {
            for (key, old_child) in a.iter() {
                prefix.push(key.clone());
                match b.get(key) {
                    Some(new_child) => walk(old_child, new_child, prefix, acc),
                    None => acc.only_old.push(DiffEntry {
                        path: prefix.clone(),
                        value: old_child.clone(),
                    }),
                }
                prefix.pop();
            }
            for (key, new_child) in b.iter() {
                if !a.contains_key(key) {
                    prefix.push(key.clone());
                    acc.only_new.push(DiffEntry {
                        path: prefix.clone(),
                        value: new_child.clone(),
                    });
                    prefix.pop();
                }
            }
        }
        _ if old == new => acc.common_equal.push(DiffEntry {
            path: prefix.clone(),
            value: old.clone(),
        }),
        _ => acc.common_changed.push(ChangedEntry {
            path: prefix.clone(),
            old: old.clone(),
            new: new.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{path, vmap};
    use std::sync::Arc;

    fn seed() -> Value {
        vmap! {
            "count" => 43,
            "devil" => vmap! { "beast" => 666, "adjesus" => 623 },
        }
    }

    #[test]
    fn test_get_in() {
        let m = seed();
        assert_eq!(get_in(&m, &path!["count"]), Some(&Value::Int(43)));
        assert_eq!(get_in(&m, &path!["devil", "beast"]), Some(&Value::Int(666)));
        assert_eq!(get_in(&m, &path!["devil", "horns"]), None);
        // scalar intermediate is not indexable
        assert_eq!(get_in(&m, &path!["count", "deeper"]), None);
        assert_eq!(
            get_in_or(&m, &path!["missing"], Value::Int(-1)),
            Value::Int(-1)
        );
    }

    #[test]
    fn test_set_then_get_roundtrip() {
        let m = seed();
        let p = path!["devil", "beast"];
        let m2 = set_in(&m, &p, Value::Int(421)).unwrap();
        assert_eq!(get_in(&m2, &p), Some(&Value::Int(421)));
        // original untouched
        assert_eq!(get_in(&m, &p), Some(&Value::Int(666)));
    }

    #[test]
    fn test_set_creates_intermediates() {
        let m = seed();
        let p = path!["a", "b", "c"];
        let m2 = set_in(&m, &p, Value::Int(1)).unwrap();
        assert_eq!(get_in(&m2, &p), Some(&Value::Int(1)));
        // a scalar in the way is replaced by a mapping
        let p2 = path!["count", "nested"];
        let m3 = set_in(&m, &p2, Value::Int(2)).unwrap();
        assert_eq!(get_in(&m3, &p2), Some(&Value::Int(2)));
    }

    #[test]
    fn test_set_noop_on_equal_returns_original() {
        let m = seed();
        let p = path!["devil", "beast"];
        let current = get_in(&m, &p).cloned().unwrap();
        let m2 = set_in(&m, &p, current).unwrap();
        assert_eq!(m, m2);
        // not just equal: the same shared container
        match (&m, &m2) {
            (Value::Map(a), Value::Map(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected maps"),
        }
    }

    #[test]
    fn test_set_on_non_map_root_is_type_mismatch() {
        let err = set_in(&Value::Int(1), &path!["k"], Value::Int(2)).unwrap_err();
        assert_eq!(err, RippleError::TypeMismatch { found: "int" });
    }

    #[test]
    fn test_empty_path_replaces_whole_value() {
        let m = seed();
        let v = set_in(&m, &[], Value::Int(9)).unwrap();
        assert_eq!(v, Value::Int(9));
    }

    #[test]
    fn test_delete_in() {
        let m = seed();
        let m2 = delete_in(&m, &path!["devil", "beast"]).unwrap();
        assert_eq!(get_in(&m2, &path!["devil", "beast"]), None);
        assert_eq!(get_in(&m2, &path!["devil", "adjesus"]), Some(&Value::Int(623)));
        // missing path is a no-op
        let m3 = delete_in(&m, &path!["no", "such"]).unwrap();
        assert_eq!(m3, m);
    }

    #[test]
    fn test_diff_partitions() {
        let old = vmap! { "a" => 1, "b" => vmap! { "c" => 2, "d" => 3 } };
        let new = vmap! { "a" => 1, "b" => vmap! { "c" => 9, "e" => 4 } };
        let d = diff(&old, &new);
        assert!(d.is_changed());
        assert_eq!(d.only_old.len(), 1);
        assert_eq!(d.only_old[0].path, path!["b", "d"]);
        assert_eq!(d.only_new.len(), 1);
        assert_eq!(d.only_new[0].path, path!["b", "e"]);
        assert_eq!(d.common_equal.len(), 1);
        assert_eq!(d.common_equal[0].path, path!["a"]);
        assert_eq!(d.common_changed.len(), 1);
        assert_eq!(d.common_changed[0].path, path!["b", "c"]);
        assert_eq!(d.common_changed[0].old, Value::Int(2));
        assert_eq!(d.common_changed[0].new, Value::Int(9));
    }

    #[test]
    fn test_diff_equal_values() {
        let m = seed();
        let d = diff(&m, &m.clone());
        assert!(!d.is_changed());
        assert_eq!(d.common_equal.len(), 3);
    }
}
