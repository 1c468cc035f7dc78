//! Dot-path utilities over JSON trees.
//!
//! Pure functions for addressing into `serde_json::Value` trees with
//! dot-notation paths (`"a.b.c"`). The empty path `""` and the literal
//! `"."` both address the root. Arrays are traversed by numeric segment
//! on read; intermediate *maps* are created on write.
//!
//! [`extract`] is the workhorse of the offload pipeline: it splits a tool
//! response into the values to vault and a residual to keep inline. It is
//! a pure function of its inputs — the residual and the extracted values
//! are fresh deep clones, and mutating either never alters the original.

use serde_json::{Map, Value};

use crate::error::{Result, VaultError};

/// Returns true when `path` addresses the root of the tree.
pub fn is_root(path: &str) -> bool {
    path.is_empty() || path == "."
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|s| !s.is_empty())
}

/// Read the value at `path`, or `None` if any intermediate is missing.
///
/// Maps are traversed by key; arrays by numeric index. The root path
/// returns the value itself.
pub fn get<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if is_root(path) {
        return Some(value);
    }
    let mut current = value;
    for seg in segments(path) {
        current = match current {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set the value at `path`, creating intermediate maps as needed.
///
/// Non-map intermediates (including arrays) are replaced by maps, which
/// matches the write semantics of the offload pipeline: preserve-path
/// rebuilds only ever address map members.
///
/// # Errors
///
/// `ValidationError` when `path` addresses the root.
pub fn set(target: &mut Value, path: &str, new_value: Value) -> Result<()> {
    if is_root(path) {
        return Err(VaultError::ValidationError(
            "cannot set the root path".to_string(),
        ));
    }
    let parts: Vec<&str> = segments(path).collect();
    let mut current = target;
    for (i, seg) in parts.iter().enumerate() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let map = current.as_object_mut().expect("just ensured object");
        if i == parts.len() - 1 {
            map.insert(seg.to_string(), new_value);
            return Ok(());
        }
        current = map
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    Ok(())
}

/// Delete the value at `path`. Missing paths are a no-op.
///
/// # Errors
///
/// `ValidationError` when `path` addresses the root.
pub fn delete(target: &mut Value, path: &str) -> Result<()> {
    if is_root(path) {
        return Err(VaultError::ValidationError(
            "cannot delete the root path".to_string(),
        ));
    }
    let parts: Vec<&str> = segments(path).collect();
    let Some((last, parents)) = parts.split_last() else {
        return Ok(());
    };

    let mut current = target;
    for seg in parents {
        current = match current {
            Value::Object(map) => match map.get_mut(*seg) {
                Some(next) => next,
                None => return Ok(()),
            },
            Value::Array(items) => match seg.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                Some(next) => next,
                None => return Ok(()),
            },
            _ => return Ok(()),
        };
    }

    match current {
        Value::Object(map) => {
            map.remove(*last);
        }
        Value::Array(items) => {
            if let Ok(i) = last.parse::<usize>() {
                if i < items.len() {
                    items.remove(i);
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Split a response into extracted values and an inline residual.
///
/// Returns `(extracted, residual)` where `extracted` maps each extract
/// path to a deep clone of the value found there (paths that resolve to
/// nothing are simply absent), and `residual` is what remains for the
/// LLM's context:
///
/// - With no extract paths, the residual is the original response and
///   the extracted map is empty.
/// - When any extract path is the root, the residual is rebuilt to
///   contain only the preserve paths.
/// - When preserve paths are given (and no extract path is the root),
///   the residual is likewise rebuilt fresh from only those paths.
/// - Otherwise the residual is a deep clone with each extracted path
///   deleted in place.
///
/// Cloning a `serde_json::Value` is inherently deep, and cyclic values
/// are unrepresentable, so the inputs are never mutated and the clone
/// step cannot loop.
pub fn extract(
    response: &Value,
    extract_paths: &[String],
    preserve_paths: &[String],
) -> Result<(Vec<(String, Value)>, Value)> {
    if extract_paths.is_empty() {
        return Ok((Vec::new(), response.clone()));
    }

    let mut extracted = Vec::with_capacity(extract_paths.len());
    for path in extract_paths {
        if let Some(found) = get(response, path) {
            extracted.push((path.clone(), found.clone()));
        }
    }

    let any_root = extract_paths.iter().any(|p| is_root(p));

    let residual = if any_root || !preserve_paths.is_empty() {
        // Rebuild from scratch: only the preserve paths survive inline.
        let mut rebuilt = Value::Object(Map::new());
        for path in preserve_paths {
            if is_root(path) {
                continue;
            }
            if let Some(found) = get(response, path) {
                set(&mut rebuilt, path, found.clone())?;
            }
        }
        rebuilt
    } else {
        let mut clone = response.clone();
        for path in extract_paths {
            delete(&mut clone, path)?;
        }
        clone
    };

    Ok((extracted, residual))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_nested() {
        let v = json!({"a": {"b": {"c": 42}}});
        assert_eq!(get(&v, "a.b.c"), Some(&json!(42)));
        assert_eq!(get(&v, "a.b.missing"), None);
        assert_eq!(get(&v, "a.x.c"), None);
    }

    #[test]
    fn test_get_root() {
        let v = json!({"a": 1});
        assert_eq!(get(&v, ""), Some(&v));
        assert_eq!(get(&v, "."), Some(&v));
    }

    #[test]
    fn test_get_array_index() {
        let v = json!({"items": [{"id": 1}, {"id": 2}]});
        assert_eq!(get(&v, "items.1.id"), Some(&json!(2)));
        assert_eq!(get(&v, "items.5"), None);
        assert_eq!(get(&v, "items.x"), None);
    }

    #[test]
    fn test_set_creates_intermediates() {
        let mut v = json!({});
        set(&mut v, "a.b.c", json!(1)).unwrap();
        assert_eq!(v, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn test_set_refuses_root() {
        let mut v = json!({});
        assert!(set(&mut v, "", json!(1)).is_err());
        assert!(set(&mut v, ".", json!(1)).is_err());
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let mut v = json!({"a": 1});
        delete(&mut v, "b.c").unwrap();
        assert_eq!(v, json!({"a": 1}));
    }

    #[test]
    fn test_delete_refuses_root() {
        let mut v = json!({"a": 1});
        assert!(delete(&mut v, "").is_err());
    }

    #[test]
    fn test_delete_removes_leaf() {
        let mut v = json!({"a": {"b": 1, "c": 2}});
        delete(&mut v, "a.b").unwrap();
        assert_eq!(v, json!({"a": {"c": 2}}));
    }

    #[test]
    fn test_extract_empty_paths_is_identity() {
        let v = json!({"a": 1, "b": [1, 2, 3]});
        let (extracted, residual) = extract(&v, &[], &["a".into()]).unwrap();
        assert!(extracted.is_empty());
        assert_eq!(residual, v);
    }

    #[test]
    fn test_extract_deletes_from_residual() {
        let v = json!({"status": "ok", "data": {"rows": [1, 2]}});
        let (extracted, residual) = extract(&v, &["data.rows".to_string()], &[]).unwrap();
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].0, "data.rows");
        assert_eq!(extracted[0].1, json!([1, 2]));
        assert_eq!(residual, json!({"status": "ok", "data": {}}));
    }

    #[test]
    fn test_extract_preserve_paths_rebuild() {
        let v = json!({"status": "ok", "meta": {"page": 1}, "data": {"rows": [1]}});
        let (_, residual) = extract(
            &v,
            &["data.rows".to_string()],
            &["status".to_string(), "meta".to_string()],
        )
        .unwrap();
        assert_eq!(residual, json!({"status": "ok", "meta": {"page": 1}}));
    }

    #[test]
    fn test_extract_root_keeps_only_preserved() {
        let v = json!({"status": "ok", "rows": [1, 2, 3]});
        let (extracted, residual) =
            extract(&v, &["".to_string()], &["status".to_string()]).unwrap();
        assert_eq!(extracted[0].1, v);
        assert_eq!(residual, json!({"status": "ok"}));
    }

    #[test]
    fn test_extract_never_mutates_input() {
        let v = json!({"a": {"b": [1, 2]}, "keep": true});
        let original = v.clone();
        let (mut extracted, mut residual) =
            extract(&v, &["a.b".to_string()], &["keep".to_string()]).unwrap();
        // Mutate both outputs; the input must be untouched.
        residual["keep"] = json!(false);
        extracted[0].1 = json!("clobbered");
        assert_eq!(v, original);
    }

    #[test]
    fn test_extract_unresolved_path_absent() {
        let v = json!({"a": 1});
        let (extracted, residual) = extract(&v, &["nope.x".to_string()], &[]).unwrap();
        assert!(extracted.is_empty());
        assert_eq!(residual, json!({"a": 1}));
    }
}
