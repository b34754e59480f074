//! Applying directive operators to a cached entity.
//!
//! Operators act on the entity's JSON form. Field names may be dotted paths
//! (`lastReads.s1`) addressing nested objects.

use serde_json::{Map, Value};

use crate::errors::{SyncError, SyncResult};
use crate::models::{Directive, Entity};

/// Apply `directive` on top of `entity`, producing the updated copy. The
/// result carries `version = $version.after` when the directive is versioned.
pub fn apply_directive<T: Entity>(entity: &T, directive: &Directive) -> SyncResult<T> {
    let mut value = serde_json::to_value(entity)?;
    let Some(root) = value.as_object_mut() else {
        return Err(SyncError::Merge(format!(
            "{} {} does not serialize to an object",
            T::ENTITY_NAME,
            directive.id
        )));
    };

    for (operator, operand) in &directive.operations {
        let fields = operand.as_object().ok_or_else(|| {
            SyncError::Protocol(format!("{operator} operand is not an object: {operand}"))
        })?;
        for (path, arg) in fields {
            match operator.as_str() {
                "$set" => set_path(root, path, arg.clone())?,
                "$unset" => {
                    unset_path(root, path);
                }
                "$inc" => inc_path(root, path, arg)?,
                "$push" => push_path(root, path, arg, false)?,
                "$addToSet" => push_path(root, path, arg, true)?,
                "$pull" => pull_path(root, path, arg)?,
                other => {
                    return Err(SyncError::Protocol(format!(
                        "unknown directive operator {other} for {} {}",
                        T::ENTITY_NAME,
                        directive.id
                    )))
                }
            }
        }
    }

    if let Some(version) = directive.version {
        root.insert("version".to_string(), Value::from(version.after));
    }

    serde_json::from_value(value).map_err(|e| {
        SyncError::Merge(format!(
            "{} {} is malformed after directive: {e}",
            T::ENTITY_NAME,
            directive.id
        ))
    })
}

fn split_path(path: &str) -> (Vec<&str>, &str) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let leaf = parts.pop().unwrap_or(path);
    (parts, leaf)
}

/// Walk to the parent object of `path`, creating missing intermediate objects.
fn parent_mut<'a>(
    root: &'a mut Map<String, Value>,
    parents: &[&str],
) -> SyncResult<&'a mut Map<String, Value>> {
    let mut current = root;
    for part in parents {
        current = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| SyncError::Merge(format!("path segment {part} is not an object")))?;
    }
    Ok(current)
}

fn set_path(root: &mut Map<String, Value>, path: &str, value: Value) -> SyncResult<()> {
    let (parents, leaf) = split_path(path);
    parent_mut(root, &parents)?.insert(leaf.to_string(), value);
    Ok(())
}

fn unset_path(root: &mut Map<String, Value>, path: &str) -> Option<Value> {
    let (parents, leaf) = split_path(path);
    let mut current = root;
    for part in parents {
        current = current.get_mut(part)?.as_object_mut()?;
    }
    current.remove(leaf)
}

fn inc_path(root: &mut Map<String, Value>, path: &str, by: &Value) -> SyncResult<()> {
    let (parents, leaf) = split_path(path);
    let parent = parent_mut(root, &parents)?;
    let current = parent.get(leaf).cloned().unwrap_or(Value::from(0));
    let next = match (current.as_i64(), by.as_i64()) {
        (Some(a), Some(b)) => Value::from(a.checked_add(b).ok_or_else(|| {
            SyncError::Merge(format!("$inc overflows integer field {path}: {a} + {b}"))
        })?),
        _ => match (current.as_f64(), by.as_f64()) {
            (Some(a), Some(b)) => Value::from(a + b),
            _ => {
                return Err(SyncError::Merge(format!(
                    "$inc on non-numeric field {path}: {current} + {by}"
                )))
            }
        },
    };
    parent.insert(leaf.to_string(), next);
    Ok(())
}

/// Items an array operator applies: `{"$each": [...]}` or a single value.
fn operand_items(arg: &Value) -> Vec<Value> {
    match arg.get("$each").and_then(Value::as_array) {
        Some(items) => items.clone(),
        None => vec![arg.clone()],
    }
}

fn array_at<'a>(root: &'a mut Map<String, Value>, path: &str) -> SyncResult<&'a mut Vec<Value>> {
    let (parents, leaf) = split_path(path);
    let parent = parent_mut(root, &parents)?;
    let slot = parent
        .entry(leaf.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    slot.as_array_mut()
        .ok_or_else(|| SyncError::Merge(format!("array operator on non-array field {path}")))
}

fn push_path(root: &mut Map<String, Value>, path: &str, arg: &Value, unique: bool) -> SyncResult<()> {
    let array = array_at(root, path)?;
    for item in operand_items(arg) {
        if unique && array.contains(&item) {
            continue;
        }
        array.push(item);
    }
    Ok(())
}

fn pull_path(root: &mut Map<String, Value>, path: &str, arg: &Value) -> SyncResult<()> {
    let removals = match arg {
        Value::Array(items) => items.clone(),
        other => operand_items(other),
    };
    let array = array_at(root, path)?;
    array.retain(|item| !removals.contains(item));
    Ok(())
}
