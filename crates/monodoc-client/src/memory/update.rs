//! In-place document changes for update requests.

use monodoc_common::{
    DocError, Document, Result, ServerError, Value,
    ast::{DocumentPath, PathSegment},
    protocol::UpdateOperation,
};

use super::eval::{Scope, eval};
use crate::statement::ID_FIELD;

/// Apply `operations` in order. Each value expression sees the document
/// as left by the previous operation. Returns whether anything changed.
pub(crate) fn apply(doc: &mut Document, operations: &[UpdateOperation]) -> Result<bool> {
    if operations.is_empty() {
        return Err(DocError::server(
            ServerError::INVALID_UPDATE,
            "Invalid update expression list",
        ));
    }

    let before = doc.clone();
    let mut root = Value::Object(std::mem::take(doc));
    let result = operations.iter().try_for_each(|op| apply_one(&mut root, op));
    *doc = match root {
        Value::Object(updated) if result.is_ok() => updated,
        _ => before.clone(),
    };
    result?;
    Ok(*doc != before)
}

fn apply_one(root: &mut Value, operation: &UpdateOperation) -> Result<()> {
    match operation {
        UpdateOperation::Set { path, value } if path.is_root() => {
            let Value::Object(mut replacement) = eval(value, &Scope::Row(root))? else {
                return Err(invalid_update("Replacement must be a JSON object"));
            };
            let id = root.get(ID_FIELD).cloned();
            replacement.shift_remove(ID_FIELD);
            if let Some(id) = id {
                replacement.shift_insert(0, ID_FIELD.to_string(), id);
            }
            *root = Value::Object(replacement);
        }
        UpdateOperation::Set { path, value } => {
            let value = eval(value, &Scope::Row(root))?;
            set_at(root, writable(path)?, value, true);
        }
        UpdateOperation::Change { path, value } => {
            let value = eval(value, &Scope::Row(root))?;
            set_at(root, writable(path)?, value, false);
        }
        UpdateOperation::Unset { path } => {
            remove_at(root, writable(path)?);
        }
        UpdateOperation::MergePatch { patch } => {
            let mut patch = patch.clone();
            if let Value::Object(fields) = &mut patch {
                fields.shift_remove(ID_FIELD);
            }
            merge_patch(root, &patch);
        }
        UpdateOperation::ArrayInsert { path, value } => {
            let value = eval(value, &Scope::Row(root))?;
            let segments = writable(path)?;
            if let Some((PathSegment::Index(i), parent)) = segments.split_last()
                && let Some(Value::Array(items)) = get_mut(root, parent)
            {
                let at = (*i as usize).min(items.len());
                items.insert(at, value);
            }
        }
        UpdateOperation::ArrayAppend { path, value } => {
            let value = eval(value, &Scope::Row(root))?;
            match get_mut(root, writable(path)?) {
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let scalar = std::mem::take(existing);
                    *existing = Value::Array(vec![scalar, value]);
                }
                None => {}
            }
        }
    }
    Ok(())
}

fn invalid_update(message: &str) -> DocError {
    DocError::server(ServerError::INVALID_UPDATE, message)
}

/// Segments of a path an update may write through.
fn writable(path: &DocumentPath) -> Result<&[PathSegment]> {
    if path.segments.first() == Some(&PathSegment::Member(ID_FIELD.to_string())) {
        return Err(DocError::server(
            ServerError::FORBIDDEN_ID_UPDATE,
            "Forbidden update operation on '$._id' member",
        ));
    }
    if !path.is_exact() {
        return Err(invalid_update("Update paths may not contain wildcards"));
    }
    Ok(&path.segments)
}

fn get_mut<'v>(root: &'v mut Value, segments: &[PathSegment]) -> Option<&'v mut Value> {
    segments.iter().try_fold(root, |current, segment| match segment {
        PathSegment::Member(name) => current.as_object_mut()?.get_mut(name),
        PathSegment::Index(i) => match current {
            Value::Array(items) => items.get_mut(*i as usize),
            _ => None,
        },
        _ => None,
    })
}

/// Write `value` at `segments`. With `create`, missing members (including
/// intermediate objects) are added and an index past the end appends.
fn set_at(root: &mut Value, segments: &[PathSegment], value: Value, create: bool) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = root;
    for segment in parents {
        let next = match segment {
            PathSegment::Member(name) => match current {
                Value::Object(doc) => {
                    if create {
                        Some(
                            doc.entry(name.clone())
                                .or_insert_with(|| Value::Object(Document::new())),
                        )
                    } else {
                        doc.get_mut(name)
                    }
                }
                _ => None,
            },
            PathSegment::Index(i) => match current {
                Value::Array(items) => items.get_mut(*i as usize),
                _ => None,
            },
            _ => None,
        };
        let Some(next) = next else {
            return;
        };
        current = next;
    }

    match (last, current) {
        (PathSegment::Member(name), Value::Object(doc)) => {
            if let Some(slot) = doc.get_mut(name) {
                *slot = value;
            } else if create {
                doc.insert(name.clone(), value);
            }
        }
        (PathSegment::Index(i), Value::Array(items)) => {
            let i = *i as usize;
            if i < items.len() {
                items[i] = value;
            } else if create {
                items.push(value);
            }
        }
        _ => {}
    }
}

fn remove_at(root: &mut Value, segments: &[PathSegment]) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    match (last, get_mut(root, parents)) {
        (PathSegment::Member(name), Some(Value::Object(doc))) => {
            doc.shift_remove(name);
        }
        (PathSegment::Index(i), Some(Value::Array(items))) if (*i as usize) < items.len() => {
            items.remove(*i as usize);
        }
        _ => {}
    }
}

/// JSON merge patch: object members merge recursively, `null` removes a
/// member and anything else replaces the target.
pub(crate) fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(fields) = patch else {
        *target = patch.clone();
        return;
    };
    if !matches!(target, Value::Object(_)) {
        *target = Value::Object(Document::new());
    }
    let Value::Object(doc) = target else {
        return;
    };
    for (key, value) in fields {
        if value.is_null() {
            doc.shift_remove(key);
        } else {
            merge_patch(doc.entry(key.clone()).or_insert(Value::Null), value);
        }
    }
}
