//! Expression evaluation against stored documents.

use std::cmp::Ordering;

use monodoc_common::{
    DocError, Document, Result, ServerError, Value,
    ast::{BinaryOp, DocumentPath, Expr, ListForm, PathSegment, UnaryOp, is_aggregate},
};
use regex::Regex;
use smallvec::{SmallVec, smallvec};

/// What field references resolve against.
pub(crate) enum Scope<'a> {
    Row(&'a Value),
    /// A group of rows. Single-member paths naming a projected alias
    /// resolve to the alias value.
    Group {
        rows: &'a [Value],
        aliases: Option<&'a Document>,
    },
}

type Matches<'v> = SmallVec<[&'v Value; 4]>;

/// Every value addressed by `segments`, in document order.
pub(crate) fn resolve<'v>(root: &'v Value, segments: &[PathSegment]) -> Matches<'v> {
    let mut current: Matches<'v> = smallvec![root];
    for segment in segments {
        let mut next = Matches::new();
        for value in current {
            match segment {
                PathSegment::Member(name) => next.extend(value.get(name)),
                PathSegment::MemberWildcard => {
                    if let Value::Object(doc) = value {
                        next.extend(doc.values());
                    }
                }
                PathSegment::Index(i) => match value {
                    Value::Array(items) => next.extend(items.get(*i as usize)),
                    // a scalar behaves as a one-element array
                    other if *i == 0 => next.push(other),
                    _ => {}
                },
                PathSegment::IndexWildcard => {
                    if let Value::Array(items) = value {
                        next.extend(items.iter());
                    }
                }
                PathSegment::DoubleWildcard => descendants(value, &mut next),
            }
        }
        current = next;
    }
    current
}

fn descendants<'v>(value: &'v Value, out: &mut Matches<'v>) {
    out.push(value);
    match value {
        Value::Array(items) => items.iter().for_each(|v| descendants(v, out)),
        Value::Object(doc) => doc.values().for_each(|v| descendants(v, out)),
        _ => {}
    }
}

/// Value of a field reference. Wildcard paths collect their matches into
/// an array; a missing field is null.
pub(crate) fn field_value(root: &Value, path: &DocumentPath) -> Value {
    let matches = resolve(root, &path.segments);
    if path.is_exact() {
        return matches.first().map(|v| (*v).clone()).unwrap_or_default();
    }
    if matches.is_empty() {
        Value::Null
    } else {
        Value::Array(matches.into_iter().cloned().collect())
    }
}

pub(crate) fn eval(expr: &Expr, scope: &Scope<'_>) -> Result<Value> {
    match expr {
        Expr::Literal { value } => Ok(value.clone()),

        Expr::Field { path } => Ok(match scope {
            Scope::Row(row) => field_value(row, path),
            Scope::Group { rows, aliases } => {
                let alias = match (aliases, path.segments.as_slice()) {
                    (Some(aliases), [PathSegment::Member(name)]) => aliases.get(name),
                    _ => None,
                };
                match (alias, rows.first()) {
                    (Some(value), _) => value.clone(),
                    (None, Some(row)) => field_value(row, path),
                    (None, None) => Value::Null,
                }
            }
        }),

        Expr::Placeholder { name, .. } => Err(DocError::Bind(format!(
            "Placeholder ':{name}' has no bound value"
        ))),

        Expr::Star => Err(DocError::server(
            ServerError::PARAM_COUNT,
            "'*' is only valid as the argument of count()",
        )),

        Expr::Unary { op, operand } => {
            let value = eval(operand, scope)?;
            Ok(eval_unary_op(*op, &value))
        }

        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => {
            let l = eval(left, scope)?;
            if !l.is_null() && !l.is_truthy() {
                return Ok(Value::Bool(false));
            }
            let r = eval(right, scope)?;
            Ok(match (l.is_null(), r.is_null()) {
                _ if !r.is_null() && !r.is_truthy() => Value::Bool(false),
                (false, false) => Value::Bool(true),
                _ => Value::Null,
            })
        }

        Expr::Binary {
            op: BinaryOp::Or,
            left,
            right,
        } => {
            let l = eval(left, scope)?;
            if l.is_truthy() {
                return Ok(Value::Bool(true));
            }
            let r = eval(right, scope)?;
            Ok(if r.is_truthy() {
                Value::Bool(true)
            } else if l.is_null() || r.is_null() {
                Value::Null
            } else {
                Value::Bool(false)
            })
        }

        Expr::Binary { op, left, right } => {
            let l = eval(left, scope)?;
            let r = eval(right, scope)?;
            Ok(eval_binary_op(&l, *op, &r))
        }

        Expr::Call { name, args } => {
            let function = name.name.to_ascii_lowercase();
            if is_aggregate(&function) {
                return match scope {
                    Scope::Group { rows, .. } => compute_aggregate(&function, args, rows),
                    Scope::Row(_) => Err(DocError::server(
                        ServerError::INVALID_GROUP_FUNCTION,
                        "Invalid use of group function",
                    )),
                };
            }
            let values = args
                .iter()
                .map(|arg| eval(arg, scope))
                .collect::<Result<Vec<_>>>()?;
            eval_function(&function, &values)
        }

        Expr::In {
            target,
            list,
            negated,
            form,
        } => {
            let target = eval(target, scope)?;
            if target.is_null() {
                return Ok(Value::Null);
            }
            let found = match form {
                ListForm::Container => {
                    let Some(container) = list.first() else {
                        return Ok(Value::Null);
                    };
                    let container = eval(container, scope)?;
                    if container.is_null() {
                        return Ok(Value::Null);
                    }
                    contains(&container, &target)
                }
                ListForm::Paren | ListForm::Bracket => {
                    let mut found = false;
                    for item in list {
                        if eval(item, scope)?.loosely_equals(&target) {
                            found = true;
                            break;
                        }
                    }
                    found
                }
            };
            Ok(Value::Bool(found != *negated))
        }

        Expr::Overlaps {
            left,
            right,
            negated,
        } => {
            let l = eval(left, scope)?;
            let r = eval(right, scope)?;
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            Ok(Value::Bool(overlaps(&l, &r) != *negated))
        }

        Expr::Like {
            target,
            pattern,
            escape,
            negated,
        } => {
            let target = eval(target, scope)?;
            let pattern = eval(pattern, scope)?;
            if target.is_null() || pattern.is_null() {
                return Ok(Value::Null);
            }
            let escape = match escape {
                Some(escape) => text_of(&eval(escape, scope)?).chars().next(),
                None => Some('\\'),
            };
            let matched = like_match(&text_of(&target), &text_of(&pattern), escape)?;
            Ok(Value::Bool(matched != *negated))
        }

        Expr::Between {
            target,
            low,
            high,
            negated,
        } => {
            let target = eval(target, scope)?;
            let low = eval(low, scope)?;
            let high = eval(high, scope)?;
            if target.is_null() || low.is_null() || high.is_null() {
                return Ok(Value::Null);
            }
            let within = matches!(
                target.partial_compare(&low),
                Some(Ordering::Greater | Ordering::Equal)
            ) && matches!(
                target.partial_compare(&high),
                Some(Ordering::Less | Ordering::Equal)
            );
            Ok(Value::Bool(within != *negated))
        }

        Expr::Is {
            target,
            value,
            negated,
        } => {
            let target = eval(target, scope)?;
            let matched = match eval(value, scope)? {
                Value::Null => target.is_null(),
                Value::Bool(true) => target.is_truthy(),
                Value::Bool(false) => !target.is_null() && !target.is_truthy(),
                other => target.loosely_equals(&other),
            };
            Ok(Value::Bool(matched != *negated))
        }

        Expr::Regexp {
            target,
            pattern,
            negated,
        } => {
            let target = eval(target, scope)?;
            let pattern = eval(pattern, scope)?;
            if target.is_null() || pattern.is_null() {
                return Ok(Value::Null);
            }
            let regex = Regex::new(&text_of(&pattern)).map_err(|e| {
                DocError::server(
                    ServerError::INVALID_REGEXP,
                    format!("Illegal argument to a regular expression: {e}"),
                )
            })?;
            Ok(Value::Bool(regex.is_match(&text_of(&target)) != *negated))
        }

        Expr::Array { items } => Ok(Value::Array(
            items
                .iter()
                .map(|item| eval(item, scope))
                .collect::<Result<_>>()?,
        )),

        Expr::Object { fields } => {
            let mut doc = Document::with_capacity(fields.len());
            for (key, value) in fields {
                doc.insert(key.clone(), eval(value, scope)?);
            }
            Ok(Value::Object(doc))
        }
    }
}

/// Convenience for filters: true only when the condition is truthy.
pub(crate) fn matches_row(filter: Option<&Expr>, row: &Value) -> Result<bool> {
    match filter {
        Some(filter) => Ok(eval(filter, &Scope::Row(row))?.is_truthy()),
        None => Ok(true),
    }
}

/// Strings render bare, everything else as JSON.
pub(crate) fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(Number::Int(*i)),
            Value::UInt(u) => Some(Number::Float(*u as f64)),
            Value::Float(f) => Some(Number::Float(*f)),
            Value::Bool(b) => Some(Number::Int(i64::from(*b))),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .map(Number::Int)
                    .or_else(|_| s.parse::<f64>().map(Number::Float))
                    .ok()
            }
            _ => None,
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            Number::Int(i) => *i as f64,
            Number::Float(f) => *f,
        }
    }

    fn as_i64(&self) -> i64 {
        match self {
            Number::Int(i) => *i,
            Number::Float(f) => *f as i64,
        }
    }
}

fn arithmetic(
    l: Number,
    r: Number,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Value {
    match (l, r) {
        (Number::Int(a), Number::Int(b)) => int_op(a, b)
            .map(Value::Int)
            .unwrap_or_else(|| Value::Float(float_op(a as f64, b as f64))),
        (a, b) => Value::Float(float_op(a.as_f64(), b.as_f64())),
    }
}

fn eval_binary_op(left: &Value, op: BinaryOp, right: &Value) -> Value {
    if left.is_null() || right.is_null() {
        return Value::Null;
    }

    if op.is_comparison() {
        let result = match op {
            BinaryOp::Eq => left.loosely_equals(right),
            BinaryOp::NotEq => !left.loosely_equals(right),
            _ => match left.partial_compare(right) {
                Some(ord) => match op {
                    BinaryOp::Lt => ord == Ordering::Less,
                    BinaryOp::LtEq => ord != Ordering::Greater,
                    BinaryOp::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                },
                None => false,
            },
        };
        return Value::Bool(result);
    }

    let (Some(l), Some(r)) = (Number::of(left), Number::of(right)) else {
        return Value::Null;
    };
    match op {
        BinaryOp::Add => arithmetic(l, r, i64::checked_add, |a, b| a + b),
        BinaryOp::Sub => arithmetic(l, r, i64::checked_sub, |a, b| a - b),
        BinaryOp::Mul => arithmetic(l, r, i64::checked_mul, |a, b| a * b),
        BinaryOp::Div => {
            let divisor = r.as_f64();
            if divisor == 0.0 {
                Value::Null
            } else {
                Value::Float(l.as_f64() / divisor)
            }
        }
        BinaryOp::Mod => {
            if r.as_f64() == 0.0 {
                Value::Null
            } else {
                arithmetic(l, r, i64::checked_rem, |a, b| a % b)
            }
        }
        BinaryOp::BitAnd => Value::Int(l.as_i64() & r.as_i64()),
        BinaryOp::BitOr => Value::Int(l.as_i64() | r.as_i64()),
        BinaryOp::BitXor => Value::Int(l.as_i64() ^ r.as_i64()),
        BinaryOp::Shl => Value::Int(shift(l.as_i64(), r.as_i64(), i64::checked_shl)),
        BinaryOp::Shr => Value::Int(shift(l.as_i64(), r.as_i64(), i64::checked_shr)),
        // logical and comparison operators are handled above
        _ => Value::Null,
    }
}

fn shift(value: i64, by: i64, op: fn(i64, u32) -> Option<i64>) -> i64 {
    u32::try_from(by)
        .ok()
        .and_then(|by| op(value, by))
        .unwrap_or(0)
}

fn eval_unary_op(op: UnaryOp, value: &Value) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    match op {
        UnaryOp::Not => Value::Bool(!value.is_truthy()),
        UnaryOp::Neg => match Number::of(value) {
            Some(Number::Int(i)) => i
                .checked_neg()
                .map(Value::Int)
                .unwrap_or(Value::Float(-(i as f64))),
            Some(Number::Float(f)) => Value::Float(-f),
            None => Value::Null,
        },
        UnaryOp::BitNot => match Number::of(value) {
            Some(n) => Value::Int(!n.as_i64()),
            None => Value::Null,
        },
    }
}

fn eval_function(name: &str, args: &[Value]) -> Result<Value> {
    let first = args.first().unwrap_or(&Value::Null);
    let value = match name {
        "concat" => {
            if args.iter().any(Value::is_null) {
                Value::Null
            } else {
                Value::String(args.iter().map(text_of).collect())
            }
        }
        "upper" | "lower" if first.is_null() => Value::Null,
        "upper" => Value::String(text_of(first).to_uppercase()),
        "lower" => Value::String(text_of(first).to_lowercase()),
        "length" | "char_length" if first.is_null() => Value::Null,
        "length" => Value::from(text_of(first).len() as u64),
        "char_length" => Value::from(text_of(first).chars().count() as u64),
        "abs" => match Number::of(first) {
            Some(Number::Int(i)) => i
                .checked_abs()
                .map(Value::Int)
                .unwrap_or(Value::Float((i as f64).abs())),
            Some(Number::Float(f)) => Value::Float(f.abs()),
            None => Value::Null,
        },
        "coalesce" | "ifnull" => args
            .iter()
            .find(|v| !v.is_null())
            .cloned()
            .unwrap_or_default(),
        "json_length" => match first {
            Value::Null => Value::Null,
            Value::Array(items) => Value::from(items.len() as u64),
            Value::Object(doc) => Value::from(doc.len() as u64),
            _ => Value::Int(1),
        },
        _ => {
            return Err(DocError::server(
                ServerError::NO_SUCH_FUNCTION,
                format!("FUNCTION {name} does not exist"),
            ));
        }
    };
    Ok(value)
}

fn compute_aggregate(name: &str, args: &[Expr], rows: &[Value]) -> Result<Value> {
    let [arg] = args else {
        return Err(DocError::server(
            ServerError::PARAM_COUNT,
            format!("Incorrect parameter count in the call to native function '{name}'"),
        ));
    };

    if name == "count" && matches!(arg, Expr::Star) {
        return Ok(Value::from(rows.len() as u64));
    }

    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        let value = eval(arg, &Scope::Row(row))?;
        if !value.is_null() {
            values.push(value);
        }
    }

    Ok(match name {
        "count" => Value::from(values.len() as u64),
        _ if values.is_empty() => Value::Null,
        "sum" => sum(&values),
        "avg" => {
            let total: f64 = values.iter().filter_map(Number::of).map(|n| n.as_f64()).sum();
            Value::Float(total / values.len() as f64)
        }
        "min" => values
            .into_iter()
            .min_by(|a, b| a.sort_cmp(b))
            .unwrap_or_default(),
        _ => values
            .into_iter()
            .max_by(|a, b| a.sort_cmp(b))
            .unwrap_or_default(),
    })
}

fn sum(values: &[Value]) -> Value {
    let mut int_total: Option<i64> = Some(0);
    let mut float_total = 0.0;
    for n in values.iter().filter_map(Number::of) {
        float_total += n.as_f64();
        int_total = match (int_total, n) {
            (Some(total), Number::Int(i)) => total.checked_add(i),
            _ => None,
        };
    }
    int_total.map(Value::Int).unwrap_or(Value::Float(float_total))
}

/// Whether `candidate` is contained in `container`. Arrays contain their
/// elements (and arrays of their elements); objects contain sub-objects.
pub(crate) fn contains(container: &Value, candidate: &Value) -> bool {
    match (container, candidate) {
        (Value::Array(items), Value::Array(wanted)) => wanted
            .iter()
            .all(|w| items.iter().any(|item| contains(item, w))),
        (Value::Array(items), wanted) => items.iter().any(|item| contains(item, wanted)),
        (Value::Object(doc), Value::Object(wanted)) => wanted
            .iter()
            .all(|(k, w)| doc.get(k).is_some_and(|v| contains(v, w))),
        (a, b) => a.loosely_equals(b),
    }
}

/// Whether two values share an element, or a key-value pair for objects.
pub(crate) fn overlaps(left: &Value, right: &Value) -> bool {
    fn elements(value: &Value) -> SmallVec<[&Value; 8]> {
        match value {
            Value::Array(items) => items.iter().collect(),
            other => smallvec![other],
        }
    }

    match (left, right) {
        (Value::Object(a), Value::Object(b)) => a
            .iter()
            .any(|(k, v)| b.get(k).is_some_and(|other| other.loosely_equals(v))),
        _ => {
            let right = elements(right);
            elements(left)
                .into_iter()
                .any(|l| right.iter().any(|r| l.loosely_equals(r)))
        }
    }
}

/// SQL `LIKE`: `%` matches any run, `_` one character. The escape
/// character makes the following character literal.
fn like_match(text: &str, pattern: &str, escape: Option<char>) -> Result<bool> {
    let mut source = String::from("(?s)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            c if Some(c) == escape => {
                let literal = chars.next().unwrap_or(c);
                source.push_str(&regex::escape(literal.encode_utf8(&mut [0; 4])));
            }
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');

    let regex = Regex::new(&source).map_err(|e| {
        DocError::server(
            ServerError::INVALID_REGEXP,
            format!("Illegal argument to a regular expression: {e}"),
        )
    })?;
    Ok(regex.is_match(text))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::expr::parse_expr;

    fn row() -> Value {
        Value::from(json!({
            "_id": "1",
            "title": "Book 1",
            "pages": 20,
            "tags": ["a", "b"],
            "author": {"name": "Ann", "age": 40},
            "missing": null
        }))
    }

    fn eval_str(source: &str) -> Value {
        eval(&parse_expr(source).unwrap(), &Scope::Row(&row())).unwrap()
    }

    #[test]
    fn comparisons_and_arithmetic() {
        assert_eq!(eval_str("pages = 20"), Value::Bool(true));
        assert_eq!(eval_str("pages + 1"), Value::Int(21));
        assert_eq!(eval_str("pages / 8"), Value::Float(2.5));
        assert_eq!(eval_str("pages / 0"), Value::Null);
        assert_eq!(eval_str("pages % 7"), Value::Int(6));
        assert_eq!(eval_str("9223372036854775807 + 1"), Value::Float(9223372036854775808.0));
        assert_eq!(eval_str("1 << 4"), Value::Int(16));
        assert_eq!(eval_str("-pages"), Value::Int(-20));
    }

    #[test]
    fn null_propagates_through_three_valued_logic() {
        assert_eq!(eval_str("missing = 1"), Value::Null);
        assert_eq!(eval_str("missing = 1 and false"), Value::Bool(false));
        assert_eq!(eval_str("missing = 1 and true"), Value::Null);
        assert_eq!(eval_str("missing = 1 or true"), Value::Bool(true));
        assert_eq!(eval_str("not (missing = 1)"), Value::Null);
    }

    #[test]
    fn paths_resolve_nested_and_wildcard_members() {
        assert_eq!(eval_str("author.name"), Value::from("Ann"));
        assert_eq!(eval_str("tags[1]"), Value::from("b"));
        assert_eq!(eval_str("nothing.here"), Value::Null);
        assert_eq!(
            eval_str("$.author.*"),
            Value::from(json!(["Ann", 40]))
        );
        assert_eq!(eval_str("$**.age"), Value::from(json!([40])));
    }

    #[test]
    fn in_forms() {
        assert_eq!(eval_str("pages in (10, 20)"), Value::Bool(true));
        assert_eq!(eval_str("pages not in [10, 30]"), Value::Bool(true));
        assert_eq!(eval_str("'a' in tags"), Value::Bool(true));
        assert_eq!(eval_str("['a', 'b'] in tags"), Value::Bool(true));
        assert_eq!(eval_str("{'name': 'Ann'} in author"), Value::Bool(true));
        assert_eq!(eval_str("'z' in tags"), Value::Bool(false));
    }

    #[test]
    fn overlaps_is_symmetric() {
        assert_eq!(eval_str("tags overlaps ['b', 'c']"), Value::Bool(true));
        assert_eq!(eval_str("['b', 'c'] overlaps tags"), Value::Bool(true));
        assert_eq!(eval_str("tags not overlaps ['x']"), Value::Bool(true));
        assert_eq!(eval_str("author overlaps {'age': 40}"), Value::Bool(true));
    }

    #[test]
    fn like_between_is_regexp() {
        assert_eq!(eval_str("title like 'Book%'"), Value::Bool(true));
        assert_eq!(eval_str("title like 'Book _'"), Value::Bool(true));
        assert_eq!(eval_str("title like 'book%'"), Value::Bool(false));
        assert_eq!(eval_str("'50%' like '50!%' escape '!'"), Value::Bool(true));
        assert_eq!(eval_str("pages between 10 and 20"), Value::Bool(true));
        assert_eq!(eval_str("pages not between 1 and 5"), Value::Bool(true));
        assert_eq!(eval_str("missing is null"), Value::Bool(true));
        assert_eq!(eval_str("pages is not null"), Value::Bool(true));
        assert_eq!(eval_str("title regexp '^Book [0-9]$'"), Value::Bool(true));
    }

    #[test]
    fn functions() {
        assert_eq!(eval_str("concat(title, '!')"), Value::from("Book 1!"));
        assert_eq!(eval_str("upper(title)"), Value::from("BOOK 1"));
        assert_eq!(eval_str("char_length('né')"), Value::Int(2));
        assert_eq!(eval_str("length('né')"), Value::Int(3));
        assert_eq!(eval_str("coalesce(missing, pages)"), Value::Int(20));
        assert_eq!(eval_str("json_length(tags)"), Value::Int(2));
    }

    #[test]
    fn function_errors_carry_server_codes() {
        let err = eval(&parse_expr("nope(1)").unwrap(), &Scope::Row(&row())).unwrap_err();
        assert_eq!(err.server_code(), Some(ServerError::NO_SUCH_FUNCTION));

        let err = eval(&parse_expr("count(*)").unwrap(), &Scope::Row(&row())).unwrap_err();
        assert_eq!(err.server_code(), Some(ServerError::INVALID_GROUP_FUNCTION));

        let err = eval(&parse_expr("title regexp '('").unwrap(), &Scope::Row(&row())).unwrap_err();
        assert_eq!(err.server_code(), Some(ServerError::INVALID_REGEXP));
    }

    #[test]
    fn aggregates_over_a_group() {
        let rows: Vec<Value> = [10, 20, 30]
            .into_iter()
            .map(|p| Value::from(json!({"pages": p})))
            .chain(std::iter::once(Value::from(json!({"other": 1}))))
            .collect();
        let scope = Scope::Group {
            rows: &rows,
            aliases: None,
        };
        let agg = |source: &str| eval(&parse_expr(source).unwrap(), &scope).unwrap();

        assert_eq!(agg("count(*)"), Value::Int(4));
        assert_eq!(agg("count(pages)"), Value::Int(3));
        assert_eq!(agg("sum(pages)"), Value::Int(60));
        assert_eq!(agg("avg(pages)"), Value::Float(20.0));
        assert_eq!(agg("min(pages)"), Value::Int(10));
        assert_eq!(agg("max(pages)"), Value::Int(30));
    }

    #[test]
    fn group_scope_resolves_aliases() {
        let rows = vec![Value::from(json!({"age": 1}))];
        let mut aliases = Document::new();
        aliases.insert("cnt".to_string(), Value::Int(7));
        let scope = Scope::Group {
            rows: &rows,
            aliases: Some(&aliases),
        };
        assert_eq!(eval(&parse_expr("cnt > 5").unwrap(), &scope).unwrap(), Value::Bool(true));
        assert_eq!(eval(&parse_expr("age").unwrap(), &scope).unwrap(), Value::Int(1));
    }
}
