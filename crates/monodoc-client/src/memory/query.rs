//! Read pipeline: grouping, having, sort, window and projection over
//! already filtered rows.

use std::cmp::Ordering;

use indexmap::IndexMap;
use monodoc_common::{
    DocError, Document, Result, ServerError, Value,
    ast::{DocumentPath, Expr, PathSegment, is_aggregate},
    protocol::{Projection, SortDirection, SortSpec, StatementOptions},
};

use super::eval::{Scope, eval, resolve};

/// Run everything after filtering and locking.
///
/// `stored` is the whole collection, used to tell unknown grouping fields
/// apart from fields that happen to be absent from the filtered rows.
pub(crate) fn select<'s>(
    rows: Vec<Value>,
    options: &StatementOptions,
    stored: impl Iterator<Item = &'s Document> + Clone,
) -> Result<Vec<Value>> {
    let grouped = !options.group_by.is_empty();
    if options.having.is_some() && !grouped {
        return Err(invalid_grouping());
    }
    let aggregated = grouped
        || options
            .projection
            .iter()
            .any(|p| p.source.has_aggregate());

    if !aggregated {
        let rows = sort_rows(rows, &options.sort, |row| row)?;
        let rows = window(rows, options.limit, options.offset);
        return rows
            .iter()
            .map(|row| project(row, &options.projection))
            .collect();
    }

    let group_by: Vec<&Expr> = options
        .group_by
        .iter()
        .map(|expr| resolve_alias(expr, &options.projection))
        .collect();
    for expr in &group_by {
        check_group_column(expr, stored.clone())?;
    }
    if let Some(having) = &options.having
        && !having_is_grouped(having, &options.group_by, &options.projection)
    {
        return Err(invalid_grouping());
    }

    let mut groups: Vec<(Document, Vec<Value>)> = Vec::new();
    for rows in group_rows(rows, &group_by)? {
        let projected = project_group(&rows, &options.projection)?;
        if let Some(having) = &options.having {
            let scope = Scope::Group {
                rows: &rows,
                aliases: Some(&projected),
            };
            if !eval(having, &scope)?.is_truthy() {
                continue;
            }
        }
        groups.push((projected, rows));
    }

    let groups = sort_groups(groups, &options.sort)?;
    Ok(window(groups, options.limit, options.offset)
        .into_iter()
        .map(|(projected, _)| Value::Object(projected))
        .collect())
}

fn invalid_grouping() -> DocError {
    DocError::server(
        ServerError::INVALID_GROUPING,
        "Invalid expression in grouping criteria",
    )
}

/// A single-member path naming a projection alias stands for the aliased
/// expression.
fn resolve_alias<'a>(expr: &'a Expr, projection: &'a [Projection]) -> &'a Expr {
    let Expr::Field { path } = expr else {
        return expr;
    };
    let [PathSegment::Member(name)] = path.segments.as_slice() else {
        return expr;
    };
    projection
        .iter()
        .find(|p| p.alias.as_deref() == Some(name))
        .map(|p| &p.source)
        .unwrap_or(expr)
}

fn check_group_column<'s>(
    expr: &Expr,
    mut stored: impl Iterator<Item = &'s Document>,
) -> Result<()> {
    let Expr::Field { path } = expr else {
        return Ok(());
    };
    let known = stored.any(|doc| !resolve(&Value::Object(doc.clone()), &path.segments).is_empty());
    if known {
        return Ok(());
    }
    Err(DocError::server(
        ServerError::UNKNOWN_COLUMN,
        format!("Unknown column '{}' in 'group statement'", column_name(path)),
    ))
}

fn column_name(path: &DocumentPath) -> String {
    let display = path.to_string();
    display
        .strip_prefix("$.")
        .map(str::to_string)
        .unwrap_or(display)
}

/// Fields a having clause reads outside aggregate calls must be grouping
/// expressions or projection aliases.
fn having_is_grouped(expr: &Expr, group_by: &[Expr], projection: &[Projection]) -> bool {
    match expr {
        Expr::Call { name, .. } if is_aggregate(&name.name) => true,
        Expr::Field { path } => {
            let is_alias = matches!(
                path.segments.as_slice(),
                [PathSegment::Member(name)]
                    if projection.iter().any(|p| p.alias.as_deref() == Some(name.as_str()))
            );
            is_alias
                || group_by
                    .iter()
                    .any(|g| matches!(g, Expr::Field { path: grouped } if grouped == path))
        }
        other => other
            .children()
            .into_iter()
            .all(|child| having_is_grouped(child, group_by, projection)),
    }
}

/// Partition rows by their grouping key, keeping first-seen group order.
/// With no grouping expressions every row lands in one group.
fn group_rows(rows: Vec<Value>, group_by: &[&Expr]) -> Result<Vec<Vec<Value>>> {
    if group_by.is_empty() {
        return Ok(vec![rows]);
    }
    let mut groups: IndexMap<String, Vec<Value>> = IndexMap::new();
    for row in rows {
        let mut key = String::new();
        for expr in group_by {
            key.push_str(&eval(expr, &Scope::Row(&row))?.to_string());
            key.push('\u{1f}');
        }
        groups.entry(key).or_default().push(row);
    }
    Ok(groups.into_values().collect())
}

fn projection_key(projection: &Projection) -> String {
    match (&projection.alias, &projection.source) {
        (Some(alias), _) => alias.clone(),
        (None, Expr::Field { path }) => path
            .first_member()
            .filter(|_| path.segments.len() == 1)
            .map(str::to_string)
            .unwrap_or_else(|| path.to_string()),
        (None, source) => source.to_string(),
    }
}

/// Shape one row. An empty projection returns the row unchanged.
fn project(row: &Value, projection: &[Projection]) -> Result<Value> {
    if projection.is_empty() {
        return Ok(row.clone());
    }
    let mut doc = Document::with_capacity(projection.len());
    for p in projection {
        doc.insert(projection_key(p), eval(&p.source, &Scope::Row(row))?);
    }
    Ok(Value::Object(doc))
}

/// Shape one group. Later projections may refer to earlier aliases.
fn project_group(rows: &[Value], projection: &[Projection]) -> Result<Document> {
    if projection.is_empty() {
        return Ok(rows
            .first()
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default());
    }
    let mut doc = Document::with_capacity(projection.len());
    for p in projection {
        let scope = Scope::Group {
            rows,
            aliases: Some(&doc),
        };
        let value = eval(&p.source, &scope)?;
        doc.insert(projection_key(p), value);
    }
    Ok(doc)
}

fn compare_keys(a: &[Value], b: &[Value], specs: &[SortSpec]) -> Ordering {
    for ((x, y), spec) in a.iter().zip(b).zip(specs) {
        let ord = match spec.direction {
            SortDirection::Asc => x.sort_cmp(y),
            SortDirection::Desc => y.sort_cmp(x),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Stable sort of `items` by the sort expressions evaluated on each row.
pub(crate) fn sort_rows<T>(
    items: Vec<T>,
    specs: &[SortSpec],
    row: impl Fn(&T) -> &Value,
) -> Result<Vec<T>> {
    if specs.is_empty() {
        return Ok(items);
    }
    let mut keyed = items
        .into_iter()
        .map(|item| {
            let keys = specs
                .iter()
                .map(|spec| eval(&spec.expr, &Scope::Row(row(&item))))
                .collect::<Result<Vec<_>>>()?;
            Ok((keys, item))
        })
        .collect::<Result<Vec<_>>>()?;
    keyed.sort_by(|a, b| compare_keys(&a.0, &b.0, specs));
    Ok(keyed.into_iter().map(|(_, item)| item).collect())
}

fn sort_groups(
    groups: Vec<(Document, Vec<Value>)>,
    specs: &[SortSpec],
) -> Result<Vec<(Document, Vec<Value>)>> {
    if specs.is_empty() {
        return Ok(groups);
    }
    let mut keyed = Vec::with_capacity(groups.len());
    for (projected, rows) in groups {
        let scope = Scope::Group {
            rows: &rows,
            aliases: Some(&projected),
        };
        let keys = specs
            .iter()
            .map(|spec| eval(&spec.expr, &scope))
            .collect::<Result<Vec<_>>>()?;
        keyed.push((keys, (projected, rows)));
    }
    keyed.sort_by(|a, b| compare_keys(&a.0, &b.0, specs));
    Ok(keyed.into_iter().map(|(_, group)| group).collect())
}

/// Apply offset then limit. Negative offsets count as zero.
pub(crate) fn window<T>(items: Vec<T>, limit: Option<u64>, offset: Option<i64>) -> Vec<T> {
    let skip = usize::try_from(offset.unwrap_or(0).max(0)).unwrap_or(usize::MAX);
    let take = limit
        .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
        .unwrap_or(usize::MAX);
    items.into_iter().skip(skip).take(take).collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::expr::{parse_expr, parse_expr_list, parse_projection, parse_sort};

    fn people() -> Vec<Document> {
        [
            json!({"_id": "1", "name": "a", "age": 30}),
            json!({"_id": "2", "name": "b", "age": 20}),
            json!({"_id": "3", "name": "c", "age": 30}),
            json!({"_id": "4", "name": "d", "age": 40}),
        ]
        .into_iter()
        .filter_map(|v| Value::from(v).as_object().cloned())
        .collect()
    }

    fn run(options: &StatementOptions) -> Result<Vec<Value>> {
        let stored = people();
        let rows = stored.iter().cloned().map(Value::Object).collect();
        select(rows, options, stored.iter())
    }

    fn grouped_by_age() -> StatementOptions {
        StatementOptions {
            projection: parse_projection("age, count(*) as cnt").unwrap(),
            group_by: parse_expr_list("age").unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn sort_then_window_then_project() {
        let options = StatementOptions {
            sort: parse_sort("age desc, name").unwrap(),
            limit: Some(2),
            offset: Some(1),
            projection: parse_projection("name").unwrap(),
            ..Default::default()
        };
        assert_eq!(
            run(&options).unwrap(),
            vec![Value::from(json!({"name": "a"})), Value::from(json!({"name": "c"}))]
        );
    }

    #[test]
    fn offsets_past_the_end_and_negative_offsets() {
        assert!(window(vec![1, 2, 3], None, Some(10)).is_empty());
        assert_eq!(window(vec![1, 2, 3], Some(2), Some(-4)), vec![1, 2]);
    }

    #[test]
    fn groups_keep_first_seen_order() {
        assert_eq!(
            run(&grouped_by_age()).unwrap(),
            vec![
                Value::from(json!({"age": 30, "cnt": 2})),
                Value::from(json!({"age": 20, "cnt": 1})),
                Value::from(json!({"age": 40, "cnt": 1})),
            ]
        );
    }

    #[test]
    fn having_and_sort_see_aliases() {
        let options = StatementOptions {
            having: Some(parse_expr("cnt = 1").unwrap()),
            sort: parse_sort("age desc").unwrap(),
            ..grouped_by_age()
        };
        assert_eq!(
            run(&options).unwrap(),
            vec![
                Value::from(json!({"age": 40, "cnt": 1})),
                Value::from(json!({"age": 20, "cnt": 1})),
            ]
        );
    }

    #[test]
    fn aggregate_without_group_by_is_one_group() {
        let options = StatementOptions {
            projection: parse_projection("max(age) as oldest, count(*) as n").unwrap(),
            ..Default::default()
        };
        assert_eq!(
            run(&options).unwrap(),
            vec![Value::from(json!({"oldest": 40, "n": 4}))]
        );
    }

    #[test]
    fn grouping_errors() {
        let options = StatementOptions {
            group_by: parse_expr_list("nosuch").unwrap(),
            ..grouped_by_age()
        };
        let err = run(&options).unwrap_err();
        assert_eq!(err.server_code(), Some(ServerError::UNKNOWN_COLUMN));
        assert_eq!(err.message(), "Unknown column 'nosuch' in 'group statement'");

        let options = StatementOptions {
            having: Some(parse_expr("age > 1").unwrap()),
            ..Default::default()
        };
        let err = run(&options).unwrap_err();
        assert_eq!(err.server_code(), Some(ServerError::INVALID_GROUPING));

        let options = StatementOptions {
            having: Some(parse_expr("name = 'a'").unwrap()),
            ..grouped_by_age()
        };
        let err = run(&options).unwrap_err();
        assert_eq!(err.message(), "Invalid expression in grouping criteria");
    }

    #[test]
    fn group_by_alias() {
        let options = StatementOptions {
            projection: parse_projection("age as years, count(*) as cnt").unwrap(),
            group_by: parse_expr_list("years").unwrap(),
            having: Some(parse_expr("years > 25").unwrap()),
            ..Default::default()
        };
        assert_eq!(
            run(&options).unwrap(),
            vec![
                Value::from(json!({"years": 30, "cnt": 2})),
                Value::from(json!({"years": 40, "cnt": 1})),
            ]
        );
    }
}
