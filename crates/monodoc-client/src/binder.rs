//! Placeholder binding.
//!
//! Bound values are keyed by lower-cased name, so `:Pages` in filter text and
//! a binding named `pAges` resolve to the same value. Binding never re-parses
//! the statement: values are substituted into a copy of the frozen options.

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;
use monodoc_common::{
    DocError, Document, IntoDocument, Record, Result, Value,
    ast::Expr,
    protocol::{StatementOptions, UpdateOperation},
};
use serde::Serialize;
use tracing::debug;

/// Name to value map used to resolve placeholders. Last write wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    values: IndexMap<String, Value>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a single name. Re-binding a name overwrites its value.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.values.insert(normalize(name), value.into());
    }

    /// Merge every entry of a property bag into this set.
    pub fn extend(&mut self, other: Bindings) {
        self.values.extend(other.values);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(&normalize(name))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Substitute bound placeholders in a single expression.
    ///
    /// Placeholders without a value are left in place for the execution side
    /// to report.
    pub fn apply_expr(&self, expr: Expr) -> Expr {
        expr.map(&mut |node| self.substitute(node))
    }

    /// Substitute bound placeholders everywhere in a copy of `options`.
    pub fn apply(&self, options: &StatementOptions) -> StatementOptions {
        self.log_unused(options_placeholders(options));
        options.clone().map_exprs(&mut |node| self.substitute(node))
    }

    /// Substitute bound placeholders in update value expressions.
    pub fn apply_operations(&self, operations: &[UpdateOperation]) -> Vec<UpdateOperation> {
        UpdateOperation::map_all(operations.to_vec(), &mut |node| self.substitute(node))
    }

    fn substitute(&self, node: Expr) -> Expr {
        match node {
            Expr::Placeholder { name, position } => match self.values.get(&name) {
                Some(value) => Expr::literal(value.clone()),
                None => Expr::Placeholder { name, position },
            },
            other => other,
        }
    }

    fn log_unused(&self, referenced: Vec<String>) {
        for name in self.names() {
            if !referenced.iter().any(|r| r == name) {
                debug!(name, "Ignoring binding with no matching placeholder");
            }
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim_start_matches(':').to_lowercase()
}

fn options_placeholders(options: &StatementOptions) -> Vec<String> {
    let mut names = Vec::new();
    let mut collect = |expr: &Expr| {
        for name in expr.placeholder_names() {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    };
    options.filter.iter().for_each(&mut collect);
    options.having.iter().for_each(&mut collect);
    options.sort.iter().for_each(|s| collect(&s.expr));
    options.group_by.iter().for_each(&mut collect);
    options.projection.iter().for_each(|p| collect(&p.source));
    names
}

/// A property bag that can be bound in one call.
pub trait IntoBindings {
    fn into_bindings(self) -> Result<Bindings>;
}

fn from_document(doc: Document) -> Bindings {
    let mut bindings = Bindings::new();
    for (name, value) in doc {
        bindings.set(&name, value);
    }
    bindings
}

fn bag_error(err: DocError) -> DocError {
    match err {
        DocError::Bind(msg) => DocError::Bind(msg.replacen("Document", "Binding bag", 1)),
        other => other,
    }
}

impl IntoBindings for Bindings {
    fn into_bindings(self) -> Result<Bindings> {
        Ok(self)
    }
}

impl<V: Into<Value>> IntoBindings for IndexMap<String, V> {
    fn into_bindings(self) -> Result<Bindings> {
        let mut bindings = Bindings::new();
        for (name, value) in self {
            bindings.set(&name, value);
        }
        Ok(bindings)
    }
}

impl<V: Into<Value>> IntoBindings for HashMap<String, V> {
    fn into_bindings(self) -> Result<Bindings> {
        Ok(from_document(self.into_document()?))
    }
}

impl<V: Into<Value>> IntoBindings for BTreeMap<String, V> {
    fn into_bindings(self) -> Result<Bindings> {
        Ok(from_document(self.into_document()?))
    }
}

impl IntoBindings for serde_json::Value {
    fn into_bindings(self) -> Result<Bindings> {
        self.into_document().map(from_document).map_err(bag_error)
    }
}

impl IntoBindings for Value {
    fn into_bindings(self) -> Result<Bindings> {
        self.into_document().map(from_document).map_err(bag_error)
    }
}

/// JSON object text.
impl IntoBindings for &str {
    fn into_bindings(self) -> Result<Bindings> {
        self.into_document().map(from_document).map_err(bag_error)
    }
}

impl IntoBindings for String {
    fn into_bindings(self) -> Result<Bindings> {
        self.as_str().into_bindings()
    }
}

impl<T: Serialize> IntoBindings for Record<T> {
    fn into_bindings(self) -> Result<Bindings> {
        self.into_document().map(from_document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse_expr;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn filter_options(text: &str) -> StatementOptions {
        StatementOptions {
            filter: Some(parse_expr(text).unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn names_are_case_insensitive() {
        let mut bindings = Bindings::new();
        bindings.set("pAges", 30);
        assert_eq!(bindings.get("PAGES"), Some(&Value::Int(30)));

        let bound = bindings.apply(&filter_options("pages = :Pages"));
        assert_eq!(bound.filter.unwrap().to_string(), "($.pages == 30)");
    }

    #[test]
    fn last_write_wins() {
        let mut bindings = Bindings::new();
        bindings.set("a", 1);
        bindings.set("A", 2);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings.get("a"), Some(&Value::Int(2)));
    }

    #[test]
    fn bag_shapes_are_equivalent() {
        let from_json = json!({"Pages1": 30, "pages2": 40}).into_bindings().unwrap();
        let from_text = r#"{"Pages1": 30, "pages2": 40}"#.into_bindings().unwrap();
        let from_map = HashMap::from([
            ("Pages1".to_string(), 30),
            ("pages2".to_string(), 40),
        ])
        .into_bindings()
        .unwrap();

        #[derive(Serialize)]
        struct Bag {
            #[serde(rename = "Pages1")]
            pages1: i64,
            pages2: i64,
        }
        let from_record = Record(Bag {
            pages1: 30,
            pages2: 40,
        })
        .into_bindings()
        .unwrap();

        for bindings in [&from_json, &from_text, &from_map, &from_record] {
            assert_eq!(bindings.get("pages1"), Some(&Value::Int(30)));
            assert_eq!(bindings.get("pages2"), Some(&Value::Int(40)));
        }
    }

    #[test]
    fn non_object_bag_is_rejected() {
        let err = json!([1, 2]).into_bindings().unwrap_err();
        assert_eq!(err.kind(), "bind_error");
        assert!(err.message().starts_with("Binding bag must be a JSON object"));
        assert!("not json".into_bindings().is_err());
    }

    #[test]
    fn unbound_placeholders_stay_in_the_tree() {
        let mut bindings = Bindings::new();
        bindings.set("a", 1);
        bindings.set("unused", 5);

        let bound = bindings.apply(&filter_options("x = :a && y = :b"));
        let filter = bound.filter.unwrap();
        assert_eq!(filter.placeholder_names(), vec!["b"]);
    }

    #[test]
    fn apply_leaves_the_frozen_options_untouched() {
        let frozen = filter_options("pages = :p");
        let mut first = Bindings::new();
        first.set("p", 1);
        let mut second = Bindings::new();
        second.set("p", 2);

        assert_eq!(first.apply(&frozen).filter.unwrap().to_string(), "($.pages == 1)");
        assert_eq!(second.apply(&frozen).filter.unwrap().to_string(), "($.pages == 2)");
        assert_eq!(frozen.filter.unwrap().placeholder_names(), vec!["p"]);
    }
}
