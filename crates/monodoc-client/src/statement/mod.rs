//! Statement builders
//!
//! Builders accumulate options through `&mut self` calls. A call that fails
//! leaves the statement exactly as it was. On first execute the options are
//! frozen into an `Arc` that later executes reuse until a builder call
//! changes them; bindings are applied to a copy of the frozen options each
//! time, so rebinding never re-parses anything.

use std::sync::Arc;

use monodoc_common::{
    DocError, Result, Value,
    ast::Expr,
    protocol::{CollectionRef, SortSpec, StatementOptions},
};
use tracing::debug;

use crate::{
    binder::{Bindings, IntoBindings},
    collection::Collection,
    expr,
};

mod add;
mod find;
mod modify;
mod remove;

#[cfg(test)]
mod tests;

pub(crate) use add::ID_FIELD;
pub use add::AddStatement;
pub use find::FindStatement;
pub use modify::ModifyStatement;
pub use remove::RemoveStatement;

/// State shared by every filterable statement.
#[derive(Debug, Clone)]
pub(crate) struct StatementCore {
    collection: Collection,
    options: StatementOptions,
    frozen: Option<Arc<StatementOptions>>,
    bindings: Bindings,
    /// Set by the legacy `limit_offset` call
    legacy_window: bool,
}

impl StatementCore {
    pub(crate) fn new(collection: Collection, filter: Option<Expr>) -> Self {
        Self {
            collection,
            options: StatementOptions {
                filter,
                ..Default::default()
            },
            frozen: None,
            bindings: Bindings::new(),
            legacy_window: false,
        }
    }

    pub(crate) fn collection(&self) -> &Collection {
        &self.collection
    }

    pub(crate) fn target(&self) -> CollectionRef {
        self.collection.target().clone()
    }

    pub(crate) fn options(&self) -> &StatementOptions {
        &self.options
    }

    /// Mutable access to the options; drops the frozen plan.
    pub(crate) fn options_mut(&mut self) -> &mut StatementOptions {
        self.frozen = None;
        &mut self.options
    }

    pub(crate) fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub(crate) fn sort<I, S>(&mut self, clauses: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sort: Vec<SortSpec> = Vec::new();
        for clause in clauses {
            sort.extend(expr::parse_sort(clause.as_ref())?);
        }
        self.options_mut().sort = sort;
        Ok(())
    }

    pub(crate) fn limit(&mut self, rows: i64) -> Result<()> {
        self.options_mut().limit = Some(validate_rows(rows)?);
        Ok(())
    }

    pub(crate) fn offset(&mut self, rows: i64) -> Result<()> {
        if self.legacy_window {
            return Err(DocError::Incompatible(
                "Offset cannot be combined with the legacy limit and offset call".to_string(),
            ));
        }
        self.options_mut().offset = Some(rows);
        Ok(())
    }

    /// Offset used by finds, which have no legacy window entry point.
    pub(crate) fn find_offset(&mut self, rows: i64) {
        self.options_mut().offset = Some(rows);
    }

    pub(crate) fn limit_offset(&mut self, rows: i64, offset: i64) -> Result<()> {
        let rows = validate_rows(rows)?;
        let options = self.options_mut();
        options.limit = Some(rows);
        options.offset = Some(offset);
        self.legacy_window = true;
        Ok(())
    }

    pub(crate) fn bind(&mut self, name: &str, value: impl Into<Value>) {
        self.bindings.set(name, value);
    }

    pub(crate) fn bind_all(&mut self, bag: impl IntoBindings) -> Result<()> {
        let bag = bag.into_bindings()?;
        self.bindings.extend(bag);
        Ok(())
    }

    /// The frozen options, built on first use.
    pub(crate) fn freeze(&mut self) -> Arc<StatementOptions> {
        match &self.frozen {
            Some(frozen) => {
                debug!(collection = %self.collection.target(), "Reusing frozen statement options");
                frozen.clone()
            }
            None => {
                let frozen = Arc::new(self.options.clone());
                self.frozen = Some(frozen.clone());
                frozen
            }
        }
    }

    /// The frozen options with the current bindings applied.
    pub(crate) fn bound_options(&mut self) -> StatementOptions {
        let frozen = self.freeze();
        self.bindings.apply(&frozen)
    }

    #[cfg(test)]
    pub(crate) fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }
}

fn validate_rows(rows: i64) -> Result<u64> {
    if rows <= 0 {
        return Err(DocError::Range(format!(
            "Parameter 'rows' must be greater than zero, got {rows}"
        )));
    }
    Ok(rows as u64)
}

/// Reject a missing or blank required argument.
pub(crate) fn require_text<'a>(value: &'a str, parameter: &str) -> Result<&'a str> {
    if value.trim().is_empty() {
        return Err(DocError::Bind(format!(
            "Parameter '{parameter}' cannot be null or empty"
        )));
    }
    Ok(value)
}
