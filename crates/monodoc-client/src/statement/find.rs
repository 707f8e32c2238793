use monodoc_common::{
    Document, Result, Value,
    ast::Expr,
    protocol::{LockContention, LockMode, Projection, Request},
};
use tracing::debug;

use super::StatementCore;
use crate::{binder::IntoBindings, collection::Collection, expr, lock::compile_lock, result::DocResult};

/// Reads documents from a collection.
#[derive(Debug, Clone)]
pub struct FindStatement {
    core: StatementCore,
}

impl FindStatement {
    pub(crate) fn new(collection: Collection, filter: Option<Expr>) -> Self {
        Self {
            core: StatementCore::new(collection, filter),
        }
    }

    /// Project each result onto `expr [as alias]` clauses.
    pub fn fields<I, S>(&mut self, clauses: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut projection: Vec<Projection> = Vec::new();
        for clause in clauses {
            projection.extend(expr::parse_projection(clause.as_ref())?);
        }
        self.core.options_mut().projection = projection;
        Ok(self)
    }

    /// Group results. `None` entries are skipped, so passing only `None`
    /// is the same as never calling this.
    pub fn group_by<'a, I, T>(&mut self, fields: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<Option<&'a str>>,
    {
        let mut group_by = Vec::new();
        for field in fields
            .into_iter()
            .filter_map(|field| -> Option<&'a str> { field.into() })
        {
            group_by.extend(expr::parse_expr_list(field)?);
        }
        if group_by.is_empty() {
            debug!("Ignoring group_by without fields");
            return Ok(self);
        }
        self.core.options_mut().group_by = group_by;
        Ok(self)
    }

    /// Filter groups. Grouping context is checked by the server.
    pub fn having(&mut self, condition: &str) -> Result<&mut Self> {
        let having = expr::parse_expr(condition)?;
        self.core.options_mut().having = Some(having);
        Ok(self)
    }

    pub fn sort<I, S>(&mut self, clauses: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.core.sort(clauses)?;
        Ok(self)
    }

    /// Cap the number of results. Zero and negative values are a range error.
    pub fn limit(&mut self, rows: i64) -> Result<&mut Self> {
        self.core.limit(rows)?;
        Ok(self)
    }

    /// Skip leading results. Any value is accepted and passed on as given.
    pub fn offset(&mut self, rows: i64) -> &mut Self {
        self.core.find_offset(rows);
        self
    }

    pub fn bind(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.core.bind(name, value);
        self
    }

    /// Bind every entry of a property bag.
    pub fn bind_all(&mut self, bag: impl IntoBindings) -> Result<&mut Self> {
        self.core.bind_all(bag)?;
        Ok(self)
    }

    /// Lock matched rows for reading. Replaces any earlier lock request.
    pub fn lock_shared(&mut self, contention: LockContention) -> &mut Self {
        self.set_lock(LockMode::Shared, contention)
    }

    /// Lock matched rows for writing. Replaces any earlier lock request.
    pub fn lock_exclusive(&mut self, contention: LockContention) -> &mut Self {
        self.set_lock(LockMode::Exclusive, contention)
    }

    fn set_lock(&mut self, mode: LockMode, contention: LockContention) -> &mut Self {
        let options = self.core.options_mut();
        options.lock_mode = mode;
        options.lock_contention = contention;
        self
    }

    /// The request the next execute would send.
    pub fn to_request(&mut self) -> Result<Request> {
        let mut options = self.core.bound_options();
        if options.limit.is_none() {
            options.limit = self.core.collection().session().default_limit();
        }

        let server_version = self.core.collection().session().server_version();
        let lock = compile_lock(options.lock_mode, options.lock_contention, server_version)?;

        Ok(Request::Find {
            target: self.core.target(),
            options,
            lock,
        })
    }

    pub async fn execute(&mut self) -> Result<DocResult> {
        let request = self.to_request()?;
        let response = self.core.collection().session().send(request).await?;
        DocResult::from_response(response)
    }

    /// Execute and take the first document, if any.
    pub async fn execute_one(&mut self) -> Result<Option<Document>> {
        Ok(self.execute().await?.fetch_one())
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &StatementCore {
        &self.core
    }
}
