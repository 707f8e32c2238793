use monodoc_common::{
    Result, Value,
    ast::Expr,
    protocol::Request,
};

use super::StatementCore;
use crate::{binder::IntoBindings, collection::Collection, result::UpdateResult};

/// Deletes documents matching a condition.
#[derive(Debug, Clone)]
pub struct RemoveStatement {
    core: StatementCore,
}

impl RemoveStatement {
    pub(crate) fn new(collection: Collection, filter: Expr) -> Self {
        Self {
            core: StatementCore::new(collection, Some(filter)),
        }
    }

    pub fn sort<I, S>(&mut self, clauses: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.core.sort(clauses)?;
        Ok(self)
    }

    pub fn limit(&mut self, rows: i64) -> Result<&mut Self> {
        self.core.limit(rows)?;
        Ok(self)
    }

    /// Fails after [`RemoveStatement::limit_offset`] has been used.
    pub fn offset(&mut self, rows: i64) -> Result<&mut Self> {
        self.core.offset(rows)?;
        Ok(self)
    }

    /// Legacy combined window. Cannot be followed by [`RemoveStatement::offset`].
    pub fn limit_offset(&mut self, rows: i64, offset: i64) -> Result<&mut Self> {
        self.core.limit_offset(rows, offset)?;
        Ok(self)
    }

    pub fn bind(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.core.bind(name, value);
        self
    }

    pub fn bind_all(&mut self, bag: impl IntoBindings) -> Result<&mut Self> {
        self.core.bind_all(bag)?;
        Ok(self)
    }

    pub fn to_request(&mut self) -> Request {
        Request::Delete {
            target: self.core.target(),
            options: self.core.bound_options(),
        }
    }

    pub async fn execute(&mut self) -> Result<UpdateResult> {
        let request = self.to_request();
        let response = self.core.collection().session().send(request).await?;
        UpdateResult::from_response("delete", response)
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &StatementCore {
        &self.core
    }
}
