use monodoc_common::{
    DocError, Document, IntoDocument, Result, Value,
    ast::{DocumentPath, Expr, PathSegment},
    protocol::{Request, UpdateOperation},
};

use super::StatementCore;
use crate::{binder::IntoBindings, collection::Collection, expr, result::UpdateResult};

/// Changes documents matching a condition.
#[derive(Debug, Clone)]
pub struct ModifyStatement {
    core: StatementCore,
    operations: Vec<UpdateOperation>,
}

impl ModifyStatement {
    pub(crate) fn new(collection: Collection, filter: Expr) -> Self {
        Self {
            core: StatementCore::new(collection, Some(filter)),
            operations: Vec::new(),
        }
    }

    /// Set `path` to a literal value, creating it if needed.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<&mut Self> {
        let path = expr::parse_document_path(path)?;
        self.operations.push(UpdateOperation::Set {
            path,
            value: Expr::literal(value),
        });
        Ok(self)
    }

    /// Set `path` to the result of an expression such as `pages + 1`.
    pub fn set_expr(&mut self, path: &str, value: &str) -> Result<&mut Self> {
        let path = expr::parse_document_path(path)?;
        let value = expr::parse_expr(value)?;
        self.operations.push(UpdateOperation::Set { path, value });
        Ok(self)
    }

    /// Replace the value at `path` only where it already exists.
    pub fn change(&mut self, path: &str, value: impl Into<Value>) -> Result<&mut Self> {
        let path = expr::parse_document_path(path)?;
        self.operations.push(UpdateOperation::Change {
            path,
            value: Expr::literal(value),
        });
        Ok(self)
    }

    /// Remove each path. Blank entries are skipped.
    pub fn unset<I, S>(&mut self, paths: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unset = Vec::new();
        for path in paths {
            let path = path.as_ref();
            if path.trim().is_empty() {
                continue;
            }
            unset.push(UpdateOperation::Unset {
                path: expr::parse_document_path(path)?,
            });
        }
        self.operations.extend(unset);
        Ok(self)
    }

    /// Merge `document` into each match; `null` members remove keys.
    pub fn patch(&mut self, document: impl IntoDocument) -> Result<&mut Self> {
        let document = document.into_document()?;
        if document.is_empty() {
            return Err(DocError::Bind(
                "Parameter 'document' cannot be null or empty".to_string(),
            ));
        }
        self.operations.push(UpdateOperation::MergePatch {
            patch: Value::Object(document),
        });
        Ok(self)
    }

    /// Insert into an array before the position named by the path's final
    /// index, as in `tags[1]`.
    pub fn array_insert(&mut self, path: &str, value: impl Into<Value>) -> Result<&mut Self> {
        let parsed = expr::parse_document_path(path)?;
        if !matches!(parsed.segments.last(), Some(PathSegment::Index(_))) {
            return Err(DocError::Bind(format!(
                "Array insert path '{path}' must end in an array index"
            )));
        }
        self.operations.push(UpdateOperation::ArrayInsert {
            path: parsed,
            value: Expr::literal(value),
        });
        Ok(self)
    }

    /// Append to the array at `path`.
    pub fn array_append(&mut self, path: &str, value: impl Into<Value>) -> Result<&mut Self> {
        let path: DocumentPath = expr::parse_document_path(path)?;
        self.operations.push(UpdateOperation::ArrayAppend {
            path,
            value: Expr::literal(value),
        });
        Ok(self)
    }

    /// Replace each matched document wholesale, keeping its `_id`.
    pub(crate) fn replace_with(&mut self, document: Document) -> &mut Self {
        self.operations.push(UpdateOperation::Set {
            path: DocumentPath::default(),
            value: Expr::literal(Value::Object(document)),
        });
        self
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

    /// Fails after [`ModifyStatement::limit_offset`] has been used.
    pub fn offset(&mut self, rows: i64) -> Result<&mut Self> {
        self.core.offset(rows)?;
        Ok(self)
    }

    /// Legacy combined window. Cannot be followed by [`ModifyStatement::offset`].
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

    pub fn operations(&self) -> &[UpdateOperation] {
        &self.operations
    }

    pub fn to_request(&mut self) -> Request {
        let options = self.core.bound_options();
        let operations = self.core.bindings().apply_operations(&self.operations);
        Request::Update {
            target: self.core.target(),
            options,
            operations,
        }
    }

    pub async fn execute(&mut self) -> Result<UpdateResult> {
        let request = self.to_request();
        let response = self.core.collection().session().send(request).await?;
        UpdateResult::from_response("update", response)
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &StatementCore {
        &self.core
    }
}
