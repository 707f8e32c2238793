use monodoc_common::{
    DocError, Document, IntoDocument, Result, Value,
    protocol::{CollectionRef, Request, Response, ServerVersion},
};

use crate::{
    expr,
    result::UpdateResult,
    session::{Session, unexpected_response},
    statement::{
        AddStatement, FindStatement, ID_FIELD, ModifyStatement, RemoveStatement, require_text,
    },
};

const ID_FILTER: &str = "_id = :id";

/// Handle to one collection of a session's schema.
#[derive(Debug, Clone)]
pub struct Collection {
    session: Session,
    target: CollectionRef,
}

impl Collection {
    pub(crate) fn new(session: Session, target: CollectionRef) -> Self {
        Self { session, target }
    }

    pub fn name(&self) -> &str {
        &self.target.name
    }

    pub fn target(&self) -> &CollectionRef {
        &self.target
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Documents matching `condition`.
    pub fn find(&self, condition: &str) -> Result<FindStatement> {
        let filter = expr::parse_expr(condition)?;
        Ok(FindStatement::new(self.clone(), Some(filter)))
    }

    pub fn find_all(&self) -> FindStatement {
        FindStatement::new(self.clone(), None)
    }

    pub fn modify(&self, condition: &str) -> Result<ModifyStatement> {
        let filter = expr::parse_expr(require_text(condition, "condition")?)?;
        Ok(ModifyStatement::new(self.clone(), filter))
    }

    pub fn remove(&self, condition: &str) -> Result<RemoveStatement> {
        let filter = expr::parse_expr(require_text(condition, "condition")?)?;
        Ok(RemoveStatement::new(self.clone(), filter))
    }

    /// Start an add with one document; chain more with [`AddStatement::add`].
    pub fn add(&self, document: impl IntoDocument) -> Result<AddStatement> {
        let mut stmt = AddStatement::new(self.clone());
        stmt.add(document)?;
        Ok(stmt)
    }

    /// Start an add of several documents.
    pub fn add_many<I, D>(&self, documents: I) -> Result<AddStatement>
    where
        I: IntoIterator<Item = D>,
        D: IntoDocument,
    {
        let mut stmt = AddStatement::new(self.clone());
        for doc in documents {
            stmt.add(doc)?;
        }
        Ok(stmt)
    }

    pub async fn get_one(&self, id: impl Into<Value>) -> Result<Option<Document>> {
        let id = id.into();
        require_id(&id)?;
        let mut stmt = self.find(ID_FILTER)?;
        stmt.bind("id", id).execute_one().await
    }

    pub async fn remove_one(&self, id: impl Into<Value>) -> Result<UpdateResult> {
        let id = id.into();
        require_id(&id)?;
        let mut stmt = self.remove(ID_FILTER)?;
        stmt.bind("id", id).execute().await
    }

    /// Replace the document with identifier `id`. Succeeds with zero
    /// affected items when nothing matches.
    pub async fn replace_one(
        &self,
        id: impl Into<Value>,
        document: impl IntoDocument,
    ) -> Result<UpdateResult> {
        let id = id.into();
        require_id(&id)?;
        let document = replacement(&id, document)?;

        let mut stmt = self.modify(ID_FILTER)?;
        stmt.replace_with(document);
        stmt.bind("id", id).execute().await
    }

    /// Insert the document, or replace the one already stored under `id`.
    pub async fn add_or_replace_one(
        &self,
        id: impl Into<Value>,
        document: impl IntoDocument,
    ) -> Result<UpdateResult> {
        if !self.session.server_version().supports(ServerVersion::UPSERT) {
            return Err(ServerVersion::unsupported(ServerVersion::UPSERT));
        }
        let id = id.into();
        require_id(&id)?;
        let mut document = replacement(&id, document)?;
        document.shift_insert(0, ID_FIELD.to_string(), id);

        let mut stmt = AddStatement::new(self.clone());
        stmt.upsert().add(document)?;
        let result = stmt.execute().await?;
        Ok(UpdateResult {
            affected_items: result.affected_items,
        })
    }

    pub async fn count(&self) -> Result<u64> {
        match self
            .session
            .send(Request::Count {
                target: self.target.clone(),
            })
            .await?
        {
            Response::Count { count } => Ok(count),
            other => Err(unexpected_response("count", &other)),
        }
    }
}

fn require_id(id: &Value) -> Result<()> {
    let blank = match id {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    };
    if blank {
        return Err(DocError::Bind(
            "Parameter 'id' cannot be null or empty".to_string(),
        ));
    }
    Ok(())
}

/// A replacement may repeat the matched `_id` but not name another one.
fn replacement(id: &Value, document: impl IntoDocument) -> Result<Document> {
    let mut document = document.into_document()?;
    if let Some(existing) = document.shift_remove(ID_FIELD)
        && !existing.loosely_equals(id)
    {
        return Err(DocError::Bind(
            "Replacement document has an _id that is different than the matched document."
                .to_string(),
        ));
    }
    Ok(document)
}
