use monodoc_common::{
    Document, IntoDocument, Result, Value,
    protocol::{Request, Response},
};
use tracing::debug;

use crate::{collection::Collection, result::AddResult, session::unexpected_response};

pub(crate) const ID_FIELD: &str = "_id";

/// Inserts documents, generating identifiers for those without one.
#[derive(Debug, Clone)]
pub struct AddStatement {
    collection: Collection,
    documents: Vec<Document>,
    generated_ids: Vec<String>,
    upsert: bool,
}

impl AddStatement {
    pub(crate) fn new(collection: Collection) -> Self {
        Self {
            collection,
            documents: Vec::new(),
            generated_ids: Vec::new(),
            upsert: false,
        }
    }

    /// Replace documents whose identifier already exists.
    pub(crate) fn upsert(&mut self) -> &mut Self {
        self.upsert = true;
        self
    }

    /// Queue another document.
    pub fn add(&mut self, document: impl IntoDocument) -> Result<&mut Self> {
        self.documents.push(document.into_document()?);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Give every queued document lacking `_id` a generated one. Each
    /// document is assigned at most once, so repeated executes reuse ids.
    fn assign_ids(&mut self) {
        let identity = self.collection.session().identity().clone();
        for doc in &mut self.documents {
            if doc.contains_key(ID_FIELD) {
                continue;
            }
            let id = identity.next_id();
            debug!(id = %id, "Generated document id");
            doc.shift_insert(0, ID_FIELD.to_string(), Value::String(id.clone()));
            self.generated_ids.push(id);
        }
    }

    pub fn to_request(&mut self) -> Request {
        self.assign_ids();
        Request::Insert {
            target: self.collection.target().clone(),
            documents: self.documents.iter().cloned().map(Value::Object).collect(),
            upsert: self.upsert,
        }
    }

    pub async fn execute(&mut self) -> Result<AddResult> {
        if self.documents.is_empty() {
            return Ok(AddResult::default());
        }

        let request = self.to_request();
        match self.collection.session().send(request).await? {
            Response::Affected { affected_items } => Ok(AddResult {
                affected_items,
                generated_ids: self.generated_ids.clone(),
            }),
            other => Err(unexpected_response("insert", &other)),
        }
    }
}
