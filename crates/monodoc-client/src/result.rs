//! Statement result types

use std::collections::VecDeque;

use monodoc_common::{DocError, Document, Result, Value, protocol::Response};

use crate::session::unexpected_response;

/// Documents returned by a find, in server order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocResult {
    documents: VecDeque<Document>,
}

impl DocResult {
    pub(crate) fn from_response(response: Response) -> Result<Self> {
        match response {
            Response::Documents { documents } => {
                let documents = documents
                    .into_iter()
                    .map(|doc| match doc {
                        Value::Object(doc) => Ok(doc),
                        other => Err(DocError::Network(format!(
                            "Expected a document in the result set, got {}",
                            other.type_name()
                        ))),
                    })
                    .collect::<Result<_>>()?;
                Ok(Self { documents })
            }
            other => Err(unexpected_response("find", &other)),
        }
    }

    /// Take the next document, if any remain.
    pub fn fetch_one(&mut self) -> Option<Document> {
        self.documents.pop_front()
    }

    /// Take every remaining document.
    pub fn fetch_all(&mut self) -> Vec<Document> {
        self.documents.drain(..).collect()
    }

    /// Remaining document count.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Field `key` of every remaining document, `Null` where absent.
    pub fn column(&self, key: &str) -> Vec<Value> {
        self.documents
            .iter()
            .map(|doc| doc.get(key).cloned().unwrap_or_default())
            .collect()
    }
}

impl IntoIterator for DocResult {
    type Item = Document;
    type IntoIter = std::collections::vec_deque::IntoIter<Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.into_iter()
    }
}

/// Outcome of a modify, remove or replace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub affected_items: u64,
}

impl UpdateResult {
    pub(crate) fn from_response(request: &str, response: Response) -> Result<Self> {
        match response {
            Response::Affected { affected_items } => Ok(Self { affected_items }),
            other => Err(unexpected_response(request, &other)),
        }
    }
}

/// Outcome of an add.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddResult {
    pub affected_items: u64,
    /// Identifiers generated for documents that had none, in insertion
    /// order. Caller supplied identifiers never appear here.
    pub generated_ids: Vec<String>,
}
