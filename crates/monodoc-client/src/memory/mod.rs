//! In-process execution backend
//!
//! [`MemoryTransport`] answers requests from an in-memory store. Handles made
//! with [`MemoryTransport::new_session`] share the store but act as separate
//! server sessions: each has its own transaction and its own row locks.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use indexmap::IndexMap;
use monodoc_common::{
    DocError, Document, Result, ServerError, Value,
    protocol::{
        CollectionRef, LockDirective, LockOptions, Request, Response, RowLock, ServerVersion,
        StatementOptions, UpdateOperation,
    },
};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{statement::ID_FIELD, transport::Transport};

mod eval;
mod query;
mod update;

type SessionId = u64;

/// Documents of one collection keyed by the text of their `_id`.
type Rows = IndexMap<String, Document>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RowKey {
    target: CollectionRef,
    id: String,
}

/// How to restore one row on rollback.
#[derive(Debug)]
struct Undo {
    target: CollectionRef,
    id: String,
    /// Position and content before the write, `None` if the row was new
    before: Option<(usize, Document)>,
}

#[derive(Debug, Default)]
struct SessionState {
    in_transaction: bool,
    undo: Vec<Undo>,
}

#[derive(Debug, Default)]
struct Store {
    collections: IndexMap<CollectionRef, Rows>,
    locks: HashMap<RowKey, Vec<(SessionId, RowLock)>>,
    sessions: HashMap<SessionId, SessionState>,
    next_session: SessionId,
}

impl Store {
    fn open_session(&mut self) -> SessionId {
        let id = self.next_session;
        self.next_session += 1;
        self.sessions.insert(id, SessionState::default());
        id
    }

    fn close_session(&mut self, session: SessionId) {
        self.rollback(session);
        self.sessions.remove(&session);
    }

    fn rows(&self, target: &CollectionRef) -> Result<&Rows> {
        self.collections
            .get(target)
            .ok_or_else(|| no_such_collection(target))
    }

    fn rows_mut(&mut self, target: &CollectionRef) -> Result<&mut Rows> {
        self.collections
            .get_mut(target)
            .ok_or_else(|| no_such_collection(target))
    }

    fn in_transaction(&self, session: SessionId) -> bool {
        self.sessions
            .get(&session)
            .is_some_and(|state| state.in_transaction)
    }

    /// Whether another session holds a lock incompatible with `wanted`.
    fn conflicts(&self, key: &RowKey, session: SessionId, wanted: RowLock) -> bool {
        self.locks.get(key).is_some_and(|holders| {
            holders.iter().any(|(holder, held)| {
                *holder != session && (wanted == RowLock::Exclusive || *held == RowLock::Exclusive)
            })
        })
    }

    fn acquire(&mut self, key: RowKey, session: SessionId, wanted: RowLock) {
        let holders = self.locks.entry(key).or_default();
        match holders.iter_mut().find(|(holder, _)| *holder == session) {
            Some((_, held)) if wanted == RowLock::Exclusive => *held = RowLock::Exclusive,
            Some(_) => {}
            None => holders.push((session, wanted)),
        }
    }

    fn release(&mut self, session: SessionId) {
        self.locks.retain(|_, holders| {
            holders.retain(|(holder, _)| *holder != session);
            !holders.is_empty()
        });
    }

    /// Store `doc` under `id`, returning the document it replaced.
    fn put(
        &mut self,
        session: SessionId,
        target: &CollectionRef,
        id: String,
        doc: Document,
    ) -> Result<Option<Document>> {
        let rows = self.rows_mut(target)?;
        let position = rows.get_index_of(&id);
        let previous = rows.insert(id.clone(), doc);
        let before = position.zip(previous.clone());
        self.record(session, target, id, before);
        Ok(previous)
    }

    fn delete(&mut self, session: SessionId, target: &CollectionRef, id: &str) -> Result<bool> {
        let Some((position, id, doc)) = self.rows_mut(target)?.shift_remove_full(id) else {
            return Ok(false);
        };
        self.record(session, target, id, Some((position, doc)));
        Ok(true)
    }

    /// Inside a transaction, remember how to undo a write and keep the row
    /// locked until the transaction ends.
    fn record(
        &mut self,
        session: SessionId,
        target: &CollectionRef,
        id: String,
        before: Option<(usize, Document)>,
    ) {
        if !self.in_transaction(session) {
            return;
        }
        let key = RowKey {
            target: target.clone(),
            id: id.clone(),
        };
        self.acquire(key, session, RowLock::Exclusive);
        if let Some(state) = self.sessions.get_mut(&session) {
            state.undo.push(Undo {
                target: target.clone(),
                id,
                before,
            });
        }
    }

    /// Starting a transaction inside another commits the first one.
    fn begin(&mut self, session: SessionId) {
        self.commit(session);
        if let Some(state) = self.sessions.get_mut(&session) {
            state.in_transaction = true;
        }
    }

    fn commit(&mut self, session: SessionId) {
        if let Some(state) = self.sessions.get_mut(&session) {
            state.in_transaction = false;
            state.undo.clear();
        }
        self.release(session);
    }

    fn rollback(&mut self, session: SessionId) {
        let undo = match self.sessions.get_mut(&session) {
            Some(state) => {
                state.in_transaction = false;
                std::mem::take(&mut state.undo)
            }
            None => Vec::new(),
        };
        if !undo.is_empty() {
            debug!(session, writes = undo.len(), "Rolling back transaction");
        }
        for entry in undo.into_iter().rev() {
            // dropped collections have nothing to restore
            let Some(rows) = self.collections.get_mut(&entry.target) else {
                continue;
            };
            match entry.before {
                None => {
                    rows.shift_remove(&entry.id);
                }
                Some((_, doc)) if rows.contains_key(&entry.id) => {
                    rows.insert(entry.id, doc);
                }
                Some((position, doc)) => {
                    let position = position.min(rows.len());
                    rows.shift_insert(position, entry.id, doc);
                }
            }
        }
        self.release(session);
    }
}

fn no_such_collection(target: &CollectionRef) -> DocError {
    DocError::server(
        ServerError::NO_SUCH_COLLECTION,
        format!("Table '{target}' doesn't exist"),
    )
}

fn lock_wait_timeout() -> DocError {
    DocError::server(
        ServerError::LOCK_WAIT_TIMEOUT,
        "Lock wait timeout exceeded; try restarting transaction",
    )
}

fn lock_nowait() -> DocError {
    DocError::server(
        ServerError::LOCK_NOWAIT,
        "Statement aborted because lock(s) could not be acquired immediately and NOWAIT is set",
    )
}

fn duplicate_key() -> DocError {
    DocError::server(
        ServerError::DUPLICATE_KEY,
        "Document contains a field value that is not unique but required to be for collection",
    )
}

fn missing_id() -> DocError {
    DocError::server(
        ServerError::MISSING_ID,
        "Document is missing a required field",
    )
}

/// Rows whose document satisfies `filter`, in storage order.
fn filter_rows(rows: &Rows, options: &StatementOptions) -> Result<Vec<(String, Value)>> {
    let mut matched = Vec::new();
    for (id, doc) in rows {
        let doc = Value::Object(doc.clone());
        if eval::matches_row(options.filter.as_ref(), &doc)? {
            matched.push((id.clone(), doc));
        }
    }
    Ok(matched)
}

/// An execution side that keeps everything in memory.
#[derive(Debug)]
pub struct MemoryTransport {
    store: Arc<Mutex<Store>>,
    session: SessionId,
    server_version: ServerVersion,
}

impl MemoryTransport {
    /// A fresh, empty store reporting `server_version`.
    pub fn new(server_version: ServerVersion) -> Self {
        let store = Arc::new(Mutex::new(Store::default()));
        let session = store.lock().open_session();
        Self {
            store,
            session,
            server_version,
        }
    }

    /// Another session over the same store.
    pub fn new_session(&self) -> Self {
        let session = self.store.lock().open_session();
        Self {
            store: self.store.clone(),
            session,
            server_version: self.server_version,
        }
    }

    /// Create `target` if needed and insert `documents` into it.
    pub fn seed<I>(&self, target: &CollectionRef, documents: I) -> Result<u64>
    where
        I: IntoIterator<Item = Document>,
    {
        self.execute(Request::CreateCollection {
            target: target.clone(),
            reuse_existing: true,
        })?;
        let documents: Vec<Value> = documents.into_iter().map(Value::Object).collect();
        if documents.is_empty() {
            return Ok(0);
        }
        match self.execute(Request::Insert {
            target: target.clone(),
            documents,
            upsert: false,
        })? {
            Response::Affected { affected_items } => Ok(affected_items),
            _ => Ok(0),
        }
    }

    fn execute(&self, request: Request) -> Result<Response> {
        let mut store = self.store.lock();
        let store = &mut *store;

        match request {
            Request::Hello { client_name } => {
                debug!(session = self.session, client = %client_name, "Client connected");
                Ok(Response::Welcome {
                    server_version: self.server_version.to_string(),
                })
            }

            Request::CreateCollection {
                target,
                reuse_existing,
            } => {
                if store.collections.contains_key(&target) {
                    if reuse_existing {
                        return Ok(Response::Ok);
                    }
                    return Err(DocError::server(
                        ServerError::COLLECTION_EXISTS,
                        format!("Table '{}' already exists", target.name),
                    ));
                }
                store.collections.insert(target, Rows::new());
                Ok(Response::Ok)
            }

            Request::DropCollection { target } => {
                store.collections.shift_remove(&target);
                store.locks.retain(|key, _| key.target != target);
                Ok(Response::Ok)
            }

            Request::ListCollections { schema } => Ok(Response::CollectionList {
                names: store
                    .collections
                    .keys()
                    .filter(|target| target.schema == schema)
                    .map(|target| target.name.clone())
                    .collect(),
            }),

            Request::Find {
                target,
                options,
                lock,
            } => self.find(store, &target, &options, lock),

            Request::Insert {
                target,
                documents,
                upsert,
            } => self.insert(store, &target, documents, upsert),

            Request::Update {
                target,
                options,
                operations,
            } => self.update(store, &target, &options, &operations),

            Request::Delete { target, options } => {
                let matched = self.select_for_write(store, &target, &options)?;
                let mut affected_items = 0;
                for (id, _) in matched {
                    if store.delete(self.session, &target, &id)? {
                        affected_items += 1;
                    }
                }
                Ok(Response::Affected { affected_items })
            }

            Request::Count { target } => Ok(Response::Count {
                count: store.rows(&target)?.len() as u64,
            }),

            Request::TxBegin => {
                store.begin(self.session);
                Ok(Response::Ok)
            }
            Request::TxCommit => {
                store.commit(self.session);
                Ok(Response::Ok)
            }
            Request::TxRollback => {
                store.rollback(self.session);
                Ok(Response::Ok)
            }
        }
    }

    fn find(
        &self,
        store: &mut Store,
        target: &CollectionRef,
        options: &StatementOptions,
        lock: Option<LockDirective>,
    ) -> Result<Response> {
        if lock.is_some() && !self.server_version.supports(ServerVersion::ROW_LOCKING) {
            return Err(ServerVersion::unsupported(ServerVersion::ROW_LOCKING));
        }

        let matched = filter_rows(store.rows(target)?, options)?;
        let matched = self.lock_rows(store, target, matched, lock)?;
        let rows = matched.into_iter().map(|(_, doc)| doc).collect();
        let documents = query::select(rows, options, store.rows(target)?.values())?;
        Ok(Response::Documents { documents })
    }

    /// Apply a locking read's directive to the matched rows.
    fn lock_rows(
        &self,
        store: &mut Store,
        target: &CollectionRef,
        matched: Vec<(String, Value)>,
        lock: Option<LockDirective>,
    ) -> Result<Vec<(String, Value)>> {
        let Some(lock) = lock else {
            return Ok(matched);
        };
        let reports_contention = self.server_version.supports(ServerVersion::LOCK_CONTENTION);

        let mut kept = Vec::with_capacity(matched.len());
        for (id, doc) in matched {
            let key = RowKey {
                target: target.clone(),
                id,
            };
            if store.conflicts(&key, self.session, lock.row_lock) {
                trace!(session = self.session, id = %key.id, "Row lock conflict");
                match lock.options {
                    _ if !reports_contention => return Err(lock_wait_timeout()),
                    None => return Err(lock_wait_timeout()),
                    Some(LockOptions::NoWait) => return Err(lock_nowait()),
                    Some(LockOptions::SkipLocked) => continue,
                }
            }
            kept.push((key, doc));
        }

        let retain = store.in_transaction(self.session);
        Ok(kept
            .into_iter()
            .map(|(key, doc)| {
                let id = key.id.clone();
                if retain {
                    store.acquire(key, self.session, lock.row_lock);
                }
                (id, doc)
            })
            .collect())
    }

    /// Matched rows of an update or delete after sort and window. Rows
    /// locked by another session make the whole statement fail.
    fn select_for_write(
        &self,
        store: &Store,
        target: &CollectionRef,
        options: &StatementOptions,
    ) -> Result<Vec<(String, Value)>> {
        let matched = filter_rows(store.rows(target)?, options)?;
        let matched = query::sort_rows(matched, &options.sort, |(_, doc)| doc)?;
        let matched = query::window(matched, options.limit, options.offset);
        for (id, _) in &matched {
            self.check_write(store, target, id)?;
        }
        Ok(matched)
    }

    fn check_write(&self, store: &Store, target: &CollectionRef, id: &str) -> Result<()> {
        let key = RowKey {
            target: target.clone(),
            id: id.to_string(),
        };
        if store.conflicts(&key, self.session, RowLock::Exclusive) {
            return Err(lock_wait_timeout());
        }
        Ok(())
    }

    fn insert(
        &self,
        store: &mut Store,
        target: &CollectionRef,
        documents: Vec<Value>,
        upsert: bool,
    ) -> Result<Response> {
        let rows = store.rows(target)?;
        let mut seen = HashSet::new();
        let mut prepared = Vec::with_capacity(documents.len());
        for doc in documents {
            let Value::Object(doc) = doc else {
                return Err(missing_id());
            };
            let id = doc.get(ID_FIELD).map(eval::text_of).ok_or_else(missing_id)?;
            if !upsert && (rows.contains_key(&id) || !seen.insert(id.clone())) {
                return Err(duplicate_key());
            }
            prepared.push((id, doc));
        }
        for (id, _) in &prepared {
            self.check_write(store, target, id)?;
        }

        // a replaced row counts twice, an identical one not at all
        let mut affected_items = 0;
        for (id, doc) in prepared {
            let unchanged = doc.clone();
            affected_items += match store.put(self.session, target, id, doc)? {
                None => 1,
                Some(previous) if previous != unchanged => 2,
                Some(_) => 0,
            };
        }
        Ok(Response::Affected { affected_items })
    }

    fn update(
        &self,
        store: &mut Store,
        target: &CollectionRef,
        options: &StatementOptions,
        operations: &[UpdateOperation],
    ) -> Result<Response> {
        if operations.is_empty() {
            return Err(DocError::server(
                ServerError::INVALID_UPDATE,
                "Invalid update expression list",
            ));
        }

        let mut changed = Vec::new();
        for (id, doc) in self.select_for_write(store, target, options)? {
            let Value::Object(mut doc) = doc else {
                continue;
            };
            if update::apply(&mut doc, operations)? {
                changed.push((id, doc));
            }
        }

        let affected_items = changed.len() as u64;
        for (id, doc) in changed {
            store.put(self.session, target, id, doc)?;
        }
        Ok(Response::Affected { affected_items })
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.store.lock().close_session(self.session);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        trace!(session = self.session, request = request.name(), "Executing request");
        self.execute(request)
    }

    fn server_version(&self) -> ServerVersion {
        self.server_version
    }
}

#[cfg(test)]
mod tests;
