//! Request/response messages exchanged with the execution collaborator.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    DocError, Result,
    ast::{DocumentPath, Expr},
    value::Value,
};

/// Server version reported at session handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServerVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl ServerVersion {
    /// First version with row locking on reads.
    pub const ROW_LOCKING: ServerVersion = ServerVersion::new(8, 0, 3);
    /// First version that honours `NOWAIT` and `SKIP LOCKED`.
    pub const LOCK_CONTENTION: ServerVersion = ServerVersion::new(8, 0, 5);
    /// First version with upsert on insert.
    pub const UPSERT: ServerVersion = ServerVersion::new(8, 0, 3);

    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn supports(&self, required: ServerVersion) -> bool {
        *self >= required
    }

    /// The fixed message for a feature the server is too old to support.
    pub fn unsupported(required: ServerVersion) -> DocError {
        DocError::Capability(format!(
            "This functionality is only supported from server version {required} onwards."
        ))
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ServerVersion {
    type Err = DocError;

    /// Accepts `8`, `8.0` and `8.0.19`, ignoring any `-suffix`.
    fn from_str(s: &str) -> Result<Self> {
        let core = s.trim().split(['-', ' ']).next().unwrap_or_default();
        let mut parts = core.split('.');
        let mut next = |name: &str| -> Result<u16> {
            match parts.next() {
                None => Ok(0),
                Some(p) => p.parse().map_err(|_| {
                    DocError::Config(format!("Invalid {name} component in server version '{s}'"))
                }),
            }
        };
        let version = ServerVersion::new(next("major")?, next("minor")?, next("patch")?);
        if parts.next().is_some() {
            return Err(DocError::Config(format!("Invalid server version '{s}'")));
        }
        Ok(version)
    }
}

/// Row lock intent on a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    #[default]
    None,
    Shared,
    Exclusive,
}

/// Behaviour when a requested row lock is held by another session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockContention {
    /// Wait until the lock is released or the wait times out
    #[default]
    Default,
    /// Fail immediately
    NoWait,
    /// Leave locked rows out of the result
    SkipLocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RowLock {
    Shared = 1,
    Exclusive = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LockOptions {
    NoWait = 1,
    SkipLocked = 2,
}

/// Protocol-level locking directive attached to a find request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockDirective {
    pub row_lock: RowLock,
    pub options: Option<LockOptions>,
}

impl LockDirective {
    /// Wire codes for `(row_lock, options)`.
    pub fn codes(&self) -> (u8, Option<u8>) {
        (self.row_lock as u8, self.options.map(|o| o as u8))
    }
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub expr: Expr,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub source: Expr,
    pub alias: Option<String>,
}

/// Everything a read or mutation carries besides its target.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatementOptions {
    pub filter: Option<Expr>,
    #[serde(default)]
    pub sort: Vec<SortSpec>,
    #[serde(default)]
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    /// At least 1 when present
    pub limit: Option<u64>,
    /// Passed through as given
    pub offset: Option<i64>,
    #[serde(default)]
    pub projection: Vec<Projection>,
    #[serde(default)]
    pub lock_mode: LockMode,
    #[serde(default)]
    pub lock_contention: LockContention,
}

impl StatementOptions {
    /// Apply `f` to every expression the options carry.
    pub fn map_exprs(self, f: &mut dyn FnMut(Expr) -> Expr) -> Self {
        StatementOptions {
            filter: self.filter.map(|e| e.map(f)),
            sort: self
                .sort
                .into_iter()
                .map(|s| SortSpec {
                    expr: s.expr.map(f),
                    direction: s.direction,
                })
                .collect(),
            group_by: self.group_by.into_iter().map(|e| e.map(f)).collect(),
            having: self.having.map(|e| e.map(f)),
            projection: self
                .projection
                .into_iter()
                .map(|p| Projection {
                    source: p.source.map(f),
                    alias: p.alias,
                })
                .collect(),
            ..self
        }
    }
}

/// A single change applied by an update request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum UpdateOperation {
    /// Create or overwrite the value at `path`
    Set { path: DocumentPath, value: Expr },
    /// Overwrite the value at `path` only if it already exists
    Change { path: DocumentPath, value: Expr },
    Unset { path: DocumentPath },
    /// JSON merge patch; nulls remove keys
    MergePatch { patch: Value },
    ArrayInsert { path: DocumentPath, value: Expr },
    ArrayAppend { path: DocumentPath, value: Expr },
}

impl UpdateOperation {
    fn map_value(self, f: &mut dyn FnMut(Expr) -> Expr) -> Self {
        match self {
            UpdateOperation::Set { path, value } => UpdateOperation::Set {
                path,
                value: value.map(f),
            },
            UpdateOperation::Change { path, value } => UpdateOperation::Change {
                path,
                value: value.map(f),
            },
            UpdateOperation::ArrayInsert { path, value } => UpdateOperation::ArrayInsert {
                path,
                value: value.map(f),
            },
            UpdateOperation::ArrayAppend { path, value } => UpdateOperation::ArrayAppend {
                path,
                value: value.map(f),
            },
            other => other,
        }
    }

    /// Apply `f` to the value expressions of every operation.
    pub fn map_all(ops: Vec<UpdateOperation>, f: &mut dyn FnMut(Expr) -> Expr) -> Vec<Self> {
        ops.into_iter().map(|op| op.map_value(f)).collect()
    }
}

/// Schema-qualified collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionRef {
    pub schema: String,
    pub name: String,
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Wire protocol messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    // Session lifecycle
    Hello {
        client_name: String,
    },

    // Collection management
    CreateCollection {
        target: CollectionRef,
        #[serde(default)]
        reuse_existing: bool,
    },

    DropCollection {
        target: CollectionRef,
    },

    ListCollections {
        schema: String,
    },

    // CRUD
    Find {
        target: CollectionRef,
        options: StatementOptions,
        lock: Option<LockDirective>,
    },

    Insert {
        target: CollectionRef,
        documents: Vec<Value>,
        /// Replace documents whose `_id` already exists
        #[serde(default)]
        upsert: bool,
    },

    Update {
        target: CollectionRef,
        options: StatementOptions,
        operations: Vec<UpdateOperation>,
    },

    Delete {
        target: CollectionRef,
        options: StatementOptions,
    },

    Count {
        target: CollectionRef,
    },

    // Transactions
    TxBegin,
    TxCommit,
    TxRollback,
}

impl Request {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Hello { .. } => "hello",
            Request::CreateCollection { .. } => "create_collection",
            Request::DropCollection { .. } => "drop_collection",
            Request::ListCollections { .. } => "list_collections",
            Request::Find { .. } => "find",
            Request::Insert { .. } => "insert",
            Request::Update { .. } => "update",
            Request::Delete { .. } => "delete",
            Request::Count { .. } => "count",
            Request::TxBegin => "tx_begin",
            Request::TxCommit => "tx_commit",
            Request::TxRollback => "tx_rollback",
        }
    }
}

/// Wire protocol response messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Welcome { server_version: String },
    Ok,
    Documents { documents: Vec<Value> },
    Affected { affected_items: u64 },
    Count { count: u64 },
    CollectionList { names: Vec<String> },
}

impl Response {
    pub fn name(&self) -> &'static str {
        match self {
            Response::Welcome { .. } => "welcome",
            Response::Ok => "ok",
            Response::Documents { .. } => "documents",
            Response::Affected { .. } => "affected",
            Response::Count { .. } => "count",
            Response::CollectionList { .. } => "collection_list",
        }
    }
}
