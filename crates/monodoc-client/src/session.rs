use std::sync::Arc;

use monodoc_common::{
    DocError, Result,
    protocol::{CollectionRef, Request, Response, ServerVersion},
};
use tracing::{info, trace, warn};

use crate::{collection::Collection, config::ClientConfig, identity::IdentitySource, transport::Transport};

const CLIENT_NAME: &str = concat!("monodoc/", env!("CARGO_PKG_VERSION"));

struct SessionInner {
    transport: Arc<dyn Transport>,
    server_version: ServerVersion,
    schema: String,
    identity: Arc<IdentitySource>,
    default_limit: Option<u64>,
}

/// An open session. Cheap to clone; clones share the transport and the
/// identity source.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("server_version", &self.inner.server_version)
            .field("schema", &self.inner.schema)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Handshake with the server and build the session's identity source
    /// from `config`.
    pub async fn open(transport: Arc<dyn Transport>, config: &ClientConfig) -> Result<Self> {
        let identity = Arc::new(config.identity_source()?);
        Self::open_with_identity(transport, config, identity).await
    }

    pub async fn open_with_identity(
        transport: Arc<dyn Transport>,
        config: &ClientConfig,
        identity: Arc<IdentitySource>,
    ) -> Result<Self> {
        let response = transport
            .send(Request::Hello {
                client_name: CLIENT_NAME.to_string(),
            })
            .await?;

        let server_version = match response {
            Response::Welcome { server_version } => server_version.parse()?,
            Response::Ok => transport.server_version(),
            other => return Err(unexpected_response("hello", &other)),
        };

        info!(
            %server_version,
            schema = %config.session.schema,
            id_prefix = identity.prefix(),
            "Session opened"
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                transport,
                server_version,
                schema: config.session.schema.clone(),
                identity,
                default_limit: config.statement.default_limit,
            }),
        })
    }

    pub fn server_version(&self) -> ServerVersion {
        self.inner.server_version
    }

    pub fn schema(&self) -> &str {
        &self.inner.schema
    }

    pub fn identity(&self) -> &Arc<IdentitySource> {
        &self.inner.identity
    }

    pub(crate) fn default_limit(&self) -> Option<u64> {
        self.inner.default_limit
    }

    /// Handle to a collection in the session's schema. No request is sent.
    pub fn collection(&self, name: &str) -> Collection {
        Collection::new(self.clone(), self.target(name))
    }

    pub async fn create_collection(&self, name: &str) -> Result<Collection> {
        self.create(name, false).await
    }

    /// Create the collection unless it already exists.
    pub async fn ensure_collection(&self, name: &str) -> Result<Collection> {
        self.create(name, true).await
    }

    async fn create(&self, name: &str, reuse_existing: bool) -> Result<Collection> {
        let target = self.target(name);
        self.send(Request::CreateCollection {
            target: target.clone(),
            reuse_existing,
        })
        .await?;
        info!(collection = %target, "Collection ready");
        Ok(Collection::new(self.clone(), target))
    }

    pub async fn drop_collection(&self, name: &str) -> Result<()> {
        let target = self.target(name);
        self.send(Request::DropCollection {
            target: target.clone(),
        })
        .await?;
        info!(collection = %target, "Collection dropped");
        Ok(())
    }

    pub async fn collection_names(&self) -> Result<Vec<String>> {
        match self
            .send(Request::ListCollections {
                schema: self.inner.schema.clone(),
            })
            .await?
        {
            Response::CollectionList { names } => Ok(names),
            other => Err(unexpected_response("list_collections", &other)),
        }
    }

    pub async fn start_transaction(&self) -> Result<()> {
        self.send(Request::TxBegin).await.map(drop)
    }

    pub async fn commit(&self) -> Result<()> {
        self.send(Request::TxCommit).await.map(drop)
    }

    pub async fn rollback(&self) -> Result<()> {
        self.send(Request::TxRollback).await.map(drop)
    }

    fn target(&self, name: &str) -> CollectionRef {
        CollectionRef {
            schema: self.inner.schema.clone(),
            name: name.to_string(),
        }
    }

    /// Dispatch one request. Server failures are returned unmodified.
    pub(crate) async fn send(&self, request: Request) -> Result<Response> {
        let name = request.name();
        trace!(request = name, "Dispatching");

        match self.inner.transport.send(request).await {
            Ok(response) => {
                trace!(request = name, response = response.name(), "Completed");
                Ok(response)
            }
            Err(DocError::Server(err)) if err.is_lock_failure() => {
                warn!(request = name, code = err.code, "{}", err.message);
                Err(DocError::Server(err))
            }
            Err(e) => Err(e),
        }
    }
}

pub(crate) fn unexpected_response(request: &str, response: &Response) -> DocError {
    DocError::Network(format!(
        "Unexpected '{}' response to '{request}'",
        response.name()
    ))
}
