//! The seam between the client core and whatever executes its requests.

use async_trait::async_trait;
use monodoc_common::{
    Result,
    protocol::{Request, Response, ServerVersion},
};

/// Carries one fully formed request to the execution side and returns its
/// response or the failure it reported. Implementations must not retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response>;

    /// Version of the server behind this transport.
    fn server_version(&self) -> ServerVersion;
}
