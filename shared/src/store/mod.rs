//! Collaborator seams for the document-control core.
//!
//! Core components take these traits as constructor parameters so tests run
//! against the in-memory fakes in [`memory`] while production wires up the
//! DynamoDB/Cognito/API Gateway adapters in [`dynamo`].

pub mod dynamo;
pub mod memory;

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::permissions::Role;
use crate::types::{Category, Invitation, PushEndpoint, Site, User};

/// Read/write access to sites, users, invitations and categories.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn get_site(&self, site_id: &str) -> CoreResult<Option<Site>>;
    async fn get_user(&self, user_id: &str) -> CoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> CoreResult<Option<User>>;
    async fn find_user_by_employee_id(&self, employee_id: &str) -> CoreResult<Option<User>>;
    async fn put_user(&self, user: &User) -> CoreResult<()>;
    async fn users_with_role(&self, site_id: &str, role: Role) -> CoreResult<Vec<User>>;

    async fn get_invitation(&self, token: &str) -> CoreResult<Option<Invitation>>;
    async fn put_invitation(&self, invitation: &Invitation) -> CoreResult<()>;
    /// Conditional PENDING -> ACCEPTED flip. Fails with `CoreError::Expired`
    /// when the invitation is no longer PENDING, so concurrent accepts
    /// cannot both win.
    async fn consume_invitation(&self, token: &str) -> CoreResult<()>;
    /// Lazy expiry write performed on read paths; best-effort.
    async fn mark_invitation_expired(&self, token: &str) -> CoreResult<()>;

    async fn list_categories(&self, site_id: &str) -> CoreResult<Vec<Category>>;
}

/// Per-document-type store. Implemented once for RFA documents and once for
/// work requests; the workflow and revision logic is generic over it.
#[async_trait]
pub trait DocumentStore<T>: Send + Sync {
    async fn get(&self, site_id: &str, document_id: &str) -> CoreResult<Option<T>>;
    /// All revisions sharing (site_id, document_number), any order.
    async fn family(&self, site_id: &str, document_number: &str) -> CoreResult<Vec<T>>;
    /// Write the new latest revision and clear the latest flag on the
    /// superseded one in a single atomic batch. All-or-nothing: a failure
    /// commits neither record.
    async fn commit_revision(&self, new_doc: &T, superseded: Option<&T>) -> CoreResult<()>;
    /// Persist `doc` only while the stored status still equals `expected`;
    /// fails with `CoreError::Conflict` when a concurrent transition won.
    async fn update_if_status(&self, doc: &T, expected: &str) -> CoreResult<()>;
}

/// Per-user set of registered push endpoints.
#[async_trait]
pub trait PushRegistry: Send + Sync {
    async fn endpoints_for(&self, user_ids: &[String]) -> CoreResult<Vec<PushEndpoint>>;
    async fn register_endpoint(&self, endpoint: &PushEndpoint) -> CoreResult<()>;
    async fn remove_endpoint(&self, user_id: &str, endpoint_id: &str) -> CoreResult<()>;
}

/// Outcome of dispatching to a single endpoint.
#[derive(Debug)]
pub enum PushError {
    /// The endpoint is permanently invalid and should be pruned.
    Gone,
    Other(String),
}

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn push(&self, endpoint_id: &str, payload: &[u8]) -> Result<(), PushError>;
}

/// Credential side of invitation acceptance.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Provision an email/password credential and return the identity user id.
    async fn provision(&self, email: &str, password: &str, name: &str) -> CoreResult<String>;
}
