//! In-memory store fakes.
//!
//! Used by the test suites and by local development runs; every trait the
//! DynamoDB adapter implements has a counterpart here with the same
//! conditional-write semantics.

use async_trait::async_trait;
use chrono::Duration;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::permissions::Role;
use crate::revisions::RevisionRecord;
use crate::store::{
    Directory, DocumentStore, IdentityProvider, PushError, PushRegistry, PushSender,
};
use crate::types::{
    Category, Invitation, InvitationStatus, PushEndpoint, RfaDocument, Site, User, WorkRequest,
};
use crate::workflow::{RfaStatus, StatusTable, WorkRequestStatus};

#[derive(Default)]
struct Inner {
    sites: HashMap<String, Site>,
    users: HashMap<String, User>,
    invitations: HashMap<String, Invitation>,
    categories: Vec<Category>,
    rfas: HashMap<String, RfaDocument>,
    work_requests: HashMap<String, WorkRequest>,
    endpoints: Vec<PushEndpoint>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_site(&self, site: Site) {
        self.inner.lock().unwrap().sites.insert(site.site_id.clone(), site);
    }

    pub fn insert_user(&self, user: User) {
        self.inner.lock().unwrap().users.insert(user.user_id.clone(), user);
    }

    pub fn insert_category(&self, category: Category) {
        self.inner.lock().unwrap().categories.push(category);
    }

    pub fn insert_rfa(&self, doc: RfaDocument) {
        self.inner.lock().unwrap().rfas.insert(doc.document_id.clone(), doc);
    }

    pub fn insert_work_request(&self, doc: WorkRequest) {
        self.inner
            .lock()
            .unwrap()
            .work_requests
            .insert(doc.document_id.clone(), doc);
    }

    /// Simulate a concurrent writer moving a document.
    pub fn set_rfa_status(&self, document_id: &str, status: RfaStatus) {
        if let Some(doc) = self.inner.lock().unwrap().rfas.get_mut(document_id) {
            doc.status = status;
        }
    }

    pub fn set_work_request_status(&self, document_id: &str, status: WorkRequestStatus) {
        if let Some(doc) = self.inner.lock().unwrap().work_requests.get_mut(document_id) {
            doc.status = status;
        }
    }

    /// Shift an invitation's window into the past for expiry tests.
    pub fn age_invitation(&self, token: &str, by: Duration) {
        if let Some(inv) = self.inner.lock().unwrap().invitations.get_mut(token) {
            inv.created_at -= by;
            inv.expires_at -= by;
        }
    }
}

#[async_trait]
impl Directory for MemoryStore {
    async fn get_site(&self, site_id: &str) -> CoreResult<Option<Site>> {
        Ok(self.inner.lock().unwrap().sites.get(site_id).cloned())
    }

    async fn get_user(&self, user_id: &str) -> CoreResult<Option<User>> {
        Ok(self.inner.lock().unwrap().users.get(user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> CoreResult<Option<User>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_user_by_employee_id(&self, employee_id: &str) -> CoreResult<Option<User>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .values()
            .find(|u| u.employee_id.as_deref() == Some(employee_id))
            .cloned())
    }

    async fn put_user(&self, user: &User) -> CoreResult<()> {
        self.insert_user(user.clone());
        Ok(())
    }

    async fn users_with_role(&self, site_id: &str, role: Role) -> CoreResult<Vec<User>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .values()
            .filter(|u| u.role == role && u.sites.iter().any(|s| s == site_id))
            .cloned()
            .collect())
    }

    async fn get_invitation(&self, token: &str) -> CoreResult<Option<Invitation>> {
        Ok(self.inner.lock().unwrap().invitations.get(token).cloned())
    }

    async fn put_invitation(&self, invitation: &Invitation) -> CoreResult<()> {
        self.inner
            .lock()
            .unwrap()
            .invitations
            .insert(invitation.token.clone(), invitation.clone());
        Ok(())
    }

    async fn consume_invitation(&self, token: &str) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.invitations.get_mut(token) {
            Some(inv) if inv.status == InvitationStatus::Pending => {
                inv.status = InvitationStatus::Accepted;
                Ok(())
            }
            Some(_) => Err(CoreError::Expired),
            None => Err(CoreError::NotFound(format!("invitation {}", token))),
        }
    }

    async fn mark_invitation_expired(&self, token: &str) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(inv) = inner.invitations.get_mut(token) {
            if inv.status == InvitationStatus::Pending {
                inv.status = InvitationStatus::Expired;
            }
        }
        Ok(())
    }

    async fn list_categories(&self, site_id: &str) -> CoreResult<Vec<Category>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .categories
            .iter()
            .filter(|c| c.site_id == site_id)
            .cloned()
            .collect())
    }
}

// The two document impls mirror the conditional semantics of the DynamoDB
// adapter: commit_revision is all-or-nothing under the lock, and
// update_if_status compares the stored status before writing.
macro_rules! memory_document_store {
    ($ty:ty, $field:ident) => {
        #[async_trait]
        impl DocumentStore<$ty> for MemoryStore {
            async fn get(&self, site_id: &str, document_id: &str) -> CoreResult<Option<$ty>> {
                Ok(self
                    .inner
                    .lock()
                    .unwrap()
                    .$field
                    .get(document_id)
                    .filter(|d| d.site_id == site_id)
                    .cloned())
            }

            async fn family(&self, site_id: &str, document_number: &str) -> CoreResult<Vec<$ty>> {
                Ok(self
                    .inner
                    .lock()
                    .unwrap()
                    .$field
                    .values()
                    .filter(|d| d.site_id == site_id && d.document_number == document_number)
                    .cloned()
                    .collect())
            }

            async fn commit_revision(
                &self,
                new_doc: &$ty,
                superseded: Option<&$ty>,
            ) -> CoreResult<()> {
                let mut inner = self.inner.lock().unwrap();
                if let Some(prev) = superseded {
                    match inner.$field.get_mut(&prev.document_id) {
                        Some(stored) if stored.is_latest() => {
                            stored.set_revision(stored.revision_number(), false)
                        }
                        _ => {
                            return Err(CoreError::Conflict(
                                "superseded revision is no longer latest".to_string(),
                            ))
                        }
                    }
                }
                inner.$field.insert(new_doc.document_id.clone(), new_doc.clone());
                Ok(())
            }

            async fn update_if_status(&self, doc: &$ty, expected: &str) -> CoreResult<()> {
                let mut inner = self.inner.lock().unwrap();
                match inner.$field.get(&doc.document_id) {
                    Some(stored) if stored.status.as_str() == expected => {
                        inner.$field.insert(doc.document_id.clone(), doc.clone());
                        Ok(())
                    }
                    Some(stored) => Err(CoreError::Conflict(format!(
                        "document {} moved to {} while the transition was in flight",
                        doc.document_id,
                        stored.status.as_str()
                    ))),
                    None => Err(CoreError::NotFound(format!("document {}", doc.document_id))),
                }
            }
        }
    };
}

memory_document_store!(RfaDocument, rfas);
memory_document_store!(WorkRequest, work_requests);

#[async_trait]
impl PushRegistry for MemoryStore {
    async fn endpoints_for(&self, user_ids: &[String]) -> CoreResult<Vec<PushEndpoint>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .endpoints
            .iter()
            .filter(|e| user_ids.contains(&e.user_id))
            .cloned()
            .collect())
    }

    async fn register_endpoint(&self, endpoint: &PushEndpoint) -> CoreResult<()> {
        self.inner.lock().unwrap().endpoints.push(endpoint.clone());
        Ok(())
    }

    async fn remove_endpoint(&self, user_id: &str, endpoint_id: &str) -> CoreResult<()> {
        self.inner
            .lock()
            .unwrap()
            .endpoints
            .retain(|e| !(e.user_id == user_id && e.endpoint_id == endpoint_id));
        Ok(())
    }
}

/// Push sender that records payloads and can be told to fail per endpoint.
#[derive(Default)]
pub struct RecordingPushSender {
    sent: Mutex<Vec<(String, Vec<u8>)>>,
    failing: Mutex<HashSet<String>>,
    gone: Mutex<HashSet<String>>,
}

impl RecordingPushSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_endpoint(&self, endpoint_id: &str) {
        self.failing.lock().unwrap().insert(endpoint_id.to_string());
    }

    pub fn gone_endpoint(&self, endpoint_id: &str) {
        self.gone.lock().unwrap().insert(endpoint_id.to_string());
    }
}

#[async_trait]
impl PushSender for RecordingPushSender {
    async fn push(&self, endpoint_id: &str, payload: &[u8]) -> Result<(), PushError> {
        if self.gone.lock().unwrap().contains(endpoint_id) {
            return Err(PushError::Gone);
        }
        if self.failing.lock().unwrap().contains(endpoint_id) {
            return Err(PushError::Other("simulated delivery failure".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((endpoint_id.to_string(), payload.to_vec()));
        Ok(())
    }
}

/// Identity fake: hands out opaque user ids without any external call.
#[derive(Default)]
pub struct FakeIdentity {
    provisioned: Mutex<Vec<String>>,
    fail_next: Mutex<bool>,
}

impl FakeIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provisioned(&self) -> Vec<String> {
        self.provisioned.lock().unwrap().clone()
    }

    /// Make the next provision call fail, simulating a transient outage.
    pub fn fail_once(&self) {
        *self.fail_next.lock().unwrap() = true;
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn provision(&self, email: &str, _password: &str, _name: &str) -> CoreResult<String> {
        if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
            return Err(CoreError::StoreUnavailable(
                "simulated identity outage".to_string(),
            ));
        }
        self.provisioned.lock().unwrap().push(email.to_string());
        Ok(Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;
    use crate::types::RfaType;
    use chrono::Utc;

    fn rfa(document_id: &str, status: RfaStatus) -> RfaDocument {
        RfaDocument {
            document_id: document_id.to_string(),
            site_id: "site-1".to_string(),
            document_number: "SD-100".to_string(),
            rfa_type: RfaType::Shop,
            title: "Rebar shop drawings".to_string(),
            category_code: None,
            priority: Priority::Normal,
            revision_number: 0,
            is_latest: true,
            status,
            created_by: "u1".to_string(),
            created_at: Utc::now(),
            workflow: Vec::new(),
        }
    }

    #[tokio::test]
    async fn update_if_status_rejects_stale_writers() {
        let store = MemoryStore::new();
        store.insert_rfa(rfa("doc-1", RfaStatus::PendingCmApproval));

        // Writer A read PENDING_CM_APPROVAL, then writer B moved the doc.
        store.set_rfa_status("doc-1", RfaStatus::Rejected);

        let mut stale = rfa("doc-1", RfaStatus::Approved);
        stale.workflow.clear();
        let err = store
            .update_if_status(&stale, "PENDING_CM_APPROVAL")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));

        // The interloper's state survived.
        let stored: RfaDocument = store.get("site-1", "doc-1").await.unwrap().unwrap();
        assert_eq!(stored.status, RfaStatus::Rejected);
    }

    #[tokio::test]
    async fn commit_revision_rejects_a_stale_predecessor() {
        let store = MemoryStore::new();
        let mut prev = rfa("doc-0", RfaStatus::RevisionRequired);
        prev.is_latest = false;
        store.insert_rfa(prev.clone());

        let mut next = rfa("doc-1", RfaStatus::PendingReview);
        next.revision_number = 1;
        let err = store.commit_revision(&next, Some(&prev)).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        // Nothing was committed.
        let gone: Option<RfaDocument> = store.get("site-1", "doc-1").await.unwrap();
        assert!(gone.is_none());
    }
}
