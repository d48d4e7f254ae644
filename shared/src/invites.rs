use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::store::{Directory, IdentityProvider};
use crate::types::{
    CreateInvitationRequest, Invitation, InvitationResult, InvitationStatus, InvitationView, User,
    UserStatus,
};

const INVITE_VALID_DAYS: i64 = 7;

/// Issues, looks up, and consumes single-use invitation tokens.
///
/// Expiry is checked lazily on read; there is no background sweep. The
/// conditional consume in the store guarantees a token is accepted at most
/// once even under concurrent calls.
#[derive(Clone)]
pub struct InvitationLedger {
    directory: Arc<dyn Directory>,
    identity: Arc<dyn IdentityProvider>,
    frontend_url: String,
}

impl InvitationLedger {
    pub fn new(
        directory: Arc<dyn Directory>,
        identity: Arc<dyn IdentityProvider>,
        frontend_url: String,
    ) -> Self {
        Self {
            directory,
            identity,
            frontend_url,
        }
    }

    /// Create a PENDING invitation valid for 7 days and return the
    /// shareable acceptance URL.
    pub async fn issue(
        &self,
        created_by: &str,
        req: CreateInvitationRequest,
    ) -> CoreResult<InvitationResult> {
        if self.directory.find_user_by_email(&req.email).await?.is_some() {
            return Err(CoreError::Conflict(format!(
                "a user with email {} already exists",
                req.email
            )));
        }
        if let Some(employee_id) = &req.employee_id {
            if self
                .directory
                .find_user_by_employee_id(employee_id)
                .await?
                .is_some()
            {
                return Err(CoreError::Conflict(format!(
                    "a user with employee id {} already exists",
                    employee_id
                )));
            }
        }

        let token = Uuid::new_v4().to_string();
        let now = Utc::now();
        let invitation = Invitation {
            token: token.clone(),
            email: req.email,
            name: req.name,
            employee_id: req.employee_id,
            role: req.role,
            sites: req.sites,
            status: InvitationStatus::Pending,
            created_by: created_by.to_string(),
            created_at: now,
            expires_at: now + Duration::days(INVITE_VALID_DAYS),
        };
        self.directory.put_invitation(&invitation).await?;

        tracing::info!(
            "Invitation {} issued for {} by {}",
            token,
            invitation.email,
            created_by
        );
        Ok(InvitationResult {
            url: format!("{}/accept-invite?token={}", self.frontend_url, token),
            token,
            expires_at: invitation.expires_at,
        })
    }

    /// Consume an invitation exactly once, provision the credential and the
    /// profile it described, and return the new user.
    pub async fn accept(&self, token: &str, password: &str) -> CoreResult<User> {
        let invitation = self
            .directory
            .get_invitation(token)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("invitation {}", token)))?;

        if invitation.status != InvitationStatus::Pending {
            return Err(CoreError::Expired);
        }
        if Utc::now() > invitation.expires_at {
            // Lazy expiry: record it so later reads see EXPIRED directly.
            if let Err(e) = self.directory.mark_invitation_expired(token).await {
                tracing::warn!("Failed to mark invitation {} expired: {}", token, e);
            }
            return Err(CoreError::Expired);
        }

        // Conditional flip PENDING -> ACCEPTED. The loser of a concurrent
        // accept fails here and nothing is provisioned for it.
        self.directory.consume_invitation(token).await?;

        let user_id = match self
            .identity
            .provision(&invitation.email, password, &invitation.name)
            .await
        {
            Ok(user_id) => user_id,
            Err(e) => {
                // A transient provisioning failure must not burn the token.
                self.reopen(&invitation).await;
                return Err(e);
            }
        };

        let user = User {
            user_id,
            name: invitation.name.clone(),
            email: invitation.email.clone(),
            employee_id: invitation.employee_id.clone(),
            role: invitation.role,
            sites: invitation.sites.clone(),
            status: UserStatus::PendingFirstLogin,
            created_at: Utc::now(),
            last_login: None,
        };
        if let Err(e) = self.directory.put_user(&user).await {
            self.reopen(&invitation).await;
            return Err(e);
        }

        tracing::info!("Invitation {} accepted, user {} provisioned", token, user.user_id);
        Ok(user)
    }

    // Compensating write: the token was consumed but no user came of it,
    // so put it back to PENDING for a retry. Best-effort.
    async fn reopen(&self, invitation: &Invitation) {
        let mut restored = invitation.clone();
        restored.status = InvitationStatus::Pending;
        if let Err(e) = self.directory.put_invitation(&restored).await {
            tracing::error!(
                "Failed to restore invitation {} after provisioning error: {}",
                invitation.token,
                e
            );
        }
    }

    /// Read-only projection for the acceptance screen. Presents EXPIRED for
    /// a PENDING invitation past its validity without requiring a write.
    pub async fn lookup(&self, token: &str) -> CoreResult<InvitationView> {
        let invitation = self
            .directory
            .get_invitation(token)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("invitation {}", token)))?;

        let status = if invitation.status == InvitationStatus::Pending
            && Utc::now() > invitation.expires_at
        {
            InvitationStatus::Expired
        } else {
            invitation.status
        };

        Ok(InvitationView {
            email: invitation.email,
            name: invitation.name,
            role: invitation.role,
            sites: invitation.sites,
            status,
            expires_at: invitation.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::Role;
    use crate::store::memory::{FakeIdentity, MemoryStore};

    fn ledger(store: Arc<MemoryStore>) -> InvitationLedger {
        InvitationLedger::new(
            store,
            Arc::new(FakeIdentity::new()),
            "https://docs.example.com".to_string(),
        )
    }

    fn request(email: &str) -> CreateInvitationRequest {
        CreateInvitationRequest {
            email: email.to_string(),
            name: "Dana Reyes".to_string(),
            employee_id: Some("E-1042".to_string()),
            role: Role::Pe,
            sites: vec!["site-1".to_string()],
        }
    }

    #[tokio::test]
    async fn issue_then_accept_provisions_user() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger(store.clone());

        let result = ledger.issue("admin-1", request("dana@example.com")).await.unwrap();
        assert!(result.url.contains(&result.token));

        let user = ledger.accept(&result.token, "s3cret!A").await.unwrap();
        assert_eq!(user.email, "dana@example.com");
        assert_eq!(user.role, Role::Pe);
        assert_eq!(user.status, UserStatus::PendingFirstLogin);
        assert_eq!(user.sites, vec!["site-1".to_string()]);

        let stored = store.find_user_by_email("dana@example.com").await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn accept_is_single_use() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger(store.clone());

        let result = ledger.issue("admin-1", request("dana@example.com")).await.unwrap();
        ledger.accept(&result.token, "s3cret!A").await.unwrap();

        let err = ledger.accept(&result.token, "s3cret!A").await.unwrap_err();
        assert!(matches!(err, CoreError::Expired));
    }

    #[tokio::test]
    async fn provisioning_failure_does_not_burn_the_invitation() {
        let store = Arc::new(MemoryStore::new());
        let identity = Arc::new(FakeIdentity::new());
        let ledger = InvitationLedger::new(
            store.clone(),
            identity.clone(),
            "https://docs.example.com".to_string(),
        );

        let result = ledger.issue("admin-1", request("dana@example.com")).await.unwrap();

        identity.fail_once();
        let err = ledger.accept(&result.token, "s3cret!A").await.unwrap_err();
        assert!(matches!(err, CoreError::StoreUnavailable(_)));
        // No user came of the failed accept and the token is live again.
        assert!(store
            .find_user_by_email("dana@example.com")
            .await
            .unwrap()
            .is_none());
        let view = ledger.lookup(&result.token).await.unwrap();
        assert_eq!(view.status, InvitationStatus::Pending);

        // The retry completes normally.
        let user = ledger.accept(&result.token, "s3cret!A").await.unwrap();
        assert_eq!(user.email, "dana@example.com");
    }

    #[tokio::test]
    async fn expired_invitation_cannot_be_accepted() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger(store.clone());

        let result = ledger.issue("admin-1", request("dana@example.com")).await.unwrap();
        // Age the invitation past its 7-day window.
        store.age_invitation(&result.token, Duration::days(8));

        let err = ledger.accept(&result.token, "s3cret!A").await.unwrap_err();
        assert!(matches!(err, CoreError::Expired));
        // No user was provisioned for the failed accept.
        assert!(store
            .find_user_by_email("dana@example.com")
            .await
            .unwrap()
            .is_none());
        // And the lazy write landed.
        let view = ledger.lookup(&result.token).await.unwrap();
        assert_eq!(view.status, InvitationStatus::Expired);
    }

    #[tokio::test]
    async fn duplicate_email_or_employee_id_conflicts() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger(store.clone());

        let result = ledger.issue("admin-1", request("dana@example.com")).await.unwrap();
        ledger.accept(&result.token, "s3cret!A").await.unwrap();

        let err = ledger.issue("admin-1", request("dana@example.com")).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));

        // Same employee id under a different email still conflicts
        let mut req = request("other@example.com");
        req.employee_id = Some("E-1042".to_string());
        let err = ledger.issue("admin-1", req).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn lookup_is_read_only() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger(store.clone());

        let result = ledger.issue("admin-1", request("dana@example.com")).await.unwrap();
        let view = ledger.lookup(&result.token).await.unwrap();
        assert_eq!(view.status, InvitationStatus::Pending);
        assert_eq!(view.email, "dana@example.com");

        // Looking up does not consume the token
        ledger.accept(&result.token, "s3cret!A").await.unwrap();
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger(store);
        let err = ledger.accept("no-such-token", "pw").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
