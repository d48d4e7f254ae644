use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::notify::NotificationFanout;
use crate::permissions::{self, Action, Module, PermissionRequest, Role};
use crate::store::{Directory, DocumentStore};
use crate::types::{RfaDocument, Site, WorkRequest, WorkflowStep};

/// Who gets told about a document entering a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyTarget {
    /// Members of these roles on the document's site
    Roles(&'static [Role]),
    /// The user who created the revision
    Creator,
}

/// Explicit finite-state-machine table for one document type.
///
/// A status is terminal when `reachable` is empty; `gate` names the action
/// that permits leaving the status. The tests below assert the tables are
/// complete and consistent with the permission defaults.
pub trait StatusTable: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    const MODULE: Module;

    fn all() -> &'static [Self];
    fn as_str(&self) -> &'static str;
    fn parse(s: &str) -> Option<Self>;
    /// Legal next statuses from this one
    fn reachable(self) -> &'static [Self];
    /// Action gating any move out of this status
    fn gate(self) -> Option<Action>;
    /// Statuses the creator answers with a new revision, not a transition
    fn requires_new_revision(self) -> bool;
    /// Recipients when a document enters this status
    fn notify_on_entry(self) -> NotifyTarget;

    fn is_terminal(self) -> bool {
        self.reachable().is_empty()
    }
}

// ========== RFA ==========
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RfaStatus {
    #[serde(rename = "PENDING_REVIEW")]
    PendingReview,
    #[serde(rename = "PENDING_CM_APPROVAL")]
    PendingCmApproval,
    #[serde(rename = "APPROVED")]
    Approved,
    #[serde(rename = "APPROVED_WITH_COMMENTS")]
    ApprovedWithComments,
    #[serde(rename = "APPROVED_REVISION_REQUIRED")]
    ApprovedRevisionRequired,
    #[serde(rename = "REJECTED")]
    Rejected,
    #[serde(rename = "REVISION_REQUIRED")]
    RevisionRequired,
}

impl StatusTable for RfaStatus {
    const MODULE: Module = Module::Rfa;

    fn all() -> &'static [Self] {
        &[
            RfaStatus::PendingReview,
            RfaStatus::PendingCmApproval,
            RfaStatus::Approved,
            RfaStatus::ApprovedWithComments,
            RfaStatus::ApprovedRevisionRequired,
            RfaStatus::Rejected,
            RfaStatus::RevisionRequired,
        ]
    }

    fn as_str(&self) -> &'static str {
        match self {
            RfaStatus::PendingReview => "PENDING_REVIEW",
            RfaStatus::PendingCmApproval => "PENDING_CM_APPROVAL",
            RfaStatus::Approved => "APPROVED",
            RfaStatus::ApprovedWithComments => "APPROVED_WITH_COMMENTS",
            RfaStatus::ApprovedRevisionRequired => "APPROVED_REVISION_REQUIRED",
            RfaStatus::Rejected => "REJECTED",
            RfaStatus::RevisionRequired => "REVISION_REQUIRED",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|v| v.as_str() == s)
    }

    fn reachable(self) -> &'static [Self] {
        match self {
            RfaStatus::PendingReview => {
                &[RfaStatus::PendingCmApproval, RfaStatus::RevisionRequired]
            }
            RfaStatus::PendingCmApproval => &[
                RfaStatus::Approved,
                RfaStatus::ApprovedWithComments,
                RfaStatus::ApprovedRevisionRequired,
                RfaStatus::Rejected,
                RfaStatus::RevisionRequired,
            ],
            _ => &[],
        }
    }

    fn gate(self) -> Option<Action> {
        match self {
            RfaStatus::PendingReview => Some(Action::Review),
            RfaStatus::PendingCmApproval => Some(Action::Approve),
            _ => None,
        }
    }

    fn requires_new_revision(self) -> bool {
        matches!(
            self,
            RfaStatus::RevisionRequired | RfaStatus::ApprovedRevisionRequired
        )
    }

    fn notify_on_entry(self) -> NotifyTarget {
        match self {
            RfaStatus::PendingReview => NotifyTarget::Roles(&[Role::Oe, Role::Pe, Role::Se]),
            RfaStatus::PendingCmApproval => NotifyTarget::Roles(&[Role::Cm]),
            _ => NotifyTarget::Creator,
        }
    }
}

// ========== WORK REQUEST ==========
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkRequestStatus {
    #[serde(rename = "PENDING_APPROVAL")]
    PendingApproval,
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "PENDING_INSPECTION")]
    PendingInspection,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "REJECTED")]
    Rejected,
    #[serde(rename = "REVISION_REQUIRED")]
    RevisionRequired,
}

impl StatusTable for WorkRequestStatus {
    const MODULE: Module = Module::WorkRequest;

    fn all() -> &'static [Self] {
        &[
            WorkRequestStatus::PendingApproval,
            WorkRequestStatus::InProgress,
            WorkRequestStatus::PendingInspection,
            WorkRequestStatus::Completed,
            WorkRequestStatus::Rejected,
            WorkRequestStatus::RevisionRequired,
        ]
    }

    fn as_str(&self) -> &'static str {
        match self {
            WorkRequestStatus::PendingApproval => "PENDING_APPROVAL",
            WorkRequestStatus::InProgress => "IN_PROGRESS",
            WorkRequestStatus::PendingInspection => "PENDING_INSPECTION",
            WorkRequestStatus::Completed => "COMPLETED",
            WorkRequestStatus::Rejected => "REJECTED",
            WorkRequestStatus::RevisionRequired => "REVISION_REQUIRED",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|v| v.as_str() == s)
    }

    fn reachable(self) -> &'static [Self] {
        match self {
            WorkRequestStatus::PendingApproval => &[
                WorkRequestStatus::InProgress,
                WorkRequestStatus::Rejected,
                WorkRequestStatus::RevisionRequired,
            ],
            WorkRequestStatus::InProgress => &[WorkRequestStatus::PendingInspection],
            WorkRequestStatus::PendingInspection => &[
                WorkRequestStatus::Completed,
                WorkRequestStatus::RevisionRequired,
            ],
            _ => &[],
        }
    }

    fn gate(self) -> Option<Action> {
        match self {
            WorkRequestStatus::PendingApproval => Some(Action::ApproveDraft),
            WorkRequestStatus::InProgress => Some(Action::Execute),
            WorkRequestStatus::PendingInspection => Some(Action::Inspect),
            _ => None,
        }
    }

    fn requires_new_revision(self) -> bool {
        matches!(self, WorkRequestStatus::RevisionRequired)
    }

    fn notify_on_entry(self) -> NotifyTarget {
        match self {
            WorkRequestStatus::PendingApproval => NotifyTarget::Roles(&[Role::Oe, Role::Pe]),
            WorkRequestStatus::InProgress => NotifyTarget::Roles(&[Role::Se, Role::Pm]),
            WorkRequestStatus::PendingInspection => NotifyTarget::Roles(&[Role::Oe, Role::Pe]),
            _ => NotifyTarget::Creator,
        }
    }
}

// ========== TRANSITIONS ==========

#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

#[derive(Debug)]
pub struct TransitionPlan<S> {
    pub target: S,
    pub step: WorkflowStep,
    pub notify: NotifyTarget,
}

/// Validate one requested transition and produce the audit step.
///
/// Pure: no I/O, no mutation. Permission is checked against the action
/// gating the current status; reachability against the status table.
pub fn plan_transition<S: StatusTable>(
    current: S,
    target: S,
    actor: &Actor,
    site: Option<&Site>,
    comment: Option<String>,
) -> CoreResult<TransitionPlan<S>> {
    let action = current.gate().ok_or_else(|| CoreError::InvalidTransition {
        from: current.as_str().to_string(),
        to: target.as_str().to_string(),
    })?;

    let allowed = permissions::resolve(&PermissionRequest {
        site,
        user_id: &actor.user_id,
        role: actor.role,
        module: S::MODULE,
        action,
    });
    if !allowed {
        return Err(CoreError::PermissionDenied {
            role: actor.role,
            module: S::MODULE,
            action,
        });
    }

    if !current.reachable().contains(&target) {
        return Err(CoreError::InvalidTransition {
            from: current.as_str().to_string(),
            to: target.as_str().to_string(),
        });
    }

    Ok(TransitionPlan {
        target,
        step: WorkflowStep {
            user_id: actor.user_id.clone(),
            role: actor.role,
            action,
            status: target.as_str().to_string(),
            timestamp: Utc::now(),
            comment,
        },
        notify: target.notify_on_entry(),
    })
}

/// Shared shape of the two workflow-bearing document types.
pub trait WorkflowRecord: Clone + Send + Sync + 'static {
    type Status: StatusTable;

    fn document_id(&self) -> &str;
    fn site_id(&self) -> &str;
    fn document_number(&self) -> &str;
    fn title(&self) -> &str;
    fn created_by(&self) -> &str;
    fn status(&self) -> Self::Status;
    fn set_status(&mut self, status: Self::Status);
    fn push_step(&mut self, step: WorkflowStep);
}

impl WorkflowRecord for RfaDocument {
    type Status = RfaStatus;

    fn document_id(&self) -> &str {
        &self.document_id
    }
    fn site_id(&self) -> &str {
        &self.site_id
    }
    fn document_number(&self) -> &str {
        &self.document_number
    }
    fn title(&self) -> &str {
        &self.title
    }
    fn created_by(&self) -> &str {
        &self.created_by
    }
    fn status(&self) -> RfaStatus {
        self.status
    }
    fn set_status(&mut self, status: RfaStatus) {
        self.status = status;
    }
    fn push_step(&mut self, step: WorkflowStep) {
        self.workflow.push(step);
    }
}

impl WorkflowRecord for WorkRequest {
    type Status = WorkRequestStatus;

    fn document_id(&self) -> &str {
        &self.document_id
    }
    fn site_id(&self) -> &str {
        &self.site_id
    }
    fn document_number(&self) -> &str {
        &self.document_number
    }
    fn title(&self) -> &str {
        &self.title
    }
    fn created_by(&self) -> &str {
        &self.created_by
    }
    fn status(&self) -> WorkRequestStatus {
        self.status
    }
    fn set_status(&mut self, status: WorkRequestStatus) {
        self.status = status;
    }
    fn push_step(&mut self, step: WorkflowStep) {
        self.workflow.push(step);
    }
}

/// Loads a document, applies a transition with optimistic concurrency, and
/// fans out notifications fire-and-forget.
#[derive(Clone)]
pub struct WorkflowService {
    directory: Arc<dyn Directory>,
    rfas: Arc<dyn DocumentStore<RfaDocument>>,
    work_requests: Arc<dyn DocumentStore<WorkRequest>>,
    fanout: NotificationFanout,
}

impl WorkflowService {
    pub fn new(
        directory: Arc<dyn Directory>,
        rfas: Arc<dyn DocumentStore<RfaDocument>>,
        work_requests: Arc<dyn DocumentStore<WorkRequest>>,
        fanout: NotificationFanout,
    ) -> Self {
        Self {
            directory,
            rfas,
            work_requests,
            fanout,
        }
    }

    pub async fn transition_rfa(
        &self,
        site_id: &str,
        document_id: &str,
        actor: &Actor,
        target: RfaStatus,
        comment: Option<String>,
    ) -> CoreResult<RfaDocument> {
        self.run(&*self.rfas, site_id, document_id, actor, target, comment)
            .await
    }

    pub async fn transition_work_request(
        &self,
        site_id: &str,
        document_id: &str,
        actor: &Actor,
        target: WorkRequestStatus,
        comment: Option<String>,
    ) -> CoreResult<WorkRequest> {
        self.run(
            &*self.work_requests,
            site_id,
            document_id,
            actor,
            target,
            comment,
        )
        .await
    }

    async fn run<T: WorkflowRecord>(
        &self,
        store: &dyn DocumentStore<T>,
        site_id: &str,
        document_id: &str,
        actor: &Actor,
        target: T::Status,
        comment: Option<String>,
    ) -> CoreResult<T> {
        // Permission lookups fail closed: an unreadable site denies.
        let site = match self.directory.get_site(site_id).await {
            Ok(site) => site,
            Err(e) => {
                tracing::warn!("Site lookup failed for {}: {} - denying", site_id, e);
                None
            }
        };

        let mut doc = store
            .get(site_id, document_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("document {}", document_id)))?;
        let current = doc.status();

        let plan = plan_transition(current, target, actor, site.as_ref(), comment)?;
        doc.set_status(plan.target);
        doc.push_step(plan.step);

        // Conditional on the status we just read: a concurrent transition on
        // the same document fails here instead of being overwritten.
        store.update_if_status(&doc, current.as_str()).await?;

        tracing::info!(
            "Document {} moved {} -> {} by {} ({})",
            doc.document_id(),
            current.as_str(),
            plan.target.as_str(),
            actor.user_id,
            actor.role
        );

        // Fire-and-forget relative to the transition: a fanout failure never
        // rolls anything back.
        let recipients =
            resolve_recipients(&*self.directory, site_id, doc.created_by(), plan.notify).await;
        if !recipients.is_empty() {
            let title = format!("{} {}", doc.document_number(), plan.target.as_str());
            let body = doc.title().to_string();
            let url = format!("/sites/{}/documents/{}", site_id, doc.document_id());
            self.fanout
                .send(&recipients, &title, &body, Some(&url))
                .await;
        }

        Ok(doc)
    }

}

/// Resolve a notify target to concrete user ids. Lookup failures shrink the
/// recipient set instead of failing the caller.
pub(crate) async fn resolve_recipients(
    directory: &dyn Directory,
    site_id: &str,
    creator: &str,
    target: NotifyTarget,
) -> Vec<String> {
    match target {
        NotifyTarget::Creator => vec![creator.to_string()],
        NotifyTarget::Roles(roles) => {
            let mut user_ids = Vec::new();
            for role in roles {
                match directory.users_with_role(site_id, *role).await {
                    Ok(users) => user_ids.extend(users.into_iter().map(|u| u.user_id)),
                    Err(e) => {
                        tracing::warn!("Recipient lookup failed for {} on {}: {}", role, site_id, e)
                    }
                }
            }
            user_ids.sort();
            user_ids.dedup();
            user_ids
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::default_allowed;
    use crate::store::memory::{MemoryStore, RecordingPushSender};
    use crate::types::Priority;

    fn actor(user_id: &str, role: Role) -> Actor {
        Actor {
            user_id: user_id.to_string(),
            role,
        }
    }

    fn site() -> Site {
        Site {
            site_id: "site-1".to_string(),
            name: "North Tower".to_string(),
            role_settings: None,
            user_overrides: None,
        }
    }

    fn rfa(status: RfaStatus) -> RfaDocument {
        RfaDocument {
            document_id: "doc-1".to_string(),
            site_id: "site-1".to_string(),
            document_number: "SD-100".to_string(),
            rfa_type: crate::types::RfaType::Shop,
            title: "Rebar shop drawings".to_string(),
            category_code: None,
            priority: Priority::Normal,
            revision_number: 0,
            is_latest: true,
            status,
            created_by: "creator-1".to_string(),
            created_at: Utc::now(),
            workflow: Vec::new(),
        }
    }

    fn table_is_consistent<S: StatusTable>() {
        for status in S::all() {
            let reachable = status.reachable();
            match status.gate() {
                // Every gated status has somewhere to go and its gate exists
                // in the default policy for the module.
                Some(action) => {
                    assert!(!reachable.is_empty(), "{:?} gated but dead-ended", status);
                    assert!(
                        default_allowed(S::MODULE, action).is_some(),
                        "{:?} gate {:?} has no default policy entry",
                        status,
                        action
                    );
                }
                // Ungated statuses are terminal within the revision.
                None => assert!(reachable.is_empty(), "{:?} reachable but ungated", status),
            }
            for next in reachable {
                assert!(S::all().contains(next));
            }
            assert_eq!(S::parse(status.as_str()), Some(*status));
        }
    }

    #[test]
    fn rfa_table_is_complete() {
        table_is_consistent::<RfaStatus>();
    }

    #[test]
    fn work_request_table_is_complete() {
        table_is_consistent::<WorkRequestStatus>();
    }

    #[test]
    fn cm_approves_pending_rfa() {
        let site = site();
        let plan = plan_transition(
            RfaStatus::PendingCmApproval,
            RfaStatus::Approved,
            &actor("cm-1", Role::Cm),
            Some(&site),
            Some("Looks good".to_string()),
        )
        .unwrap();

        assert_eq!(plan.target, RfaStatus::Approved);
        assert_eq!(plan.step.action, Action::Approve);
        assert_eq!(plan.step.status, "APPROVED");
        assert_eq!(plan.notify, NotifyTarget::Creator);
    }

    #[test]
    fn unreachable_target_is_rejected() {
        let site = site();
        // PENDING_REVIEW cannot jump straight to APPROVED
        let err = plan_transition(
            RfaStatus::PendingReview,
            RfaStatus::Approved,
            &actor("oe-1", Role::Oe),
            Some(&site),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn terminal_status_admits_no_transition() {
        let site = site();
        let err = plan_transition(
            RfaStatus::Approved,
            RfaStatus::PendingReview,
            &actor("admin-1", Role::Admin),
            Some(&site),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn reviewer_permission_gates_pending_review_exit() {
        let site = site();
        // BIM is not on the review list
        let err = plan_transition(
            RfaStatus::PendingReview,
            RfaStatus::PendingCmApproval,
            &actor("bim-1", Role::Bim),
            Some(&site),
            None,
        )
        .unwrap_err();
        match err {
            CoreError::PermissionDenied { role, module, action } => {
                assert_eq!(role, Role::Bim);
                assert_eq!(module, Module::Rfa);
                assert_eq!(action, Action::Review);
            }
            other => panic!("expected PermissionDenied, got {:?}", other),
        }
    }

    #[test]
    fn work_request_inspection_closes_out() {
        let site = site();
        let plan = plan_transition(
            WorkRequestStatus::PendingInspection,
            WorkRequestStatus::Completed,
            &actor("oe-1", Role::Oe),
            Some(&site),
            None,
        )
        .unwrap();
        assert_eq!(plan.step.action, Action::Inspect);
        assert!(plan.target.is_terminal());
    }

    #[tokio::test]
    async fn service_appends_step_and_persists() {
        let store = Arc::new(MemoryStore::new());
        store.insert_site(site());
        store.insert_rfa(rfa(RfaStatus::PendingCmApproval));
        let fanout =
            NotificationFanout::new(store.clone(), Arc::new(RecordingPushSender::new()));
        let service =
            WorkflowService::new(store.clone(), store.clone(), store.clone(), fanout);

        let updated = service
            .transition_rfa(
                "site-1",
                "doc-1",
                &actor("cm-1", Role::Cm),
                RfaStatus::Approved,
                None,
            )
            .await
            .unwrap();

        assert_eq!(updated.status, RfaStatus::Approved);
        assert_eq!(updated.workflow.len(), 1);
        let stored: RfaDocument = store.get("site-1", "doc-1").await.unwrap().unwrap();
        assert_eq!(stored.status, RfaStatus::Approved);
        assert_eq!(stored.workflow.len(), 1);
    }

    #[tokio::test]
    async fn failed_transition_leaves_document_unchanged() {
        let store = Arc::new(MemoryStore::new());
        store.insert_site(site());
        store.insert_rfa(rfa(RfaStatus::PendingReview));
        let fanout =
            NotificationFanout::new(store.clone(), Arc::new(RecordingPushSender::new()));
        let service =
            WorkflowService::new(store.clone(), store.clone(), store.clone(), fanout);

        let err = service
            .transition_rfa(
                "site-1",
                "doc-1",
                &actor("oe-1", Role::Oe),
                RfaStatus::Approved,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));

        let stored: Option<RfaDocument> = store.get("site-1", "doc-1").await.unwrap();
        let stored = stored.unwrap();
        assert_eq!(stored.status, RfaStatus::PendingReview);
        assert!(stored.workflow.is_empty());
    }

    #[tokio::test]
    async fn concurrent_transition_conflicts() {
        let store = Arc::new(MemoryStore::new());
        store.insert_site(site());
        store.insert_rfa(rfa(RfaStatus::PendingCmApproval));
        let fanout =
            NotificationFanout::new(store.clone(), Arc::new(RecordingPushSender::new()));
        let service =
            WorkflowService::new(store.clone(), store.clone(), store.clone(), fanout);

        // Another writer moves the document between our read and write.
        store.set_rfa_status("doc-1", RfaStatus::Rejected);
        // MemoryStore re-reads on update, so the first service call already
        // sees REJECTED and reports the stale state as invalid.
        let err = service
            .transition_rfa(
                "site-1",
                "doc-1",
                &actor("cm-1", Role::Cm),
                RfaStatus::Approved,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }
}
