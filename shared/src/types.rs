use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::permissions::{Action, Module, Role};
use crate::workflow::{RfaStatus, WorkRequestStatus};

// ========== USER ==========
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "PENDING_FIRST_LOGIN")]
    PendingFirstLogin,
    #[serde(rename = "DISABLED")]
    Disabled,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "ACTIVE",
            UserStatus::PendingFirstLogin => "PENDING_FIRST_LOGIN",
            UserStatus::Disabled => "DISABLED",
        }
    }

    pub fn parse(s: &str) -> Option<UserStatus> {
        match s {
            "ACTIVE" => Some(UserStatus::Active),
            "PENDING_FIRST_LOGIN" => Some(UserStatus::PendingFirstLogin),
            "DISABLED" => Some(UserStatus::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub employee_id: Option<String>,
    pub role: Role,
    pub sites: Vec<String>,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

// ========== SITE ==========

/// Per-site replacement of the compiled-in default policy
pub type RoleSettings = HashMap<Module, HashMap<Action, Vec<Role>>>;

/// Per-user short-circuit booleans, keyed user -> module -> action
pub type UserOverrides = HashMap<String, HashMap<Module, HashMap<Action, bool>>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub site_id: String,
    pub name: String,
    pub role_settings: Option<RoleSettings>,
    pub user_overrides: Option<UserOverrides>,
}

// ========== INVITATION ==========
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvitationStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "ACCEPTED")]
    Accepted,
    #[serde(rename = "EXPIRED")]
    Expired,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "PENDING",
            InvitationStatus::Accepted => "ACCEPTED",
            InvitationStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<InvitationStatus> {
        match s {
            "PENDING" => Some(InvitationStatus::Pending),
            "ACCEPTED" => Some(InvitationStatus::Accepted),
            "EXPIRED" => Some(InvitationStatus::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invitation {
    pub token: String,
    pub email: String,
    pub name: String,
    pub employee_id: Option<String>,
    pub role: Role,
    pub sites: Vec<String>,
    pub status: InvitationStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateInvitationRequest {
    pub email: String,
    pub name: String,
    pub employee_id: Option<String>,
    pub role: Role,
    pub sites: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct InvitationResult {
    pub token: String,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AcceptInvitationRequest {
    pub password: String,
}

/// Read-only projection for the acceptance screen. Deliberately omits
/// created_by and anything about the credential step.
#[derive(Debug, Serialize)]
pub struct InvitationView {
    pub email: String,
    pub name: String,
    pub role: Role,
    pub sites: Vec<String>,
    pub status: InvitationStatus,
    pub expires_at: DateTime<Utc>,
}

// ========== DOCUMENTS ==========
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RfaType {
    #[serde(rename = "SHOP")]
    Shop,
    #[serde(rename = "GEN")]
    Gen,
    #[serde(rename = "MAT")]
    Mat,
}

impl RfaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RfaType::Shop => "SHOP",
            RfaType::Gen => "GEN",
            RfaType::Mat => "MAT",
        }
    }

    pub fn parse(s: &str) -> Option<RfaType> {
        match s {
            "SHOP" => Some(RfaType::Shop),
            "GEN" => Some(RfaType::Gen),
            "MAT" => Some(RfaType::Mat),
            _ => None,
        }
    }

    /// The permission gate for submitting this RFA type
    pub fn create_action(&self) -> Action {
        match self {
            RfaType::Shop => Action::CreateShop,
            RfaType::Gen => Action::CreateGen,
            RfaType::Mat => Action::CreateMat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "URGENT")]
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Normal => "NORMAL",
            Priority::High => "HIGH",
            Priority::Urgent => "URGENT",
        }
    }

    pub fn parse(s: &str) -> Option<Priority> {
        match s {
            "LOW" => Some(Priority::Low),
            "NORMAL" => Some(Priority::Normal),
            "HIGH" => Some(Priority::High),
            "URGENT" => Some(Priority::Urgent),
            _ => None,
        }
    }
}

/// Immutable audit record of one actor's action on a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub user_id: String,
    pub role: Role,
    pub action: Action,
    /// Status the document entered as a result of this step
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RfaDocument {
    pub document_id: String,
    pub site_id: String,
    pub document_number: String,
    pub rfa_type: RfaType,
    pub title: String,
    pub category_code: Option<String>,
    pub priority: Priority,
    pub revision_number: u32,
    pub is_latest: bool,
    pub status: RfaStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub workflow: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkRequest {
    pub document_id: String,
    pub site_id: String,
    pub document_number: String,
    pub title: String,
    pub priority: Priority,
    pub revision_number: u32,
    pub is_latest: bool,
    pub status: WorkRequestStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub workflow: Vec<WorkflowStep>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRfaRequest {
    pub document_number: String,
    pub title: String,
    pub rfa_type: RfaType,
    pub category_code: Option<String>,
    pub priority: Priority,
}

#[derive(Debug, Deserialize)]
pub struct SubmitWorkRequestRequest {
    pub document_number: String,
    pub title: String,
    pub priority: Priority,
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub target_status: String,
    pub comment: Option<String>,
}

// ========== CATEGORY ==========
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub site_id: String,
    pub category_code: String,
    pub category_name: String,
    pub rfa_types: Vec<RfaType>,
    pub sequence: i32,
    pub active: bool,
}

// ========== NOTIFICATIONS ==========
#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub user_ids: Vec<String>,
    pub title: String,
    pub body: String,
    pub url: Option<String>,
}

/// A registered push endpoint for one user's device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEndpoint {
    pub endpoint_id: String,
    pub user_id: String,
    pub registered_at: DateTime<Utc>,
}
