//! DynamoDB adapters for the store traits.
//!
//! Single-table layout:
//!   SITE#{site_id} / METADATA            site record, policy blobs as JSON strings
//!   SITE#{site_id} / CATEGORY#{code}     category record
//!   SITE#{site_id} / RFA#{doc_id}        one RFA revision
//!   SITE#{site_id} / WR#{doc_id}         one work request revision
//!   USER#{user_id} / METADATA            user profile
//!   USER#{user_id} / ENDPOINT#{id}       registered push endpoint
//!   INVITE#{token} / METADATA            invitation
//!
//! Nested structures (policy tables, workflow history) are stored as JSON
//! strings rather than nested maps; items written by earlier versions may
//! lack revision fields and are read as revision 0 / latest.

use async_trait::async_trait;
use aws_sdk_apigatewaymanagement::Client as ApiGatewayManagementClient;
use aws_sdk_dynamodb::types::{
    AttributeValue, Put, TransactWriteItem, Update,
};
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};
use crate::permissions::Role;
use crate::store::{
    Directory, DocumentStore, PushError, PushRegistry, PushSender,
};
use crate::types::{
    Category, Invitation, InvitationStatus, Priority, PushEndpoint, RfaDocument, RfaType, Site,
    User, UserStatus, WorkRequest, WorkflowStep,
};
use crate::workflow::{RfaStatus, StatusTable, WorkRequestStatus};

#[derive(Clone)]
pub struct DynamoStore {
    client: DynamoClient,
    table_name: String,
}

impl DynamoStore {
    pub fn new(client: DynamoClient, table_name: String) -> Self {
        Self { client, table_name }
    }
}

type Item = HashMap<String, AttributeValue>;

fn attr_s(item: &Item, key: &str) -> Option<String> {
    item.get(key).and_then(|v| v.as_s().ok()).cloned()
}

fn attr_n(item: &Item, key: &str) -> Option<u32> {
    item.get(key)
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse().ok())
}

fn attr_bool(item: &Item, key: &str) -> Option<bool> {
    item.get(key).and_then(|v| v.as_bool().ok()).copied()
}

fn attr_time(item: &Item, key: &str) -> Option<DateTime<Utc>> {
    attr_s(item, key)
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn attr_json<T: serde::de::DeserializeOwned>(item: &Item, key: &str) -> Option<T> {
    attr_s(item, key).and_then(|s| serde_json::from_str(&s).ok())
}

fn store_err<E: std::fmt::Debug>(context: &str, e: E) -> CoreError {
    tracing::error!("{}: {:?}", context, e);
    CoreError::StoreUnavailable(format!("{}: {:?}", context, e))
}

fn bad_item(pk: &str, field: &str) -> CoreError {
    tracing::error!("Item {} has missing or malformed field {}", pk, field);
    CoreError::StoreUnavailable(format!("item {} is missing field {}", pk, field))
}

// ---------- item <-> struct ----------

fn site_from_item(item: &Item) -> CoreResult<Site> {
    let site_id = attr_s(item, "site_id").ok_or_else(|| bad_item("SITE", "site_id"))?;
    Ok(Site {
        name: attr_s(item, "name").unwrap_or_default(),
        role_settings: attr_json(item, "role_settings"),
        user_overrides: attr_json(item, "user_overrides"),
        site_id,
    })
}

fn user_item(user: &User) -> Item {
    let mut item = Item::new();
    item.insert("PK".into(), AttributeValue::S(format!("USER#{}", user.user_id)));
    item.insert("SK".into(), AttributeValue::S("METADATA".to_string()));
    item.insert("entity_type".into(), AttributeValue::S("USER".to_string()));
    item.insert("user_id".into(), AttributeValue::S(user.user_id.clone()));
    item.insert("name".into(), AttributeValue::S(user.name.clone()));
    item.insert("email".into(), AttributeValue::S(user.email.clone()));
    if let Some(employee_id) = &user.employee_id {
        item.insert("employee_id".into(), AttributeValue::S(employee_id.clone()));
    }
    item.insert("role".into(), AttributeValue::S(user.role.as_str().to_string()));
    item.insert(
        "sites".into(),
        AttributeValue::S(serde_json::to_string(&user.sites).unwrap_or_else(|_| "[]".into())),
    );
    item.insert("status".into(), AttributeValue::S(user.status.as_str().to_string()));
    item.insert("created_at".into(), AttributeValue::S(user.created_at.to_rfc3339()));
    if let Some(last_login) = &user.last_login {
        item.insert("last_login".into(), AttributeValue::S(last_login.to_rfc3339()));
    }
    item
}

fn user_from_item(item: &Item) -> CoreResult<User> {
    let user_id = attr_s(item, "user_id").ok_or_else(|| bad_item("USER", "user_id"))?;
    let role = attr_s(item, "role")
        .and_then(|s| Role::parse(&s))
        .ok_or_else(|| bad_item(&user_id, "role"))?;
    Ok(User {
        name: attr_s(item, "name").unwrap_or_default(),
        email: attr_s(item, "email").unwrap_or_default(),
        employee_id: attr_s(item, "employee_id"),
        role,
        sites: attr_json(item, "sites").unwrap_or_default(),
        status: attr_s(item, "status")
            .and_then(|s| UserStatus::parse(&s))
            .unwrap_or(UserStatus::Active),
        created_at: attr_time(item, "created_at").unwrap_or_else(Utc::now),
        last_login: attr_time(item, "last_login"),
        user_id,
    })
}

fn invitation_item(inv: &Invitation) -> Item {
    let mut item = Item::new();
    item.insert("PK".into(), AttributeValue::S(format!("INVITE#{}", inv.token)));
    item.insert("SK".into(), AttributeValue::S("METADATA".to_string()));
    item.insert("entity_type".into(), AttributeValue::S("INVITATION".to_string()));
    item.insert("token".into(), AttributeValue::S(inv.token.clone()));
    item.insert("email".into(), AttributeValue::S(inv.email.clone()));
    item.insert("name".into(), AttributeValue::S(inv.name.clone()));
    if let Some(employee_id) = &inv.employee_id {
        item.insert("employee_id".into(), AttributeValue::S(employee_id.clone()));
    }
    item.insert("role".into(), AttributeValue::S(inv.role.as_str().to_string()));
    item.insert(
        "sites".into(),
        AttributeValue::S(serde_json::to_string(&inv.sites).unwrap_or_else(|_| "[]".into())),
    );
    item.insert("status".into(), AttributeValue::S(inv.status.as_str().to_string()));
    item.insert("created_by".into(), AttributeValue::S(inv.created_by.clone()));
    item.insert("created_at".into(), AttributeValue::S(inv.created_at.to_rfc3339()));
    item.insert("expires_at".into(), AttributeValue::S(inv.expires_at.to_rfc3339()));
    item
}

fn invitation_from_item(item: &Item) -> CoreResult<Invitation> {
    let token = attr_s(item, "token").ok_or_else(|| bad_item("INVITE", "token"))?;
    let role = attr_s(item, "role")
        .and_then(|s| Role::parse(&s))
        .ok_or_else(|| bad_item(&token, "role"))?;
    let status = attr_s(item, "status")
        .and_then(|s| InvitationStatus::parse(&s))
        .ok_or_else(|| bad_item(&token, "status"))?;
    Ok(Invitation {
        email: attr_s(item, "email").unwrap_or_default(),
        name: attr_s(item, "name").unwrap_or_default(),
        employee_id: attr_s(item, "employee_id"),
        role,
        sites: attr_json(item, "sites").unwrap_or_default(),
        status,
        created_by: attr_s(item, "created_by").unwrap_or_default(),
        created_at: attr_time(item, "created_at").unwrap_or_else(Utc::now),
        expires_at: attr_time(item, "expires_at").ok_or_else(|| bad_item(&token, "expires_at"))?,
        token,
    })
}

fn category_from_item(item: &Item) -> CoreResult<Category> {
    let category_code =
        attr_s(item, "category_code").ok_or_else(|| bad_item("CATEGORY", "category_code"))?;
    Ok(Category {
        site_id: attr_s(item, "site_id").unwrap_or_default(),
        category_name: attr_s(item, "category_name").unwrap_or_default(),
        rfa_types: attr_json(item, "rfa_types").unwrap_or_default(),
        sequence: item
            .get("sequence")
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse().ok())
            .unwrap_or(0),
        active: attr_bool(item, "active").unwrap_or(true),
        category_code,
    })
}

fn document_common(item: &mut Item, pk: String, sk: String, entity_type: &str) {
    item.insert("PK".into(), AttributeValue::S(pk));
    item.insert("SK".into(), AttributeValue::S(sk));
    item.insert("entity_type".into(), AttributeValue::S(entity_type.to_string()));
}

fn rfa_item(doc: &RfaDocument) -> Item {
    let mut item = Item::new();
    document_common(
        &mut item,
        format!("SITE#{}", doc.site_id),
        format!("RFA#{}", doc.document_id),
        "RFA",
    );
    item.insert("document_id".into(), AttributeValue::S(doc.document_id.clone()));
    item.insert("site_id".into(), AttributeValue::S(doc.site_id.clone()));
    item.insert("document_number".into(), AttributeValue::S(doc.document_number.clone()));
    item.insert("rfa_type".into(), AttributeValue::S(doc.rfa_type.as_str().to_string()));
    item.insert("title".into(), AttributeValue::S(doc.title.clone()));
    if let Some(code) = &doc.category_code {
        item.insert("category_code".into(), AttributeValue::S(code.clone()));
    }
    item.insert("priority".into(), AttributeValue::S(doc.priority.as_str().to_string()));
    item.insert("revision_number".into(), AttributeValue::N(doc.revision_number.to_string()));
    item.insert("is_latest".into(), AttributeValue::Bool(doc.is_latest));
    item.insert("status".into(), AttributeValue::S(doc.status.as_str().to_string()));
    item.insert("created_by".into(), AttributeValue::S(doc.created_by.clone()));
    item.insert("created_at".into(), AttributeValue::S(doc.created_at.to_rfc3339()));
    item.insert(
        "workflow".into(),
        AttributeValue::S(serde_json::to_string(&doc.workflow).unwrap_or_else(|_| "[]".into())),
    );
    item
}

fn rfa_from_item(item: &Item) -> CoreResult<RfaDocument> {
    let document_id =
        attr_s(item, "document_id").ok_or_else(|| bad_item("RFA", "document_id"))?;
    let rfa_type = attr_s(item, "rfa_type")
        .and_then(|s| RfaType::parse(&s))
        .ok_or_else(|| bad_item(&document_id, "rfa_type"))?;
    let status = attr_s(item, "status")
        .and_then(|s| RfaStatus::parse(&s))
        .ok_or_else(|| bad_item(&document_id, "status"))?;
    Ok(RfaDocument {
        site_id: attr_s(item, "site_id").unwrap_or_default(),
        document_number: attr_s(item, "document_number").unwrap_or_default(),
        rfa_type,
        title: attr_s(item, "title").unwrap_or_default(),
        category_code: attr_s(item, "category_code"),
        priority: attr_s(item, "priority")
            .and_then(|s| Priority::parse(&s))
            .unwrap_or(Priority::Normal),
        // Items written before revision tracking existed read as the sole
        // latest revision of their family.
        revision_number: attr_n(item, "revision_number").unwrap_or(0),
        is_latest: attr_bool(item, "is_latest").unwrap_or(true),
        status,
        created_by: attr_s(item, "created_by").unwrap_or_default(),
        created_at: attr_time(item, "created_at").unwrap_or_else(Utc::now),
        workflow: attr_json::<Vec<WorkflowStep>>(item, "workflow").unwrap_or_default(),
        document_id,
    })
}

fn work_request_item(doc: &WorkRequest) -> Item {
    let mut item = Item::new();
    document_common(
        &mut item,
        format!("SITE#{}", doc.site_id),
        format!("WR#{}", doc.document_id),
        "WORK_REQUEST",
    );
    item.insert("document_id".into(), AttributeValue::S(doc.document_id.clone()));
    item.insert("site_id".into(), AttributeValue::S(doc.site_id.clone()));
    item.insert("document_number".into(), AttributeValue::S(doc.document_number.clone()));
    item.insert("title".into(), AttributeValue::S(doc.title.clone()));
    item.insert("priority".into(), AttributeValue::S(doc.priority.as_str().to_string()));
    item.insert("revision_number".into(), AttributeValue::N(doc.revision_number.to_string()));
    item.insert("is_latest".into(), AttributeValue::Bool(doc.is_latest));
    item.insert("status".into(), AttributeValue::S(doc.status.as_str().to_string()));
    item.insert("created_by".into(), AttributeValue::S(doc.created_by.clone()));
    item.insert("created_at".into(), AttributeValue::S(doc.created_at.to_rfc3339()));
    item.insert(
        "workflow".into(),
        AttributeValue::S(serde_json::to_string(&doc.workflow).unwrap_or_else(|_| "[]".into())),
    );
    item
}

fn work_request_from_item(item: &Item) -> CoreResult<WorkRequest> {
    let document_id =
        attr_s(item, "document_id").ok_or_else(|| bad_item("WR", "document_id"))?;
    let status = attr_s(item, "status")
        .and_then(|s| WorkRequestStatus::parse(&s))
        .ok_or_else(|| bad_item(&document_id, "status"))?;
    Ok(WorkRequest {
        site_id: attr_s(item, "site_id").unwrap_or_default(),
        document_number: attr_s(item, "document_number").unwrap_or_default(),
        title: attr_s(item, "title").unwrap_or_default(),
        priority: attr_s(item, "priority")
            .and_then(|s| Priority::parse(&s))
            .unwrap_or(Priority::Normal),
        revision_number: attr_n(item, "revision_number").unwrap_or(0),
        is_latest: attr_bool(item, "is_latest").unwrap_or(true),
        status,
        created_by: attr_s(item, "created_by").unwrap_or_default(),
        created_at: attr_time(item, "created_at").unwrap_or_else(Utc::now),
        workflow: attr_json::<Vec<WorkflowStep>>(item, "workflow").unwrap_or_default(),
        document_id,
    })
}

// ---------- Directory ----------

impl DynamoStore {
    async fn get_metadata(&self, pk: String) -> CoreResult<Option<Item>> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(pk.clone()))
            .key("SK", AttributeValue::S("METADATA".to_string()))
            .send()
            .await
            .map_err(|e| store_err(&format!("get_item {}", pk), e))?;
        Ok(result.item().cloned())
    }

    async fn scan_users(
        &self,
        filter: &str,
        values: Vec<(&str, AttributeValue)>,
    ) -> CoreResult<Vec<Item>> {
        // Users are a small population; a filtered scan keeps the table free
        // of lookup GSIs.
        let mut builder = self
            .client
            .scan()
            .table_name(&self.table_name)
            .filter_expression(format!("entity_type = :et AND {}", filter))
            .expression_attribute_values(":et", AttributeValue::S("USER".to_string()));
        for (name, value) in values {
            builder = builder.expression_attribute_values(name, value);
        }
        let result = builder
            .send()
            .await
            .map_err(|e| store_err("scan users", e))?;
        Ok(result.items().to_vec())
    }
}

#[async_trait]
impl Directory for DynamoStore {
    async fn get_site(&self, site_id: &str) -> CoreResult<Option<Site>> {
        match self.get_metadata(format!("SITE#{}", site_id)).await? {
            Some(item) => Ok(Some(site_from_item(&item)?)),
            None => Ok(None),
        }
    }

    async fn get_user(&self, user_id: &str) -> CoreResult<Option<User>> {
        match self.get_metadata(format!("USER#{}", user_id)).await? {
            Some(item) => Ok(Some(user_from_item(&item)?)),
            None => Ok(None),
        }
    }

    async fn find_user_by_email(&self, email: &str) -> CoreResult<Option<User>> {
        let items = self
            .scan_users(
                "email = :email",
                vec![(":email", AttributeValue::S(email.to_string()))],
            )
            .await?;
        items.first().map(user_from_item).transpose()
    }

    async fn find_user_by_employee_id(&self, employee_id: &str) -> CoreResult<Option<User>> {
        let items = self
            .scan_users(
                "employee_id = :eid",
                vec![(":eid", AttributeValue::S(employee_id.to_string()))],
            )
            .await?;
        items.first().map(user_from_item).transpose()
    }

    async fn put_user(&self, user: &User) -> CoreResult<()> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(user_item(user)))
            .send()
            .await
            .map_err(|e| store_err(&format!("put_user {}", user.user_id), e))?;
        Ok(())
    }

    async fn users_with_role(&self, site_id: &str, role: Role) -> CoreResult<Vec<User>> {
        // sites is a JSON string attribute; contains() on the quoted id keeps
        // "site-1" from matching "site-10". role is a reserved word, hence
        // the #role mapping.
        let result = self
            .client
            .scan()
            .table_name(&self.table_name)
            .filter_expression("entity_type = :et AND #role = :role AND contains(sites, :site)")
            .expression_attribute_names("#role", "role")
            .expression_attribute_values(":et", AttributeValue::S("USER".to_string()))
            .expression_attribute_values(":role", AttributeValue::S(role.as_str().to_string()))
            .expression_attribute_values(":site", AttributeValue::S(format!("\"{}\"", site_id)))
            .send()
            .await
            .map_err(|e| store_err("scan users by role", e))?;
        result.items().iter().map(user_from_item).collect()
    }

    async fn get_invitation(&self, token: &str) -> CoreResult<Option<Invitation>> {
        match self.get_metadata(format!("INVITE#{}", token)).await? {
            Some(item) => Ok(Some(invitation_from_item(&item)?)),
            None => Ok(None),
        }
    }

    async fn put_invitation(&self, invitation: &Invitation) -> CoreResult<()> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(invitation_item(invitation)))
            .send()
            .await
            .map_err(|e| store_err(&format!("put_invitation {}", invitation.token), e))?;
        Ok(())
    }

    async fn consume_invitation(&self, token: &str) -> CoreResult<()> {
        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(format!("INVITE#{}", token)))
            .key("SK", AttributeValue::S("METADATA".to_string()))
            .update_expression("SET #status = :accepted, accepted_at = :now")
            .condition_expression("#status = :pending")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":accepted", AttributeValue::S("ACCEPTED".to_string()))
            .expression_attribute_values(":pending", AttributeValue::S("PENDING".to_string()))
            .expression_attribute_values(":now", AttributeValue::S(Utc::now().to_rfc3339()))
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_conditional_check_failed_exception() {
                    // Someone else consumed it, or it was already expired.
                    Err(CoreError::Expired)
                } else {
                    Err(store_err(&format!("consume_invitation {}", token), service_err))
                }
            }
        }
    }

    async fn mark_invitation_expired(&self, token: &str) -> CoreResult<()> {
        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(format!("INVITE#{}", token)))
            .key("SK", AttributeValue::S("METADATA".to_string()))
            .update_expression("SET #status = :expired")
            .condition_expression("#status = :pending")
            .expression_attribute_names("#status", "status")
            .expression_attribute_values(":expired", AttributeValue::S("EXPIRED".to_string()))
            .expression_attribute_values(":pending", AttributeValue::S("PENDING".to_string()))
            .send()
            .await;
        if let Err(e) = result {
            let service_err = e.into_service_error();
            // Losing the race to an accept is fine.
            if !service_err.is_conditional_check_failed_exception() {
                return Err(store_err(&format!("mark_invitation_expired {}", token), service_err));
            }
        }
        Ok(())
    }

    async fn list_categories(&self, site_id: &str) -> CoreResult<Vec<Category>> {
        let result = self
            .client
            .query()
            .table_name(&self.table_name)
            .key_condition_expression("PK = :pk AND begins_with(SK, :sk_prefix)")
            .expression_attribute_values(":pk", AttributeValue::S(format!("SITE#{}", site_id)))
            .expression_attribute_values(":sk_prefix", AttributeValue::S("CATEGORY#".to_string()))
            .send()
            .await
            .map_err(|e| store_err(&format!("list_categories {}", site_id), e))?;
        result.items().iter().map(category_from_item).collect()
    }
}

// ---------- DocumentStore ----------

/// Update that clears the latest flag on a superseded revision. Items
/// written before revision tracking carry no is_latest attribute; they read
/// as latest, so the condition must admit the missing attribute too or a
/// legacy family could never take a new revision.
fn superseded_flip(table_name: &str, pk: String, sk: String) -> CoreResult<Update> {
    Update::builder()
        .table_name(table_name)
        .key("PK", AttributeValue::S(pk))
        .key("SK", AttributeValue::S(sk))
        .update_expression("SET is_latest = :false")
        .condition_expression("attribute_not_exists(is_latest) OR is_latest = :true")
        .expression_attribute_values(":false", AttributeValue::Bool(false))
        .expression_attribute_values(":true", AttributeValue::Bool(true))
        .build()
        .map_err(|e| store_err("build revision update", e))
}

macro_rules! dynamo_document_store {
    ($ty:ty, $prefix:expr, $to_item:ident, $from_item:ident) => {
        #[async_trait]
        impl DocumentStore<$ty> for DynamoStore {
            async fn get(&self, site_id: &str, document_id: &str) -> CoreResult<Option<$ty>> {
                let result = self
                    .client
                    .get_item()
                    .table_name(&self.table_name)
                    .key("PK", AttributeValue::S(format!("SITE#{}", site_id)))
                    .key("SK", AttributeValue::S(format!("{}{}", $prefix, document_id)))
                    .send()
                    .await
                    .map_err(|e| store_err(&format!("get document {}", document_id), e))?;
                match result.item() {
                    Some(item) => Ok(Some($from_item(item)?)),
                    None => Ok(None),
                }
            }

            async fn family(&self, site_id: &str, document_number: &str) -> CoreResult<Vec<$ty>> {
                // Revisions of a family share PK and document_number; the SK
                // carries the per-revision id, so this is a prefix query plus
                // an attribute filter.
                let result = self
                    .client
                    .query()
                    .table_name(&self.table_name)
                    .key_condition_expression("PK = :pk AND begins_with(SK, :sk_prefix)")
                    .filter_expression("document_number = :number")
                    .expression_attribute_values(
                        ":pk",
                        AttributeValue::S(format!("SITE#{}", site_id)),
                    )
                    .expression_attribute_values(
                        ":sk_prefix",
                        AttributeValue::S($prefix.to_string()),
                    )
                    .expression_attribute_values(
                        ":number",
                        AttributeValue::S(document_number.to_string()),
                    )
                    .send()
                    .await
                    .map_err(|e| store_err(&format!("family {}", document_number), e))?;
                result.items().iter().map($from_item).collect()
            }

            async fn commit_revision(
                &self,
                new_doc: &$ty,
                superseded: Option<&$ty>,
            ) -> CoreResult<()> {
                let put = Put::builder()
                    .table_name(&self.table_name)
                    .set_item(Some($to_item(new_doc)))
                    .condition_expression("attribute_not_exists(PK)")
                    .build()
                    .map_err(|e| store_err("build revision put", e))?;
                let mut builder = self.client.transact_write_items().transact_items(
                    TransactWriteItem::builder().put(put).build(),
                );

                if let Some(prev) = superseded {
                    let update = superseded_flip(
                        &self.table_name,
                        format!("SITE#{}", prev.site_id),
                        format!("{}{}", $prefix, prev.document_id),
                    )?;
                    builder = builder
                        .transact_items(TransactWriteItem::builder().update(update).build());
                }

                builder.send().await.map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.is_transaction_canceled_exception() {
                        CoreError::Conflict(
                            "another revision was committed concurrently".to_string(),
                        )
                    } else {
                        store_err("commit_revision", service_err)
                    }
                })?;
                Ok(())
            }

            async fn update_if_status(&self, doc: &$ty, expected: &str) -> CoreResult<()> {
                let result = self
                    .client
                    .put_item()
                    .table_name(&self.table_name)
                    .set_item(Some($to_item(doc)))
                    .condition_expression("#status = :expected")
                    .expression_attribute_names("#status", "status")
                    .expression_attribute_values(
                        ":expected",
                        AttributeValue::S(expected.to_string()),
                    )
                    .send()
                    .await;
                match result {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        let service_err = e.into_service_error();
                        if service_err.is_conditional_check_failed_exception() {
                            Err(CoreError::Conflict(format!(
                                "document {} was modified concurrently",
                                doc.document_id
                            )))
                        } else {
                            Err(store_err(
                                &format!("update_if_status {}", doc.document_id),
                                service_err,
                            ))
                        }
                    }
                }
            }
        }
    };
}

dynamo_document_store!(RfaDocument, "RFA#", rfa_item, rfa_from_item);
dynamo_document_store!(WorkRequest, "WR#", work_request_item, work_request_from_item);

// ---------- PushRegistry ----------

#[async_trait]
impl PushRegistry for DynamoStore {
    async fn endpoints_for(&self, user_ids: &[String]) -> CoreResult<Vec<PushEndpoint>> {
        let mut endpoints = Vec::new();
        for user_id in user_ids {
            let result = self
                .client
                .query()
                .table_name(&self.table_name)
                .key_condition_expression("PK = :pk AND begins_with(SK, :sk_prefix)")
                .expression_attribute_values(":pk", AttributeValue::S(format!("USER#{}", user_id)))
                .expression_attribute_values(
                    ":sk_prefix",
                    AttributeValue::S("ENDPOINT#".to_string()),
                )
                .send()
                .await
                .map_err(|e| store_err(&format!("endpoints_for {}", user_id), e))?;
            for item in result.items() {
                let Some(endpoint_id) = attr_s(item, "endpoint_id") else {
                    continue;
                };
                endpoints.push(PushEndpoint {
                    endpoint_id,
                    user_id: user_id.clone(),
                    registered_at: attr_time(item, "registered_at").unwrap_or_else(Utc::now),
                });
            }
        }
        Ok(endpoints)
    }

    async fn register_endpoint(&self, endpoint: &PushEndpoint) -> CoreResult<()> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .item("PK", AttributeValue::S(format!("USER#{}", endpoint.user_id)))
            .item(
                "SK",
                AttributeValue::S(format!("ENDPOINT#{}", endpoint.endpoint_id)),
            )
            .item("entity_type", AttributeValue::S("PUSH_ENDPOINT".to_string()))
            .item("endpoint_id", AttributeValue::S(endpoint.endpoint_id.clone()))
            .item("user_id", AttributeValue::S(endpoint.user_id.clone()))
            .item(
                "registered_at",
                AttributeValue::S(endpoint.registered_at.to_rfc3339()),
            )
            .send()
            .await
            .map_err(|e| store_err(&format!("register_endpoint {}", endpoint.endpoint_id), e))?;
        Ok(())
    }

    async fn remove_endpoint(&self, user_id: &str, endpoint_id: &str) -> CoreResult<()> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(format!("USER#{}", user_id)))
            .key("SK", AttributeValue::S(format!("ENDPOINT#{}", endpoint_id)))
            .send()
            .await
            .map_err(|e| store_err(&format!("remove_endpoint {}", endpoint_id), e))?;
        Ok(())
    }
}

// ---------- PushSender ----------

/// Delivers payloads over API Gateway management connections. A GoneException
/// maps to [`PushError::Gone`] so the fanout can prune the registration.
pub struct ApiGatewayPushSender {
    client: ApiGatewayManagementClient,
}

impl ApiGatewayPushSender {
    pub fn new(client: ApiGatewayManagementClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PushSender for ApiGatewayPushSender {
    async fn push(&self, endpoint_id: &str, payload: &[u8]) -> Result<(), PushError> {
        let result = self
            .client
            .post_to_connection()
            .connection_id(endpoint_id)
            .data(payload.to_vec().into())
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_gone_exception() {
                    Err(PushError::Gone)
                } else {
                    Err(PushError::Other(format!("{:?}", service_err)))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_flip_tolerates_items_without_the_flag() {
        let update = superseded_flip(
            "sitedocs",
            "SITE#site-1".to_string(),
            "RFA#doc-0".to_string(),
        )
        .unwrap();

        // Items from before revision tracking have no is_latest attribute
        // but still count as the latest revision of their family.
        let condition = update.condition_expression().unwrap();
        assert!(condition.contains("attribute_not_exists(is_latest)"));
        assert!(condition.contains("is_latest = :true"));
        assert_eq!(update.update_expression(), "SET is_latest = :false");
    }
}
