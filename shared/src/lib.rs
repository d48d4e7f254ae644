pub mod attachments;
pub mod auth;
pub mod categories;
pub mod email;
pub mod error;
pub mod invites;
pub mod notify;
pub mod permissions;
pub mod revisions;
pub mod store;
pub mod types;
pub mod workflow;

use async_trait::async_trait;
use aws_sdk_apigatewaymanagement::Client as ApiGatewayManagementClient;
use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_sesv2::Client as SesClient;
use std::sync::Arc;

use crate::attachments::AttachmentStore;
use crate::auth::{Authenticator, CognitoIdentity};
use crate::invites::InvitationLedger;
use crate::notify::NotificationFanout;
use crate::revisions::RevisionChain;
use crate::store::dynamo::{ApiGatewayPushSender, DynamoStore};
use crate::store::{PushError, PushSender};
use crate::workflow::WorkflowService;

/// Environment-derived configuration
pub struct Config {
    pub table_name: String,
    pub attachment_bucket: String,
    pub cognito_client_id: String,
    pub cognito_client_secret: String,
    pub cognito_user_pool_id: Option<String>,
    pub frontend_url: String,
    pub email_from_address: String,
}

/// Stands in when no push endpoint is configured; every dispatch fails and
/// is counted as such in the report.
struct DisabledPushSender;

#[async_trait]
impl PushSender for DisabledPushSender {
    async fn push(&self, _endpoint_id: &str, _payload: &[u8]) -> Result<(), PushError> {
        Err(PushError::Other("push delivery is not configured".to_string()))
    }
}

/// Shared application state
pub struct AppState {
    pub store: Arc<DynamoStore>,
    pub workflows: WorkflowService,
    pub revisions: RevisionChain,
    pub invitations: InvitationLedger,
    pub authenticator: Authenticator,
    pub fanout: NotificationFanout,
    pub attachments: AttachmentStore,
    pub ses_client: SesClient,
    pub frontend_url: String,
    pub email_from_address: String,
}

impl AppState {
    pub fn new(
        cognito_client: CognitoClient,
        dynamo_client: DynamoClient,
        s3_client: S3Client,
        ses_client: SesClient,
        api_gateway_client: Option<ApiGatewayManagementClient>,
        config: Config,
    ) -> Arc<Self> {
        let store = Arc::new(DynamoStore::new(dynamo_client, config.table_name));

        let sender: Arc<dyn PushSender> = match api_gateway_client {
            Some(client) => Arc::new(ApiGatewayPushSender::new(client)),
            None => Arc::new(DisabledPushSender),
        };
        let fanout = NotificationFanout::new(store.clone(), sender);

        let workflows = WorkflowService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            fanout.clone(),
        );
        let revisions = RevisionChain::new(
            store.clone(),
            store.clone(),
            store.clone(),
            fanout.clone(),
        );

        let identity = Arc::new(CognitoIdentity::new(
            cognito_client.clone(),
            config.cognito_client_id.clone(),
            config.cognito_client_secret.clone(),
            config.cognito_user_pool_id,
        ));
        let invitations =
            InvitationLedger::new(store.clone(), identity, config.frontend_url.clone());
        let authenticator = Authenticator::new(
            cognito_client,
            config.cognito_client_id,
            config.cognito_client_secret,
            store.clone(),
        );

        let attachments = AttachmentStore::new(s3_client, config.attachment_bucket);

        Arc::new(Self {
            store,
            workflows,
            revisions,
            invitations,
            authenticator,
            fanout,
            attachments,
            ses_client,
            frontend_url: config.frontend_url,
            email_from_address: config.email_from_address,
        })
    }
}
