use aws_config::timeout::TimeoutConfig;
use aws_sdk_apigatewaymanagement::Client as ApiGatewayManagementClient;
use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_sesv2::Client as SesClient;
use lambda_http::{run, service_fn, tracing, Error, Request};
use sitedocs_shared::{AppState, Config};
use std::env;
use std::sync::Arc;
use std::time::Duration;

mod http_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing::init_default_subscriber();

    // Initialize AWS clients once at startup. Store and push calls are
    // bounded so a slow dependency cannot pin a request to the Lambda
    // timeout.
    let aws_config = aws_config::from_env()
        .timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(Duration::from_secs(10))
                .operation_attempt_timeout(Duration::from_secs(5))
                .build(),
        )
        .load()
        .await;

    // API Gateway Management client for push delivery (optional endpoint)
    let api_gateway_client = env::var("PUSH_API_ENDPOINT").ok().map(|endpoint| {
        let api_config = aws_sdk_apigatewaymanagement::config::Builder::from(&aws_config)
            .endpoint_url(endpoint)
            .build();
        ApiGatewayManagementClient::from_conf(api_config)
    });

    let config = Config {
        table_name: env::var("TABLE_NAME").unwrap_or_else(|_| "sitedocs".to_string()),
        attachment_bucket: env::var("ATTACHMENT_BUCKET")
            .unwrap_or_else(|_| "sitedocs-attachments".to_string()),
        cognito_client_id: env::var("COGNITO_CLIENT_ID").expect("COGNITO_CLIENT_ID must be set"),
        cognito_client_secret: env::var("COGNITO_CLIENT_SECRET")
            .expect("COGNITO_CLIENT_SECRET must be set"),
        cognito_user_pool_id: env::var("COGNITO_USER_POOL_ID").ok(),
        frontend_url: env::var("FRONTEND_URL")
            .unwrap_or_else(|_| "https://app.sitedocs.example.com".to_string()),
        email_from_address: env::var("EMAIL_FROM_ADDRESS")
            .unwrap_or_else(|_| "noreply@sitedocs.example.com".to_string()),
    };

    let state = AppState::new(
        CognitoClient::new(&aws_config),
        DynamoClient::new(&aws_config),
        S3Client::new(&aws_config),
        SesClient::new(&aws_config),
        api_gateway_client,
        config,
    );

    run(service_fn(move |event: Request| {
        let state = Arc::clone(&state);
        async move { http_handler::function_handler(event, state).await }
    }))
    .await
}
