use async_trait::async_trait;
use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::store::{Directory, IdentityProvider};
use crate::types::{User, UserStatus};

type HmacSha256 = Hmac<Sha256>;

/// Compute the SECRET_HASH for Cognito authentication
fn compute_secret_hash(username: &str, client_id: &str, client_secret: &str) -> String {
    let message = format!("{}{}", username, client_id);
    let mut mac = HmacSha256::new_from_slice(client_secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    let result = mac.finalize();
    general_purpose::STANDARD.encode(result.into_bytes())
}

/// Cognito-backed credential provisioning for invitation acceptance.
pub struct CognitoIdentity {
    client: CognitoClient,
    client_id: String,
    client_secret: String,
    user_pool_id: Option<String>,
}

impl CognitoIdentity {
    pub fn new(
        client: CognitoClient,
        client_id: String,
        client_secret: String,
        user_pool_id: Option<String>,
    ) -> Self {
        Self {
            client,
            client_id,
            client_secret,
            user_pool_id,
        }
    }
}

#[async_trait]
impl IdentityProvider for CognitoIdentity {
    async fn provision(&self, email: &str, password: &str, name: &str) -> CoreResult<String> {
        let secret_hash = compute_secret_hash(email, &self.client_id, &self.client_secret);

        let signup_result = self
            .client
            .sign_up()
            .client_id(&self.client_id)
            .username(email)
            .password(password)
            .secret_hash(&secret_hash)
            .user_attributes(
                aws_sdk_cognitoidentityprovider::types::AttributeType::builder()
                    .name("email")
                    .value(email)
                    .build()
                    .map_err(|e| CoreError::StoreUnavailable(format!("{:?}", e)))?,
            )
            .user_attributes(
                aws_sdk_cognitoidentityprovider::types::AttributeType::builder()
                    .name("name")
                    .value(name)
                    .build()
                    .map_err(|e| CoreError::StoreUnavailable(format!("{:?}", e)))?,
            )
            .send()
            .await;

        let response = match signup_result {
            Ok(response) => response,
            Err(e) => {
                let error_message = format!("{:?}", e);
                tracing::error!("Cognito signup error: {}", error_message);
                return Err(if error_message.contains("UsernameExistsException") {
                    CoreError::Conflict("an account with this email already exists".to_string())
                } else if error_message.contains("InvalidPasswordException") {
                    CoreError::Validation(
                        "password does not meet the pool's complexity requirements".to_string(),
                    )
                } else if error_message.contains("InvalidParameterException") {
                    CoreError::Validation("invalid email or password format".to_string())
                } else {
                    CoreError::StoreUnavailable("signup failed".to_string())
                });
            }
        };

        // Auto-confirm: invited users already proved ownership of the email
        // through the invitation link.
        if let Some(user_pool_id) = &self.user_pool_id {
            if let Err(e) = self
                .client
                .admin_confirm_sign_up()
                .user_pool_id(user_pool_id)
                .username(email)
                .send()
                .await
            {
                tracing::error!("Failed to auto-confirm user {}: {:?}", email, e);
                // Don't fail acceptance, the user can still confirm via email
            }
        } else {
            tracing::warn!("User pool id not configured; skipping auto-confirm");
        }

        Ok(response.user_sub().to_string())
    }
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub id_token: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i32,
    pub user: User,
}

/// Password login plus the profile bookkeeping that goes with it.
pub struct Authenticator {
    client: CognitoClient,
    client_id: String,
    client_secret: String,
    directory: Arc<dyn Directory>,
}

impl Authenticator {
    pub fn new(
        client: CognitoClient,
        client_id: String,
        client_secret: String,
        directory: Arc<dyn Directory>,
    ) -> Self {
        Self {
            client,
            client_id,
            client_secret,
            directory,
        }
    }

    /// Authenticate against Cognito, then stamp last_login and move a
    /// PENDING_FIRST_LOGIN profile to ACTIVE.
    pub async fn login(&self, email: &str, password: &str) -> CoreResult<LoginResponse> {
        let secret_hash = compute_secret_hash(email, &self.client_id, &self.client_secret);

        let auth_result = self
            .client
            .initiate_auth()
            .auth_flow(aws_sdk_cognitoidentityprovider::types::AuthFlowType::UserPasswordAuth)
            .client_id(&self.client_id)
            .auth_parameters("USERNAME", email)
            .auth_parameters("PASSWORD", password)
            .auth_parameters("SECRET_HASH", &secret_hash)
            .send()
            .await
            .map_err(|e| {
                let error_message = format!("{:?}", e);
                tracing::error!("Cognito authentication error: {}", error_message);
                CoreError::Unauthorized
            })?;

        let tokens = auth_result
            .authentication_result()
            .ok_or(CoreError::Unauthorized)?;

        let mut user = self
            .directory
            .find_user_by_email(email)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("no profile for {}", email)))?;

        if user.status == UserStatus::Disabled {
            return Err(CoreError::Unauthorized);
        }
        if user.status == UserStatus::PendingFirstLogin {
            user.status = UserStatus::Active;
        }
        user.last_login = Some(Utc::now());
        self.directory.put_user(&user).await?;

        tracing::info!("Authentication successful for user: {}", user.user_id);
        Ok(LoginResponse {
            id_token: tokens.id_token().unwrap_or_default().to_string(),
            access_token: tokens.access_token().unwrap_or_default().to_string(),
            refresh_token: tokens.refresh_token().unwrap_or_default().to_string(),
            expires_in: tokens.expires_in(),
            user,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_hash_matches_known_vector() {
        let hash = compute_secret_hash("dana@example.com", "client-123", "top-secret");
        assert_eq!(hash, "1zFihQ6RePS31SEubpaY+R8E41l/D7FOUp2Kv8fXGpQ=");
    }

    #[test]
    fn secret_hash_depends_on_username() {
        let a = compute_secret_hash("a@example.com", "client-123", "top-secret");
        let b = compute_secret_hash("b@example.com", "client-123", "top-secret");
        assert_ne!(a, b);
    }
}
