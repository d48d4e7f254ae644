use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, RequestExt, Response,
};
use serde::Deserialize;
use sitedocs_shared::attachments::UploadAttachmentRequest;
use sitedocs_shared::categories;
use sitedocs_shared::email;
use sitedocs_shared::error::CoreError;
use sitedocs_shared::permissions::{self, Action, Module, Role};
use sitedocs_shared::store::{Directory, PushRegistry};
use sitedocs_shared::types::{
    AcceptInvitationRequest, CreateInvitationRequest, NotifyRequest, PushEndpoint,
    SubmitRfaRequest, SubmitWorkRequestRequest, TransitionRequest,
};
use sitedocs_shared::workflow::{Actor, RfaStatus, StatusTable, WorkRequestStatus};
use sitedocs_shared::AppState;
use std::sync::Arc;

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct PermissionCheckRequest {
    site_id: String,
    /// Defaults to the caller when absent
    user_id: Option<String>,
    module: String,
    action: String,
}

#[derive(Deserialize)]
struct RegisterEndpointRequest {
    endpoint_id: String,
}

/// Main Lambda handler - routes requests to the document-control services
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    let method = event.method().clone();
    let path = event.uri().path().to_string();
    tracing::info!("API invoked - Method: {} Path: {}", method, path);

    // Handle CORS preflight
    if method == Method::OPTIONS {
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header(
                "Access-Control-Allow-Methods",
                "GET,POST,PUT,PATCH,DELETE,OPTIONS",
            )
            .header(
                "Access-Control-Allow-Headers",
                "Content-Type,Authorization,X-User-Id",
            )
            .body(Body::Empty)
            .map_err(Box::new)?);
    }

    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let body = event.body();

    // Public endpoints first: login and the invitation acceptance flow carry
    // no caller identity.
    match (&method, parts.as_slice()) {
        (&Method::POST, ["login"]) => {
            let req: LoginRequest = match serde_json::from_slice(body) {
                Ok(req) => req,
                Err(e) => return bad_request(&format!("Invalid request body: {}", e)),
            };
            return match state.authenticator.login(&req.email, &req.password).await {
                Ok(response) => json_ok(StatusCode::OK, &serde_json::to_string(&response)?),
                Err(e) => error_response(&e),
            };
        }
        (&Method::GET, ["invitations", token]) => {
            return match state.invitations.lookup(token).await {
                Ok(view) => json_ok(StatusCode::OK, &serde_json::to_string(&view)?),
                Err(e) => error_response(&e),
            };
        }
        (&Method::POST, ["invitations", token, "accept"]) => {
            let req: AcceptInvitationRequest = match serde_json::from_slice(body) {
                Ok(req) => req,
                Err(e) => return bad_request(&format!("Invalid request body: {}", e)),
            };
            return match state.invitations.accept(token, &req.password).await {
                Ok(user) => json_ok(StatusCode::CREATED, &serde_json::to_string(&user)?),
                Err(e) => error_response(&e),
            };
        }
        _ => {}
    }

    // Everything below needs a caller. API Gateway validates the JWT; the
    // X-User-Id header is a local development override.
    let Some(caller_id) = caller_id(&event) else {
        return error_response(&CoreError::Unauthorized);
    };

    match (&method, parts.as_slice()) {
        // ---------- invitations ----------
        (&Method::POST, ["invitations"]) => {
            let actor = match load_actor(&state, &caller_id).await {
                Ok(actor) => actor,
                Err(e) => return error_response(&e),
            };
            if !matches!(actor.role, Role::Admin | Role::SiteAdmin | Role::AdminSite2) {
                return forbidden(&format!(
                    "role {} cannot issue invitations",
                    actor.role
                ));
            }
            let req: CreateInvitationRequest = match serde_json::from_slice(body) {
                Ok(req) => req,
                Err(e) => return bad_request(&format!("Invalid request body: {}", e)),
            };
            let email_addr = req.email.clone();
            let recipient = req.name.clone();
            match state.invitations.issue(&caller_id, req).await {
                Ok(result) => {
                    // Email delivery is best-effort; the invitation stands
                    // either way and the URL is in the response.
                    if let Err(e) = email::send_invitation_email(
                        &state.ses_client,
                        &state.email_from_address,
                        &email_addr,
                        &recipient,
                        &result.url,
                    )
                    .await
                    {
                        tracing::error!("Failed to send invitation email: {}", e);
                    }
                    json_ok(StatusCode::CREATED, &serde_json::to_string(&result)?)
                }
                Err(e) => error_response(&e),
            }
        }

        // ---------- permission resolution ----------
        (&Method::POST, ["permissions", "check"]) => {
            let req: PermissionCheckRequest = match serde_json::from_slice(body) {
                Ok(req) => req,
                Err(e) => return bad_request(&format!("Invalid request body: {}", e)),
            };
            let Some(module) = Module::parse(&req.module) else {
                return bad_request(&format!("Unknown module: {}", req.module));
            };
            let Some(action) = Action::parse(&req.action) else {
                return bad_request(&format!("Unknown action: {}", req.action));
            };
            let subject_id = req.user_id.as_deref().unwrap_or(&caller_id);
            let subject = match load_actor(&state, subject_id).await {
                Ok(actor) => actor,
                Err(e) => return error_response(&e),
            };
            let allowed = permissions::check(
                &*state.store,
                &req.site_id,
                &subject.user_id,
                subject.role,
                module,
                action,
            )
            .await;
            json_ok(
                StatusCode::OK,
                &serde_json::json!({ "allowed": allowed }).to_string(),
            )
        }

        // ---------- categories ----------
        (&Method::GET, ["sites", site_id, "categories"]) => {
            match state.store.list_categories(site_id).await {
                Ok(cats) => {
                    let ordered = categories::display_order(cats);
                    json_ok(StatusCode::OK, &serde_json::to_string(&ordered)?)
                }
                Err(e) => error_response(&e),
            }
        }

        // ---------- RFA documents ----------
        (&Method::POST, ["sites", site_id, "rfas"]) => {
            let actor = match load_actor(&state, &caller_id).await {
                Ok(actor) => actor,
                Err(e) => return error_response(&e),
            };
            let req: SubmitRfaRequest = match serde_json::from_slice(body) {
                Ok(req) => req,
                Err(e) => return bad_request(&format!("Invalid request body: {}", e)),
            };
            match state.revisions.submit_rfa(site_id, &actor, req).await {
                Ok(doc) => json_ok(StatusCode::CREATED, &serde_json::to_string(&doc)?),
                Err(e) => error_response(&e),
            }
        }
        (&Method::GET, ["sites", site_id, "rfas", document_number]) => {
            match state.revisions.rfa_family(site_id, document_number).await {
                Ok(family) => json_ok(StatusCode::OK, &serde_json::to_string(&family)?),
                Err(e) => error_response(&e),
            }
        }
        (&Method::POST, ["sites", site_id, "rfas", document_id, "transition"]) => {
            let actor = match load_actor(&state, &caller_id).await {
                Ok(actor) => actor,
                Err(e) => return error_response(&e),
            };
            let req: TransitionRequest = match serde_json::from_slice(body) {
                Ok(req) => req,
                Err(e) => return bad_request(&format!("Invalid request body: {}", e)),
            };
            let Some(target) = RfaStatus::parse(&req.target_status) else {
                return bad_request(&format!("Unknown status: {}", req.target_status));
            };
            match state
                .workflows
                .transition_rfa(site_id, document_id, &actor, target, req.comment)
                .await
            {
                Ok(doc) => json_ok(StatusCode::OK, &serde_json::to_string(&doc)?),
                Err(e) => error_response(&e),
            }
        }

        // ---------- work requests ----------
        (&Method::POST, ["sites", site_id, "work-requests"]) => {
            let actor = match load_actor(&state, &caller_id).await {
                Ok(actor) => actor,
                Err(e) => return error_response(&e),
            };
            let req: SubmitWorkRequestRequest = match serde_json::from_slice(body) {
                Ok(req) => req,
                Err(e) => return bad_request(&format!("Invalid request body: {}", e)),
            };
            match state.revisions.submit_work_request(site_id, &actor, req).await {
                Ok(doc) => json_ok(StatusCode::CREATED, &serde_json::to_string(&doc)?),
                Err(e) => error_response(&e),
            }
        }
        (&Method::GET, ["sites", site_id, "work-requests", document_number]) => {
            match state
                .revisions
                .work_request_family(site_id, document_number)
                .await
            {
                Ok(family) => json_ok(StatusCode::OK, &serde_json::to_string(&family)?),
                Err(e) => error_response(&e),
            }
        }
        (&Method::POST, ["sites", site_id, "work-requests", document_id, "transition"]) => {
            let actor = match load_actor(&state, &caller_id).await {
                Ok(actor) => actor,
                Err(e) => return error_response(&e),
            };
            let req: TransitionRequest = match serde_json::from_slice(body) {
                Ok(req) => req,
                Err(e) => return bad_request(&format!("Invalid request body: {}", e)),
            };
            let Some(target) = WorkRequestStatus::parse(&req.target_status) else {
                return bad_request(&format!("Unknown status: {}", req.target_status));
            };
            match state
                .workflows
                .transition_work_request(site_id, document_id, &actor, target, req.comment)
                .await
            {
                Ok(doc) => json_ok(StatusCode::OK, &serde_json::to_string(&doc)?),
                Err(e) => error_response(&e),
            }
        }

        // ---------- notifications ----------
        (&Method::POST, ["notify"]) => {
            let req: NotifyRequest = match serde_json::from_slice(body) {
                Ok(req) => req,
                Err(e) => return bad_request(&format!("Invalid request body: {}", e)),
            };
            let report = state
                .fanout
                .send(&req.user_ids, &req.title, &req.body, req.url.as_deref())
                .await;
            json_ok(StatusCode::OK, &serde_json::to_string(&report)?)
        }
        (&Method::POST, ["endpoints"]) => {
            let req: RegisterEndpointRequest = match serde_json::from_slice(body) {
                Ok(req) => req,
                Err(e) => return bad_request(&format!("Invalid request body: {}", e)),
            };
            let endpoint = PushEndpoint {
                endpoint_id: req.endpoint_id,
                user_id: caller_id.clone(),
                registered_at: chrono::Utc::now(),
            };
            match state.store.register_endpoint(&endpoint).await {
                Ok(()) => json_ok(StatusCode::CREATED, &serde_json::to_string(&endpoint)?),
                Err(e) => error_response(&e),
            }
        }
        (&Method::DELETE, ["endpoints", endpoint_id]) => {
            match state.store.remove_endpoint(&caller_id, endpoint_id).await {
                Ok(()) => json_ok(StatusCode::OK, &serde_json::json!({"removed": true}).to_string()),
                Err(e) => error_response(&e),
            }
        }

        // ---------- attachments ----------
        (&Method::POST, ["attachments"]) => {
            let req: UploadAttachmentRequest = match serde_json::from_slice(body) {
                Ok(req) => req,
                Err(e) => return bad_request(&format!("Invalid request body: {}", e)),
            };
            match state.attachments.upload(req).await {
                Ok(response) => json_ok(StatusCode::CREATED, &serde_json::to_string(&response)?),
                Err(e) => error_response(&e),
            }
        }

        _ => not_found(),
    }
}

/// Caller identity: X-User-Id header (local development) or the JWT sub
/// claim that API Gateway validated.
fn caller_id(event: &Request) -> Option<String> {
    event
        .headers()
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .or_else(|| {
            event
                .request_context()
                .authorizer()
                .and_then(|auth| auth.jwt.as_ref())
                .and_then(|jwt| jwt.claims.get("sub"))
                .map(|s| s.to_string())
        })
}

async fn load_actor(state: &AppState, user_id: &str) -> Result<Actor, CoreError> {
    let user = state
        .store
        .get_user(user_id)
        .await?
        .ok_or(CoreError::Unauthorized)?;
    Ok(Actor {
        user_id: user.user_id,
        role: user.role,
    })
}

fn json_ok(status: StatusCode, body: &str) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(body.to_string().into())
        .map_err(Box::new)?)
}

fn error_response(e: &CoreError) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(e.status_code())
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(
            serde_json::json!({
                "error": e.code(),
                "message": e.to_string(),
            })
            .to_string()
            .into(),
        )
        .map_err(Box::new)?)
}

fn bad_request(message: &str) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(
            serde_json::json!({
                "error": "InvalidRequest",
                "message": message,
            })
            .to_string()
            .into(),
        )
        .map_err(Box::new)?)
}

fn forbidden(message: &str) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::FORBIDDEN)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(
            serde_json::json!({
                "error": "PermissionDenied",
                "message": message,
            })
            .to_string()
            .into(),
        )
        .map_err(Box::new)?)
}

fn not_found() -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::json!({"error": "Not found"}).to_string().into())
        .map_err(Box::new)?)
}
