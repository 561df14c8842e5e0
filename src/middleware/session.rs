//! Session authentication — delegate "who is this?" to the portal
//!
//! The portal owns user sessions. [`PortalSessionValidator`] forwards the
//! caller's credentials to the portal's current-user endpoint; a 2xx JSON
//! body identifies the user. [`SessionAuthMiddleware`] turns the outcome
//! into a 401/403 short-circuit for ordinary requests.

use super::{json_response, Middleware, RequestContext};
use crate::config::SessionConfig;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use http::Response;
use serde::Deserialize;
use std::sync::Arc;

/// Credential headers forwarded to the portal
const CREDENTIAL_HEADERS: &[&str] = &["cookie", "authorization", "x-api-key"];

/// Outcome of a session check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub authenticated: bool,
    pub user_id: Option<u64>,
    pub admin: bool,
}

impl SessionStatus {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(user_id: u64, admin: bool) -> Self {
        Self {
            authenticated: true,
            user_id: Some(user_id),
            admin,
        }
    }

    /// Authenticated and tied to a known user
    pub fn has_user(&self) -> bool {
        self.authenticated && self.user_id.is_some()
    }
}

/// Session validation callback
#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// Validate the session carried by a raw request head
    async fn validate(&self, req: &http::request::Parts) -> Result<SessionStatus>;
}

#[derive(Debug, Deserialize)]
struct PortalUser {
    id: u64,
    #[serde(default)]
    permissions: u64,
}

/// Validates sessions against the portal's current-user endpoint
pub struct PortalSessionValidator {
    verify_url: String,
    admin_permission: u64,
    client: reqwest::Client,
}

impl PortalSessionValidator {
    /// Create from the session configuration block
    pub fn new(config: &SessionConfig) -> Result<Self> {
        if config.verify_url.is_empty() {
            return Err(GatewayError::Config(
                "session.verify_url cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            verify_url: config.verify_url.clone(),
            admin_permission: config.admin_permission,
            client: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()?,
        })
    }

    pub fn verify_url(&self) -> &str {
        &self.verify_url
    }
}

#[async_trait]
impl SessionValidator for PortalSessionValidator {
    async fn validate(&self, req: &http::request::Parts) -> Result<SessionStatus> {
        let mut verify = self.client.get(&self.verify_url);
        let mut has_credentials = false;

        for name in CREDENTIAL_HEADERS {
            for value in req.headers.get_all(*name) {
                verify = verify.header(*name, value.clone());
                has_credentials = true;
            }
        }

        if !has_credentials {
            return Ok(SessionStatus::anonymous());
        }

        let response = match verify.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    verify_url = self.verify_url,
                    "Session verification endpoint unreachable"
                );
                return Ok(SessionStatus::anonymous());
            }
        };

        if !response.status().is_success() {
            tracing::debug!(
                status = response.status().as_u16(),
                "Session verification rejected request"
            );
            return Ok(SessionStatus::anonymous());
        }

        match response.json::<PortalUser>().await {
            Ok(user) => Ok(SessionStatus::user(
                user.id,
                user.permissions & self.admin_permission != 0,
            )),
            Err(e) => {
                tracing::warn!(error = %e, "Session verification returned an unexpected body");
                Ok(SessionStatus::anonymous())
            }
        }
    }
}

/// Session auth middleware — requires a signed-in (optionally admin) user
pub struct SessionAuthMiddleware {
    validator: Arc<dyn SessionValidator>,
    require_admin: bool,
}

impl SessionAuthMiddleware {
    pub fn new(validator: Arc<dyn SessionValidator>, require_admin: bool) -> Self {
        Self {
            validator,
            require_admin,
        }
    }
}

#[async_trait]
impl Middleware for SessionAuthMiddleware {
    async fn handle_request(
        &self,
        req: &mut http::request::Parts,
        ctx: &RequestContext,
    ) -> Result<Option<Response<Vec<u8>>>> {
        let status = self.validator.validate(req).await?;

        if !status.has_user() {
            tracing::debug!(
                service = ctx.service,
                path = req.uri.path(),
                "Unauthenticated proxy request"
            );
            return Ok(Some(json_response(
                401,
                serde_json::json!({ "status": 401, "error": "Unauthorized" }),
            )));
        }

        if self.require_admin && !status.admin {
            tracing::debug!(
                service = ctx.service,
                user_id = status.user_id,
                "Proxy request without admin permission"
            );
            return Ok(Some(json_response(
                403,
                serde_json::json!({ "status": 403, "error": "Forbidden" }),
            )));
        }

        Ok(None)
    }

    fn name(&self) -> &str {
        "session-auth"
    }
}
