use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::models::TenantContext;
use crate::utils::ApiError;

/// Static API-key table mapping opaque credentials to tenant identities.
///
/// Key issuance and storage belong to the auth collaborator outside the
/// core; the gateway only consumes the already-resolved mapping.
#[derive(Clone, Default)]
pub struct AuthState {
    keys: Arc<HashMap<String, TenantContext>>,
}

impl AuthState {
    pub fn new(keys: HashMap<String, TenantContext>) -> Self {
        Self { keys: Arc::new(keys) }
    }

    pub fn resolve(&self, credential: &str) -> Option<TenantContext> {
        self.keys.get(credential).cloned()
    }
}

/// Authentication middleware.
/// 1. Extract the API key (X-API-Key or Authorization: Bearer)
/// 2. Resolve it to a `TenantContext`
/// 3. Insert the context into request extensions for the handlers
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let method = req.method().to_string();
    let uri = req.uri().path().to_string();

    let credential = req
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            req.headers()
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(str::to_string)
        })
        .ok_or_else(|| {
            tracing::warn!("Missing API key for {} {}", method, uri);
            ApiError::auth_required("Missing API key")
        })?;

    let ctx = state.resolve(&credential).ok_or_else(|| {
        tracing::warn!("Unknown API key for {} {}", method, uri);
        ApiError::auth_required("Invalid API key")
    })?;

    tracing::debug!(
        "Authenticated tenant {} ({:?}) on {} {}",
        ctx.tenant,
        ctx.role,
        method,
        uri
    );

    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}
