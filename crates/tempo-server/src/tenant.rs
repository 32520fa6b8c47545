//! The multi-tenancy header convention spec.md §6 names: `X-Scope-OrgID`,
//! defaulting to `single-tenant` when unset so a single-tenant deployment
//! never has to send it.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tempo_proto::TenantId;

use crate::error::AppError;

pub const TENANT_HEADER: &str = "X-Scope-OrgID";
pub const DEFAULT_TENANT: &str = "single-tenant";

pub struct TenantHeader(pub TenantId);

impl<S> FromRequestParts<S> for TenantHeader
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_TENANT);
        let tenant =
            TenantId::new(raw).map_err(|e| AppError::BadRequest(format!("bad tenant: {e}")))?;
        Ok(TenantHeader(tenant))
    }
}
