use serde::{Deserialize, Serialize};

/// Caller role, resolved by the auth collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    Service,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Service => "service",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            "service" => Ok(Role::Service),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Immutable per-request caller identity.
///
/// Produced by the auth middleware at request entry and passed explicitly
/// through the pipeline. RLS reads tenant and role only through this value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant: String,
    pub role: Role,
    /// Opaque key identifier, kept for audit trails.
    pub key_id: String,
}

impl TenantContext {
    pub fn new(tenant: impl Into<String>, role: Role, key_id: impl Into<String>) -> Self {
        Self { tenant: tenant.into(), role, key_id: key_id.into() }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
