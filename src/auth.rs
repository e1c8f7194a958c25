use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::errors::{VmError, VmResult};

/// Actions guarded by the permission engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    CreateVm,
    ClusterRpc,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::CreateVm => write!(f, "CREATE_VM"),
            Permission::ClusterRpc => write!(f, "CLUSTER_RPC"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
    Viewer,
    /// Identity used by nodes talking to each other.
    Cluster,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,
    pub role: Role,
}

impl Principal {
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            role,
        }
    }

    /// The principal remote nodes act as when the master fans a call out.
    pub fn cluster() -> Self {
        Self::new("cluster", Role::Cluster)
    }
}

pub trait PermissionEngine: Send + Sync {
    /// Fails closed: anything not explicitly granted is denied.
    fn assert_permission(&self, principal: &Principal, permission: Permission) -> VmResult<()>;
}

/// Static role -> permission matrix.
#[derive(Debug, Default, Clone)]
pub struct RolePermissions;

impl RolePermissions {
    pub fn new() -> Self {
        Self
    }

    fn granted(role: Role, permission: Permission) -> bool {
        match (role, permission) {
            (Role::Admin, _) => true,
            (Role::Cluster, _) => true,
            (Role::Operator, Permission::CreateVm) => true,
            _ => false,
        }
    }
}

impl PermissionEngine for RolePermissions {
    fn assert_permission(&self, principal: &Principal, permission: Permission) -> VmResult<()> {
        if Self::granted(principal.role, permission) {
            Ok(())
        } else {
            Err(VmError::PermissionDenied {
                user: principal.username.clone(),
                permission,
            })
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    sub: String,
    role: Role,
    exp: usize,
}

/// Signs an HS256 bearer token for `principal`.
pub fn issue_token(
    secret: &str,
    principal: &Principal,
    ttl: Duration,
) -> jsonwebtoken::errors::Result<String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let claims = Claims {
        sub: principal.username.clone(),
        role: principal.role,
        exp: (now + ttl).as_secs() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Validates signature and expiry; `None` for anything else.
pub fn verify_token(secret: &str, token: &str) -> Option<Principal> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| Principal::new(data.claims.sub, data.claims.role))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_create_but_cannot_speak_rpc() {
        let engine = RolePermissions::new();
        let operator = Principal::new("ops", Role::Operator);

        assert!(engine.assert_permission(&operator, Permission::CreateVm).is_ok());
        assert!(matches!(
            engine.assert_permission(&operator, Permission::ClusterRpc),
            Err(VmError::PermissionDenied { permission: Permission::ClusterRpc, .. })
        ));
    }

    #[test]
    fn viewers_are_denied_creation() {
        let engine = RolePermissions::new();
        let viewer = Principal::new("auditor", Role::Viewer);

        let err = engine
            .assert_permission(&viewer, Permission::CreateVm)
            .unwrap_err();
        assert_eq!(err.to_string(), "Permission denied: user 'auditor' does not have the CREATE_VM permission");
    }

    #[test]
    fn tokens_round_trip_and_reject_foreign_secrets() {
        let principal = Principal::new("alice", Role::Operator);
        let token = issue_token("s3cret", &principal, Duration::from_secs(60)).unwrap();

        assert_eq!(verify_token("s3cret", &token), Some(principal));
        assert_eq!(verify_token("other", &token), None);
        assert_eq!(verify_token("s3cret", "not-a-jwt"), None);
    }

    #[test]
    fn cluster_principal_is_trusted() {
        let engine = RolePermissions::new();
        assert!(engine
            .assert_permission(&Principal::cluster(), Permission::ClusterRpc)
            .is_ok());
    }
}
