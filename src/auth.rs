//! Authentication utilities: identity token handling and role policy

use anyhow::{anyhow, Result};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::types::{Request, Role};

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// User email
    #[serde(default)]
    pub email: String,
    /// User role (admin, collector, user)
    pub role: String,
    /// Issued at (unix timestamp)
    pub iat: usize,
    /// Expiration (unix timestamp)
    pub exp: usize,
}

/// Operations gated by role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ReadDebtors,
    CreateDebtors,
    UpdateDebtors,
    DeleteDebtors,
    Ingest,
    ManageTemplates,
    Distribute,
    ListCollectors,
}

/// Authentication result from extract_auth
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub user_id: String,
    pub email: String,
    pub role: Role,
}

impl AuthInfo {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn allows(&self, permission: Permission) -> bool {
        use Permission::*;

        match self.role {
            Role::Admin => true,
            Role::User => matches!(
                permission,
                ReadDebtors | CreateDebtors | Ingest | ManageTemplates | ListCollectors
            ),
            // Restricted further to their own debtors by `collector_scope`
            Role::Collector => matches!(permission, ReadDebtors | UpdateDebtors),
        }
    }

    /// Collector whose debtors bound every read and update, if any
    pub fn collector_scope(&self) -> Option<&str> {
        match self.role {
            Role::Collector => Some(self.user_id.as_str()),
            _ => None,
        }
    }
}

/// Generate a JWT access token
pub fn generate_token(user_id: &str, email: &str, role: Role, secret: &str) -> Result<String> {
    let now = chrono::Utc::now().timestamp() as usize;
    let exp = now + 8 * 60 * 60; // 8 hours (working day)

    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        role: role.as_str().to_string(),
        iat: now,
        exp,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Validate a JWT token and return claims
pub fn validate_token(token: &str, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| anyhow!("Invalid token: {}", e))?;

    Ok(token_data.claims)
}

/// Extract authentication info from a NATS request.
/// Requests without a valid token are rejected.
pub fn extract_auth<T>(request: &Request<T>, jwt_secret: &str) -> Result<AuthInfo> {
    let token = request
        .token
        .as_deref()
        .ok_or_else(|| anyhow!("No authentication provided, JWT token is required"))?;

    let claims = validate_token(token, jwt_secret)?;
    if claims.sub.trim().is_empty() {
        return Err(anyhow!("Token has an empty subject"));
    }
    let role = Role::parse(&claims.role).ok_or_else(|| anyhow!("Unknown role in token: {}", claims.role))?;

    Ok(AuthInfo {
        user_id: claims.sub,
        email: claims.email,
        role,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    const TEST_SECRET: &str = "test-secret-key-for-jwt-at-least-32-bytes-long";

    fn auth(role: Role) -> AuthInfo {
        AuthInfo {
            user_id: "u-1".to_string(),
            email: "u1@example.com".to_string(),
            role,
        }
    }

    // ---- JWT token tests ----

    #[test]
    fn test_generate_and_validate_token() {
        let token = generate_token("user-42", "test@example.com", Role::User, TEST_SECRET).unwrap();

        let claims = validate_token(&token, TEST_SECRET).unwrap();
        assert_eq!(claims.sub, "user-42");
        assert_eq!(claims.email, "test@example.com");
        assert_eq!(claims.role, "user");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_validate_token_wrong_secret() {
        let token = generate_token("user-42", "test@example.com", Role::Admin, TEST_SECRET).unwrap();

        let result = validate_token(&token, "wrong-secret");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_token_malformed() {
        let result = validate_token("not.a.valid.token", TEST_SECRET);
        assert!(result.is_err());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: "user-42".to_string(),
            email: String::new(),
            role: "admin".to_string(),
            iat: now - 20_000,
            exp: now - 10_000,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(TEST_SECRET.as_bytes())).unwrap();
        assert!(validate_token(&token, TEST_SECRET).is_err());
    }

    // ---- extract_auth tests ----

    fn make_request_with_token<T: Default>(token: Option<String>) -> Request<T> {
        Request {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            token,
            payload: T::default(),
        }
    }

    #[test]
    fn test_extract_auth_with_valid_token() {
        let token = generate_token("col-7", "col7@example.com", Role::Collector, TEST_SECRET).unwrap();

        let request = make_request_with_token::<serde_json::Value>(Some(token));
        let auth = extract_auth(&request, TEST_SECRET).unwrap();

        assert_eq!(auth.user_id, "col-7");
        assert_eq!(auth.email, "col7@example.com");
        assert_eq!(auth.role, Role::Collector);
    }

    #[test]
    fn test_extract_auth_unknown_role_fails() {
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: "u".to_string(),
            email: String::new(),
            role: "worker".to_string(),
            iat: now,
            exp: now + 60,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(TEST_SECRET.as_bytes())).unwrap();

        let request = make_request_with_token::<serde_json::Value>(Some(token));
        assert!(extract_auth(&request, TEST_SECRET).is_err());
    }

    #[test]
    fn test_extract_auth_no_token_fails() {
        let request = make_request_with_token::<serde_json::Value>(None);
        let result = extract_auth(&request, TEST_SECRET);
        assert!(result.is_err());
    }

    #[test]
    fn test_extract_auth_invalid_token_fails() {
        let request = make_request_with_token::<serde_json::Value>(Some("bad-token".to_string()));
        let result = extract_auth(&request, TEST_SECRET);
        assert!(result.is_err());
    }

    // ---- role policy tests ----

    #[test]
    fn test_admin_allows_everything() {
        let admin = auth(Role::Admin);
        assert!(admin.allows(Permission::Distribute));
        assert!(admin.allows(Permission::DeleteDebtors));
        assert!(admin.collector_scope().is_none());
    }

    #[test]
    fn test_user_cannot_distribute_or_delete() {
        let user = auth(Role::User);
        assert!(user.allows(Permission::Ingest));
        assert!(user.allows(Permission::ManageTemplates));
        assert!(user.allows(Permission::ReadDebtors));
        assert!(!user.allows(Permission::UpdateDebtors));
        assert!(!user.allows(Permission::Distribute));
        assert!(!user.allows(Permission::DeleteDebtors));
    }

    #[test]
    fn test_collector_is_scoped_to_own_debtors() {
        let collector = auth(Role::Collector);
        assert!(collector.allows(Permission::ReadDebtors));
        assert!(collector.allows(Permission::UpdateDebtors));
        assert!(!collector.allows(Permission::Ingest));
        assert!(!collector.allows(Permission::CreateDebtors));
        assert_eq!(collector.collector_scope(), Some("u-1"));
    }
}
