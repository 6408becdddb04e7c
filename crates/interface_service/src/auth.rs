//! Bearer token identity adapter
//!
//! Verifies HS256 tokens from the identity provider and reduces them to the
//! `{username, roles, organization_id}` triple the core consumes.

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use core_kernel::{OrganizationId, Role, UserIdentity};

use crate::config::IdentitySettings;

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Username
    pub sub: String,
    pub roles: Vec<String>,
    /// Supplier users only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    pub exp: i64,
    pub iat: i64,
}

/// Auth errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing or malformed Authorization header")]
    MissingToken,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
    #[error("Token carries no recognised role")]
    NoRoles,
    #[error("Supplier token without an organization")]
    MissingOrganization,
}

fn parse_role(name: &str) -> Option<Role> {
    match name {
        "supplier" => Some(Role::Supplier),
        "analyst" => Some(Role::Analyst),
        "compliance_manager" => Some(Role::ComplianceManager),
        "director" => Some(Role::Director),
        "system" => Some(Role::System),
        _ => None,
    }
}

/// Verifies (and for internal callers, issues) bearer tokens
#[derive(Clone)]
pub struct JwtIdentityProvider {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    settings: IdentitySettings,
}

impl std::fmt::Debug for JwtIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtIdentityProvider")
            .field("issuer", &self.settings.issuer)
            .field("audience", &self.settings.audience)
            .finish_non_exhaustive()
    }
}

impl JwtIdentityProvider {
    pub fn new(settings: IdentitySettings) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = settings.leeway_secs;
        if let Some(issuer) = &settings.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &settings.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        Self {
            encoding: EncodingKey::from_secret(settings.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(settings.jwt_secret.as_bytes()),
            validation,
            settings,
        }
    }

    /// Extracts the identity from an `Authorization: Bearer ...` header value
    pub fn authenticate_header(&self, header: Option<&str>) -> Result<UserIdentity, AuthError> {
        let token = header
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or(AuthError::MissingToken)?;
        self.authenticate(token)
    }

    /// Verifies a token and maps its claims to a `UserIdentity`
    pub fn authenticate(&self, token: &str) -> Result<UserIdentity, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| match e.kind() {
            JwtErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => {
                debug!(error = %e, "token rejected");
                AuthError::InvalidToken
            }
        })?;
        identity_from_claims(data.claims)
    }

    /// Issues a token for `identity`; used by tooling and tests
    pub fn issue(&self, identity: &UserIdentity) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: identity.username.clone(),
            roles: identity.roles.iter().map(ToString::to_string).collect(),
            organization_id: identity.organization_id.map(|id| id.value()),
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone(),
            exp: (now + Duration::seconds(self.settings.token_ttl_secs as i64)).timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|_| AuthError::InvalidToken)
    }
}

fn identity_from_claims(claims: Claims) -> Result<UserIdentity, AuthError> {
    let roles: Vec<Role> = claims
        .roles
        .iter()
        .filter_map(|name| {
            let role = parse_role(name);
            if role.is_none() {
                warn!(role = %name, user = %claims.sub, "ignoring unknown role");
            }
            role
        })
        .collect();
    if roles.is_empty() {
        return Err(AuthError::NoRoles);
    }

    let mut identity = UserIdentity::new(claims.sub, roles);
    identity.organization_id = claims.organization_id.map(OrganizationId::new);
    if identity.has_role(Role::Supplier) && identity.organization_id.is_none() {
        return Err(AuthError::MissingOrganization);
    }
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> JwtIdentityProvider {
        JwtIdentityProvider::new(IdentitySettings {
            jwt_secret: "a-test-secret-of-enough-length".into(),
            issuer: Some("lcfs-idp".into()),
            audience: Some("lcfs".into()),
            ..IdentitySettings::default()
        })
    }

    #[test]
    fn test_supplier_round_trip() {
        let provider = provider();
        let supplier = UserIdentity::supplier("sam", OrganizationId::new(7));
        let token = provider.issue(&supplier).unwrap();

        let identity = provider.authenticate_header(Some(&format!("Bearer {token}"))).unwrap();
        assert_eq!(identity, supplier);
    }

    #[test]
    fn test_missing_header() {
        assert!(matches!(provider().authenticate_header(None), Err(AuthError::MissingToken)));
        assert!(matches!(
            provider().authenticate_header(Some("Basic abc")),
            Err(AuthError::MissingToken)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = provider().issue(&UserIdentity::new("ana", [Role::Analyst])).unwrap();
        let other = JwtIdentityProvider::new(IdentitySettings {
            jwt_secret: "a-different-secret-entirely".into(),
            issuer: Some("lcfs-idp".into()),
            audience: Some("lcfs".into()),
            ..IdentitySettings::default()
        });
        assert!(matches!(other.authenticate(&token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_expired_token() {
        let provider = provider();
        let claims = Claims {
            sub: "ana".into(),
            roles: vec!["analyst".into()],
            organization_id: None,
            iss: Some("lcfs-idp".into()),
            aud: Some("lcfs".into()),
            exp: (Utc::now() - Duration::hours(2)).timestamp(),
            iat: (Utc::now() - Duration::hours(3)).timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &provider.encoding).unwrap();
        assert!(matches!(provider.authenticate(&token), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn test_unknown_roles_ignored() {
        let identity = identity_from_claims(Claims {
            sub: "dee".into(),
            roles: vec!["director".into(), "admin".into()],
            organization_id: None,
            iss: None,
            aud: None,
            exp: 0,
            iat: 0,
        })
        .unwrap();
        assert!(identity.has_role(Role::Director));
        assert_eq!(identity.roles.len(), 1);
    }

    #[test]
    fn test_supplier_requires_organization() {
        let result = identity_from_claims(Claims {
            sub: "sam".into(),
            roles: vec!["supplier".into()],
            organization_id: None,
            iss: None,
            aud: None,
            exp: 0,
            iat: 0,
        });
        assert!(matches!(result, Err(AuthError::MissingOrganization)));
    }

    #[test]
    fn test_no_roles_rejected() {
        let result = identity_from_claims(Claims {
            sub: "x".into(),
            roles: vec!["admin".into()],
            organization_id: None,
            iss: None,
            aud: None,
            exp: 0,
            iat: 0,
        });
        assert!(matches!(result, Err(AuthError::NoRoles)));
    }
}
