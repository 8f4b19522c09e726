//! Signed-token credentials and the section/operation policy gate.
//!
//! Tokens are JSON claims plus a blake3 keyed-hash tag computed with the
//! configured signing key. The scheme is symmetric, so the gate that
//! verifies tokens can also mint them for operator tooling. Permissions
//! are dot-separated tags matched pairwise against `<section>.<operation>`
//! with `*` matching any single tag.

use std::{collections::HashMap, fmt, time::Duration};

use chrono::Utc;
use depot_config::{AuthConfig, ConfigError};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Diagnostic, Debug)]
pub enum AuthError {
    #[error("Token signature is invalid")]
    #[diagnostic(code(depot_engine::auth::signature))]
    BadSignature,

    #[error("Token claims are malformed: {0}")]
    #[diagnostic(code(depot_engine::auth::claims))]
    MalformedClaims(#[from] serde_json::Error),

    #[error("Token for `{principal}` expired at {expired_at}")]
    #[diagnostic(code(depot_engine::auth::expired), help("Request a fresh token"))]
    Expired { principal: String, expired_at: i64 },

    #[error("`{principal}` is not allowed to {operation} in section `{section}`")]
    #[diagnostic(code(depot_engine::auth::denied))]
    Denied {
        principal: String,
        section: String,
        operation: String,
    },
}

/// The claims carried by a token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Principal identity.
    pub sub: String,
    /// Expiry as a unix timestamp.
    pub exp: i64,
}

/// A credential as presented on write operations.
///
/// `claims` is the claims JSON exactly as signed; `tag` is the hex
/// keyed-hash over those bytes. Any re-encoding of the claims would
/// invalidate the tag, so the JSON travels verbatim.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedToken {
    pub claims: String,
    pub tag: String,
}

/// An authenticated, authorized identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal(String);

impl Principal {
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Principal> for String {
    fn from(principal: Principal) -> Self {
        principal.0
    }
}

/// A permission pattern, split into its dot-separated tags.
#[derive(Clone, Debug)]
struct Permission {
    tags: Vec<String>,
}

impl Permission {
    fn parse(pattern: &str) -> Self {
        Self {
            tags: pattern.split('.').map(str::to_string).collect(),
        }
    }

    /// Pairwise tag comparison where `*` matches any tag. Unequal tag
    /// counts only match when one side carries a wildcard.
    fn matches(&self, other: &Permission) -> bool {
        let min = self.tags.len().min(other.tags.len());
        for i in 0..min {
            if self.tags[i] == "*" || other.tags[i] == "*" {
                continue;
            }
            if self.tags[i] != other.tags[i] {
                return false;
            }
        }

        if self.tags.len() != other.tags.len()
            && !self.tags.iter().any(|tag| tag == "*")
            && !other.tags.iter().any(|tag| tag == "*")
        {
            return false;
        }

        true
    }
}

/// Verifies credentials and authorizes (section, operation) requests.
///
/// Stateless between calls: expiry is checked against the wall clock and
/// the policy table is fixed at construction.
pub struct AuthGate {
    key: [u8; 32],
    token_ttl: Duration,
    policy: HashMap<String, Vec<Permission>>,
}

impl AuthGate {
    pub fn new(config: &AuthConfig) -> Result<Self, ConfigError> {
        let key = config.signing_key_bytes()?;
        let policy = config
            .policy
            .iter()
            .map(|rule| {
                let permissions = rule.permissions.iter().map(|p| Permission::parse(p)).collect();
                (rule.principal.clone(), permissions)
            })
            .collect();
        Ok(Self {
            key,
            token_ttl: config.token_ttl(),
            policy,
        })
    }

    fn sign(&self, claims_json: &[u8]) -> blake3::Hash {
        blake3::keyed_hash(&self.key, claims_json)
    }

    /// Mints a token for `principal`, valid for the configured TTL.
    pub fn issue(&self, principal: &str) -> Result<SignedToken, AuthError> {
        let exp = Utc::now().timestamp() + self.token_ttl.as_secs() as i64;
        self.issue_at(principal, exp)
    }

    fn issue_at(&self, principal: &str, exp: i64) -> Result<SignedToken, AuthError> {
        let claims = serde_json::to_string(&Claims {
            sub: principal.to_string(),
            exp,
        })?;
        let tag = self.sign(claims.as_bytes()).to_hex().to_string();
        Ok(SignedToken { claims, tag })
    }

    /// Verifies the token's tag and expiry, returning its claims.
    pub fn verify(&self, token: &SignedToken) -> Result<Claims, AuthError> {
        let provided =
            blake3::Hash::from_hex(&token.tag).map_err(|_| AuthError::BadSignature)?;
        // blake3::Hash equality is constant-time
        if self.sign(token.claims.as_bytes()) != provided {
            return Err(AuthError::BadSignature);
        }

        let claims: Claims = serde_json::from_str(&token.claims)?;
        if claims.exp <= Utc::now().timestamp() {
            return Err(AuthError::Expired {
                principal: claims.sub,
                expired_at: claims.exp,
            });
        }
        Ok(claims)
    }

    /// Authorizes `operation` on `section` for the token's principal.
    ///
    /// Principals absent from the policy table are denied outright.
    pub fn authorize(
        &self,
        token: &SignedToken,
        section: &str,
        operation: &str,
    ) -> Result<Principal, AuthError> {
        let claims = self.verify(token)?;

        let requested = Permission::parse(&format!("{section}.{operation}"));
        let allowed = self
            .policy
            .get(&claims.sub)
            .is_some_and(|permissions| permissions.iter().any(|p| p.matches(&requested)));

        if !allowed {
            return Err(AuthError::Denied {
                principal: claims.sub,
                section: section.to_string(),
                operation: operation.to_string(),
            });
        }

        debug!(principal = %claims.sub, section, operation, "authorized");
        Ok(Principal(claims.sub))
    }
}

#[cfg(test)]
mod tests {
    use depot_config::PolicyRule;

    use super::*;

    fn gate(rules: &[(&str, &[&str])]) -> AuthGate {
        let config = AuthConfig {
            signing_key: "ab".repeat(32),
            token_ttl: None,
            policy: rules
                .iter()
                .map(|(principal, permissions)| PolicyRule {
                    principal: principal.to_string(),
                    permissions: permissions.iter().map(|p| p.to_string()).collect(),
                })
                .collect(),
        };
        AuthGate::new(&config).unwrap()
    }

    fn matches(pattern: &str, request: &str) -> bool {
        Permission::parse(pattern).matches(&Permission::parse(request))
    }

    #[test]
    fn test_permission_matching() {
        assert!(matches("stable.publish", "stable.publish"));
        assert!(!matches("stable.publish", "stable.remove"));
        assert!(!matches("stable.publish", "testing.publish"));

        assert!(matches("stable.*", "stable.remove"));
        assert!(matches("*.publish", "testing.publish"));
        assert!(matches("*", "stable.publish"));

        // unequal tag counts without a wildcard never match
        assert!(!matches("stable", "stable.publish"));
        assert!(!matches("stable.publish.extra", "stable.publish"));
    }

    #[test]
    fn test_issue_authorize_roundtrip() {
        let gate = gate(&[("ci-bot", &["stable.publish", "testing.*"])]);
        let token = gate.issue("ci-bot").unwrap();

        let principal = gate.authorize(&token, "stable", "publish").unwrap();
        assert_eq!(principal.name(), "ci-bot");

        gate.authorize(&token, "testing", "remove").unwrap();
        assert!(matches!(
            gate.authorize(&token, "stable", "remove"),
            Err(AuthError::Denied { .. })
        ));
    }

    #[test]
    fn test_unknown_principal_denied() {
        let gate = gate(&[("ci-bot", &["stable.publish"])]);
        let token = gate.issue("stranger").unwrap();

        assert!(matches!(
            gate.authorize(&token, "stable", "publish"),
            Err(AuthError::Denied { .. })
        ));
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let gate = gate(&[("ci-bot", &["stable.publish"])]);
        let mut token = gate.issue("ci-bot").unwrap();
        token.claims = token.claims.replace("ci-bot", "admin");

        assert!(matches!(
            gate.authorize(&token, "stable", "publish"),
            Err(AuthError::BadSignature)
        ));
    }

    #[test]
    fn test_tampered_tag_rejected() {
        let gate = gate(&[("ci-bot", &["stable.publish"])]);
        let mut token = gate.issue("ci-bot").unwrap();
        token.tag = "00".repeat(32);

        assert!(matches!(
            gate.verify(&token),
            Err(AuthError::BadSignature)
        ));
        assert!(matches!(
            gate.verify(&SignedToken {
                claims: token.claims,
                tag: "not-hex".to_string(),
            }),
            Err(AuthError::BadSignature)
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let gate = gate(&[("ci-bot", &["stable.publish"])]);
        let token = gate
            .issue_at("ci-bot", Utc::now().timestamp() - 10)
            .unwrap();

        assert!(matches!(
            gate.authorize(&token, "stable", "publish"),
            Err(AuthError::Expired { ref principal, .. }) if principal == "ci-bot"
        ));
    }

    #[test]
    fn test_signed_garbage_claims_rejected() {
        let gate = gate(&[("ci-bot", &["stable.publish"])]);
        let claims = "not json".to_string();
        let tag = gate.sign(claims.as_bytes()).to_hex().to_string();

        assert!(matches!(
            gate.verify(&SignedToken { claims, tag }),
            Err(AuthError::MalformedClaims(_))
        ));
    }

    #[test]
    fn test_keys_are_not_interchangeable() {
        let issuer = gate(&[("ci-bot", &["stable.publish"])]);
        let token = issuer.issue("ci-bot").unwrap();

        let config = AuthConfig {
            signing_key: "cd".repeat(32),
            token_ttl: None,
            policy: vec![],
        };
        let other = AuthGate::new(&config).unwrap();
        assert!(matches!(other.verify(&token), Err(AuthError::BadSignature)));
    }
}
