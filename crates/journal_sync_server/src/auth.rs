//! Authorization support for the sync server.
//!
//! Issuing credentials is the embedding application's job. The server only
//! asks an [`Authorizer`] whether the bearer token presented with a request
//! may access the store.
//!
//! [`TokenDigestAuthorizer`] accepts tokens whose SHA-256 hex digest appears
//! in a configured set, so the server never holds plaintext tokens.

use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Decides whether a caller may use the sync endpoints.
pub trait Authorizer: Send + Sync {
    /// Returns true if the request's bearer token (if any) is acceptable.
    fn is_authorized(&self, bearer_token: Option<&str>) -> bool;
}

/// Authorizer that accepts every caller. Useful for tests and loopback use.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn is_authorized(&self, _bearer_token: Option<&str>) -> bool {
        true
    }
}

/// Computes the lowercase hex SHA-256 digest of a token.
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Accepts bearer tokens by digest.
#[derive(Debug, Clone, Default)]
pub struct TokenDigestAuthorizer {
    digests: HashSet<String>,
}

impl TokenDigestAuthorizer {
    /// Creates an authorizer from hex digests of accepted tokens.
    pub fn new<I, S>(digests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            digests: digests
                .into_iter()
                .map(|d| d.into().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Adds a plaintext token by storing its digest.
    pub fn with_token(mut self, token: &str) -> Self {
        self.digests.insert(token_digest(token));
        self
    }

    /// Number of accepted digests.
    pub fn len(&self) -> usize {
        self.digests.len()
    }

    /// Returns true if no token is accepted.
    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

impl Authorizer for TokenDigestAuthorizer {
    fn is_authorized(&self, bearer_token: Option<&str>) -> bool {
        bearer_token.is_some_and(|token| self.digests.contains(&token_digest(token)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all() {
        assert!(AllowAll.is_authorized(None));
        assert!(AllowAll.is_authorized(Some("anything")));
    }

    #[test]
    fn digest_is_hex_sha256() {
        assert_eq!(
            token_digest("A"),
            "559aead08264d5795d3909718cdd05abd49572e84fe55590eef31a88a08fdffd"
        );
    }

    #[test]
    fn accepts_known_token() {
        let auth = TokenDigestAuthorizer::default().with_token("secret-token");
        assert!(auth.is_authorized(Some("secret-token")));
        assert!(!auth.is_authorized(Some("wrong-token")));
        assert!(!auth.is_authorized(None));
    }

    #[test]
    fn digests_are_case_insensitive() {
        let upper = token_digest("t").to_ascii_uppercase();
        let auth = TokenDigestAuthorizer::new([upper]);
        assert_eq!(auth.len(), 1);
        assert!(auth.is_authorized(Some("t")));
    }

    #[test]
    fn empty_authorizer_rejects_everyone() {
        let auth = TokenDigestAuthorizer::default();
        assert!(auth.is_empty());
        assert!(!auth.is_authorized(Some("")));
    }
}
