use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Constant-time string comparison to prevent timing attacks
/// Use this for comparing client ids, access tokens and password digests
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn punctuation() -> &'static Regex {
    static PUNCTUATION: OnceLock<Regex> = OnceLock::new();
    PUNCTUATION.get_or_init(|| {
        Regex::new(r"[.,/#!$%^&*;:{}=\-_`~()]").expect("punctuation pattern is valid")
    })
}

/// Lowercase a phrase and remove punctuation so textual variants collapse.
pub fn strip_phrase(phrase: &str) -> String {
    punctuation()
        .replace_all(&phrase.to_lowercase(), "")
        .into_owned()
}

/// SHA-256 hex digest of arbitrary text.
pub fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// Deterministic fingerprint of a phrase, used as its primary key.
pub fn phrase_identity(phrase: &str) -> String {
    sha256_hex(&strip_phrase(phrase))
}

/// Kinds of credentials issued to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn lifetime(&self) -> Duration {
        match self {
            TokenKind::Access => Duration::minutes(15),
            TokenKind::Refresh => Duration::hours(4),
        }
    }
}

/// A bearer token and the instant it stops being accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expiration: DateTime<Utc>,
}

impl IssuedToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expiration
    }
}

pub fn generate_token(kind: TokenKind) -> IssuedToken {
    IssuedToken {
        token: Uuid::new_v4().to_string(),
        expiration: Utc::now() + kind.lifetime(),
    }
}

/// Salted digest stored as `salt$hex`.
pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("{}${}", salt, sha256_hex(&format!("{}{}", salt, password)))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, digest)) => {
            constant_time_compare(&sha256_hex(&format!("{}{}", salt, password)), digest)
        }
        None => false,
    }
}
