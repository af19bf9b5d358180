use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
    Offline,
}

impl TokenType {
    pub const ALL: [TokenType; 3] = [TokenType::Access, TokenType::Refresh, TokenType::Offline];

    pub fn as_str(self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
            TokenType::Offline => "offline",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TokenType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Invalid token type: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Web,
    Mobile,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Web => "web",
            Platform::Mobile => "mobile",
        }
    }
}

/// Durable record of an issued token. The raw token is never stored, only
/// its SHA-256 hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub jti: Uuid,
    pub principal_id: Uuid,
    pub device_id: Option<Uuid>,
    pub token_type: TokenType,
    pub token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    /// Set when a refresh token has been exchanged.
    pub consumed_at: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    pub fn new(
        jti: Uuid,
        principal_id: Uuid,
        device_id: Option<Uuid>,
        token_type: TokenType,
        token: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            jti,
            principal_id,
            device_id,
            token_type,
            token_hash: hash_token(token),
            issued_at,
            expires_at,
            revoked_at: None,
            consumed_at: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    /// Not revoked, not consumed, not expired.
    pub fn is_active(&self) -> bool {
        !self.is_revoked() && !self.is_consumed() && !self.is_expired()
    }
}

/// SHA-256 of the raw token string, hex encoded.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
