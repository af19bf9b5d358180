use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

/// Trust grows one step at a time and only drops on an explicit reset or a
/// fingerprint mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Untrusted,
    Known,
    Trusted,
}

impl TrustLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            TrustLevel::Untrusted => "untrusted",
            TrustLevel::Known => "known",
            TrustLevel::Trusted => "trusted",
        }
    }

    /// Level after a successful validation that brought the streak to
    /// `streak`. Never lower than `self`.
    pub fn after_success(self, streak: u32, threshold: u32) -> Self {
        match self {
            TrustLevel::Untrusted => TrustLevel::Known,
            TrustLevel::Known if streak >= threshold => TrustLevel::Trusted,
            level => level,
        }
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrustLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "untrusted" => Ok(TrustLevel::Untrusted),
            "known" => Ok(TrustLevel::Known),
            "trusted" => Ok(TrustLevel::Trusted),
            _ => Err(format!("Invalid trust level: {}", s)),
        }
    }
}

/// Descriptive metadata reported by the client. Never used for matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct DeviceInfo {
    #[validate(length(max = 128))]
    pub device_name: Option<String>,
    #[validate(length(max = 64))]
    pub os: Option<String>,
    #[validate(length(max = 32))]
    pub app_version: Option<String>,
}

/// What a mobile client presents at login.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeviceRegistration {
    /// Client-side hardware identifier, stable across reinstalls.
    #[validate(length(min = 1, max = 255))]
    pub hardware_id: String,
    #[validate(length(min = 32, max = 1024))]
    pub fingerprint: String,
    #[serde(default)]
    #[validate(nested)]
    pub info: DeviceInfo,
}

/// A device bound to exactly one principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: Uuid,
    pub principal_id: Uuid,
    pub hardware_id: String,
    #[serde(skip_serializing)]
    pub fingerprint: String,
    pub trust_level: TrustLevel,
    /// Consecutive successful validations since the last reset.
    pub validation_streak: u32,
    pub info: DeviceInfo,
    pub created_utc: DateTime<Utc>,
    pub last_seen_utc: DateTime<Utc>,
}

impl Device {
    pub fn new(principal_id: Uuid, registration: &DeviceRegistration) -> Self {
        let now = Utc::now();
        Self {
            device_id: Uuid::new_v4(),
            principal_id,
            hardware_id: registration.hardware_id.clone(),
            fingerprint: registration.fingerprint.clone(),
            trust_level: TrustLevel::Untrusted,
            validation_streak: 0,
            info: registration.info.clone(),
            created_utc: now,
            last_seen_utc: now,
        }
    }
}
