use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::services::CacheStats;

#[derive(Debug, Default, Deserialize, Validate)]
pub struct WarmupRequest {
    /// Defaults to the configured warm-up size.
    #[validate(range(min = 1, max = 1_000_000))]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct WarmupResponse {
    pub loaded: usize,
    pub stats: CacheStats,
}

#[derive(Debug, Serialize)]
pub struct RevokeAllResponse {
    pub principal_id: Uuid,
    pub revoked: usize,
}

#[derive(Debug, Serialize)]
pub struct DeviceRemovedResponse {
    pub device_id: Uuid,
    pub principal_id: Uuid,
}
