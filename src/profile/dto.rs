use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Partial update: absent fields stay untouched.
#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub sender_profile: Option<Value>,
    pub preferences: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub sender_profile: Option<Value>,
    pub preferences: Option<Value>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}
