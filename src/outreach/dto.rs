use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct GenerateEmailRequest {
    pub receiver: Value,
    pub goal: String,
}

#[derive(Debug, Serialize)]
pub struct GenerateEmailResponse {
    pub email_text: String,
}

#[derive(Debug, Serialize)]
pub struct RecommendResponse {
    pub contacts: Value,
}
