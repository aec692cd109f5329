use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::GeneratorConfig;

/// Opaque text-generation collaborator: prompt in, text out. Remote, slow,
/// and allowed to fail; callers decide how to surface that.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_email(
        &self,
        sender_profile: &Value,
        receiver: &Value,
        goal: &str,
    ) -> anyhow::Result<String>;

    async fn recommend_contacts(&self, preferences: &Value) -> anyhow::Result<Value>;
}

pub struct HttpGenerator {
    client: reqwest::Client,
    cfg: GeneratorConfig,
}

impl HttpGenerator {
    pub fn new(cfg: GeneratorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            cfg,
        }
    }

    async fn chat(&self, system: &str, user: &str) -> anyhow::Result<String> {
        let body = json!({
            "model": self.cfg.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        let response: Value = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.cfg.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        response["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("malformed completion response"))
    }
}

#[async_trait]
impl TextGenerator for HttpGenerator {
    async fn generate_email(
        &self,
        sender_profile: &Value,
        receiver: &Value,
        goal: &str,
    ) -> anyhow::Result<String> {
        let prompt = json!({
            "sender": sender_profile,
            "receiver": receiver,
            "goal": goal,
        });
        self.chat(
            "You write concise, personalized cold-outreach emails. \
             Reply with the email text only.",
            &prompt.to_string(),
        )
        .await
    }

    async fn recommend_contacts(&self, preferences: &Value) -> anyhow::Result<Value> {
        let content = self
            .chat(
                "You recommend outreach contacts matching the given preferences. \
                 Reply with a JSON array of contact objects only.",
                &preferences.to_string(),
            )
            .await?;
        parse_json_reply(&content)
    }
}

/// Models wrap JSON replies in code fences often enough to be worth stripping.
fn parse_json_reply(content: &str) -> anyhow::Result<Value> {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    Ok(serde_json::from_str(trimmed)?)
}

/// Used when no generator credentials are configured.
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    async fn generate_email(&self, _: &Value, _: &Value, _: &str) -> anyhow::Result<String> {
        anyhow::bail!("text generation is not configured")
    }

    async fn recommend_contacts(&self, _: &Value) -> anyhow::Result<Value> {
        anyhow::bail!("text generation is not configured")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json_reply() {
        let value = parse_json_reply("```json\n[{\"name\": \"A\"}]\n```").unwrap();
        assert_eq!(value[0]["name"], "A");

        let value = parse_json_reply("[1, 2]").unwrap();
        assert_eq!(value[1], 2);

        assert!(parse_json_reply("no json here").is_err());
    }

    #[tokio::test]
    async fn disabled_generator_fails_loudly() {
        let err = DisabledGenerator
            .generate_email(&json!({}), &json!({}), "intro")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
