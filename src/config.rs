use std::path::PathBuf;

use serde::Deserialize;

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// Signup/login gating policy, injected into the auth service at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthPolicy {
    pub invite_only: bool,
    pub invite_required_for_login: bool,
    pub invite_codes: Vec<String>,
    pub email_verify_ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub public_base_url: String,
    pub jwt: JwtConfig,
    pub auth: AuthPolicy,
    /// None when SMTP is not configured; the mailer then falls back to
    /// returning the verification link to the caller.
    pub smtp: Option<SmtpConfig>,
    pub generator: Option<GeneratorConfig>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_path = std::env::var("DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/app.db"));
        let public_base_url =
            std::env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".into());

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "coldreach".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "coldreach-users".into()),
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60),
            refresh_ttl_minutes: std::env::var("JWT_REFRESH_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24 * 14),
        };

        let invite_only = env_bool("INVITE_ONLY").unwrap_or(true);
        // The stricter login gate defaults to the signup gate when unset.
        let invite_required_for_login =
            env_bool("INVITE_REQUIRED_FOR_LOGIN").unwrap_or(invite_only);
        let codes_raw = std::env::var("INVITE_CODES")
            .or_else(|_| std::env::var("INVITE_CODE"))
            .unwrap_or_default();
        let invite_codes = parse_invite_codes(&codes_raw);
        let auth = AuthPolicy {
            invite_only,
            invite_required_for_login,
            invite_codes,
            email_verify_ttl_hours: std::env::var("EMAIL_VERIFY_TTL_HOURS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(24),
        };

        let smtp = match std::env::var("SMTP_HOST") {
            Ok(host) if !host.trim().is_empty() => {
                let username = std::env::var("SMTP_USERNAME").unwrap_or_default();
                Some(SmtpConfig {
                    host: host.trim().to_string(),
                    port: std::env::var("SMTP_PORT")
                        .ok()
                        .and_then(|v| v.parse::<u16>().ok())
                        .unwrap_or(587),
                    from: std::env::var("SMTP_FROM")
                        .ok()
                        .filter(|v| !v.trim().is_empty())
                        .unwrap_or_else(|| username.clone()),
                    username,
                    password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
                })
            }
            _ => None,
        };

        let generator = match std::env::var("GENERATOR_API_KEY") {
            Ok(api_key) if !api_key.is_empty() => Some(GeneratorConfig {
                base_url: std::env::var("GENERATOR_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
                api_key,
                model: std::env::var("GENERATOR_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            }),
            _ => None,
        };

        Ok(Self {
            database_path,
            public_base_url,
            jwt,
            auth,
            smtp,
            generator,
        })
    }
}

fn parse_invite_codes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_codes_split_and_trim() {
        assert_eq!(
            parse_invite_codes("INV123, BETA42 ,,  "),
            vec!["INV123".to_string(), "BETA42".to_string()]
        );
        assert!(parse_invite_codes("").is_empty());
    }
}
