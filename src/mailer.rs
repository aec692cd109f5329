use std::sync::Arc;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

use crate::config::SmtpConfig;

/// Whether the verification mail actually went out. `NotConfigured` is a
/// deliberate operability fallback: the caller surfaces the link instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailOutcome {
    Sent,
    NotConfigured,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(&self, to: &str, link: &str) -> anyhow::Result<MailOutcome>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)?
            .port(cfg.port)
            .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
            .build();
        Ok(Self {
            transport,
            from: cfg.from.parse()?,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_verification(&self, to: &str, link: &str) -> anyhow::Result<MailOutcome> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse()?)
            .subject("Verify your email")
            .header(ContentType::TEXT_PLAIN)
            .body(format!(
                "Welcome!\n\nPlease verify your email by opening this link:\n\n\
                 {link}\n\nIf you didn't request this, you can ignore this email.\n"
            ))?;
        self.transport.send(message).await?;
        Ok(MailOutcome::Sent)
    }
}

/// Stands in when SMTP is unconfigured; logs the link and reports not-sent so
/// the request layer can hand the link back directly.
pub struct LinkOnlyMailer;

#[async_trait]
impl Mailer for LinkOnlyMailer {
    async fn send_verification(&self, to: &str, link: &str) -> anyhow::Result<MailOutcome> {
        info!(%to, %link, "mail transport unconfigured; surfacing verification link");
        Ok(MailOutcome::NotConfigured)
    }
}

pub fn build(cfg: Option<&SmtpConfig>) -> anyhow::Result<Arc<dyn Mailer>> {
    Ok(match cfg {
        Some(cfg) => Arc::new(SmtpMailer::new(cfg)?),
        None => Arc::new(LinkOnlyMailer),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn link_only_mailer_reports_not_sent() {
        let outcome = LinkOnlyMailer
            .send_verification("t@example.com", "http://localhost/v?token=x")
            .await
            .unwrap();
        assert_eq!(outcome, MailOutcome::NotConfigured);
    }

    #[test]
    fn build_without_config_yields_fallback() {
        assert!(build(None).is_ok());
    }
}
