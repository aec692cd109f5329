use std::sync::Arc;

use crate::auth::AuthService;
use crate::config::AppConfig;
use crate::generate::{DisabledGenerator, HttpGenerator, TextGenerator};
use crate::mailer::{self, Mailer};

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub config: Arc<AppConfig>,
    pub mailer: Arc<dyn Mailer>,
    pub generator: Arc<dyn TextGenerator>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = crate::db::connect(&config.database_path).await?;
        crate::db::MIGRATOR.run(&db).await?;

        let auth = AuthService::new(db, config.auth.clone());
        let mailer = mailer::build(config.smtp.as_ref())?;
        let generator: Arc<dyn TextGenerator> = match &config.generator {
            Some(cfg) => Arc::new(HttpGenerator::new(cfg.clone())),
            None => Arc::new(DisabledGenerator),
        };

        Ok(Self {
            auth,
            config,
            mailer,
            generator,
        })
    }

    pub fn from_parts(
        auth: AuthService,
        config: Arc<AppConfig>,
        mailer: Arc<dyn Mailer>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            auth,
            config,
            mailer,
            generator,
        }
    }
}
