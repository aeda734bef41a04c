use std::sync::Arc;

use axum::Router;
use knowbot_agent::{
    AnswerRelay, FinderError, HttpCandidateFinder, KnowbotService, QuestionRouter, RouterSettings,
};
use knowbot_core::config::{AppConfig, ConfigError, LoadOptions, SlackPlatform};
use knowbot_core::register::AnswerRegister;
use knowbot_db::{connect_with_settings, migrations, DbPool, SqlArchiveRepository};
use knowbot_slack::conversation::ConversationHub;
use knowbot_slack::events::{build_dispatcher, EventDispatcher};
use knowbot_slack::gateway::{GatewayError, MessagingGateway, SlackWebApiGateway};
use knowbot_slack::socket::{ReconnectPolicy, SlackSocketTransport, SocketModeRunner};
use thiserror::Error;
use tracing::info;

use crate::health::{self, HealthState};
use crate::ingress::{self, IngressState};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub register: Arc<AnswerRegister>,
    pub hub: Arc<ConversationHub>,
    pub gateway: Arc<dyn MessagingGateway>,
    pub dispatcher: Arc<EventDispatcher>,
    /// Present when the bot runs as a custom integration over socket mode.
    pub socket_runner: Option<SocketModeRunner>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("slack client setup failed: {0}")]
    Slack(#[from] GatewayError),
    #[error("candidate finder setup failed: {0}")]
    Finder(#[from] FinderError),
    #[error("missing required setting `{0}`")]
    MissingSetting(&'static str),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        platform = ?config.slack.platform,
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let gateway: Arc<dyn MessagingGateway> = Arc::new(SlackWebApiGateway::new(
        config.slack.api_base_url.clone(),
        config.slack.bot_token.clone(),
    )?);
    let hub = ConversationHub::new();
    let register = Arc::new(AnswerRegister::new(config.register.settings()));
    let archive = Arc::new(SqlArchiveRepository::new(db_pool.clone()));
    let finder = Arc::new(HttpCandidateFinder::from_config(&config.finder, &config.routing)?);

    let relay = Arc::new(AnswerRelay::new(
        gateway.clone(),
        hub.clone(),
        register.clone(),
        archive,
        config.routing.decision_timeout(),
    ));
    let router = Arc::new(QuestionRouter::new(
        gateway.clone(),
        hub.clone(),
        finder,
        relay,
        RouterSettings::from_config(&config.routing),
    ));
    let service = KnowbotService::new(router);
    let dispatcher = Arc::new(build_dispatcher(hub.clone(), service.clone(), service));

    let socket_runner = match config.slack.platform {
        SlackPlatform::App => None,
        SlackPlatform::CustomIntegration => {
            let app_token = config
                .slack
                .app_token
                .clone()
                .ok_or(BootstrapError::MissingSetting("slack.app_token"))?;
            let transport =
                Arc::new(SlackSocketTransport::new(config.slack.api_base_url.clone(), app_token));
            Some(SocketModeRunner::new(
                transport,
                dispatcher.clone(),
                gateway.clone(),
                ReconnectPolicy::default(),
            ))
        }
    };

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        handlers = dispatcher.handler_count(),
        socket_mode = socket_runner.is_some(),
        "application wired"
    );

    Ok(Application { config, db_pool, register, hub, gateway, dispatcher, socket_runner })
}

impl Application {
    /// Health endpoint plus, for Slack apps, the Events API ingress.
    pub fn http_router(&self) -> Result<Router, BootstrapError> {
        let health = health::router(HealthState::new(self.db_pool.clone(), self.register.clone()));
        match self.config.slack.platform {
            SlackPlatform::CustomIntegration => Ok(health),
            SlackPlatform::App => {
                let signing_secret = self
                    .config
                    .slack
                    .signing_secret
                    .clone()
                    .ok_or(BootstrapError::MissingSetting("slack.signing_secret"))?;
                let ingress = ingress::router(IngressState::new(
                    self.dispatcher.clone(),
                    self.gateway.clone(),
                    signing_secret,
                ));
                Ok(health.merge(ingress))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use knowbot_core::config::{ConfigOverrides, LoadOptions, SlackPlatform};

    use crate::bootstrap::bootstrap;

    fn overrides(platform: SlackPlatform) -> ConfigOverrides {
        ConfigOverrides {
            database_url: Some("sqlite::memory:?cache=shared".to_string()),
            slack_platform: Some(platform),
            slack_bot_token: Some("xoxb-test".to_string()),
            slack_app_token: Some("xapp-test".to_string()),
            ..ConfigOverrides::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_required_slack_tokens() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                slack_app_token: Some("invalid-token".to_string()),
                ..overrides(SlackPlatform::CustomIntegration)
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("slack.app_token"));
    }

    #[tokio::test]
    async fn custom_integration_wires_socket_mode_and_archive_table() {
        let app = bootstrap(LoadOptions {
            overrides: overrides(SlackPlatform::CustomIntegration),
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'qa_archive'",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("archive table should exist after bootstrap");
        assert_eq!(table_count, 1);

        assert!(app.socket_runner.is_some());
        assert_eq!(app.dispatcher.handler_count(), 3);
        assert!(app.register.is_empty().await);
        assert!(app.http_router().is_ok());
    }
}
