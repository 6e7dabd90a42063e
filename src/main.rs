use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;

use credkeeper::audit::PgAuditSink;
use credkeeper::auth::{AccessTokenMinter, AuthDependencies, AuthService, BcryptHasher, TokenPolicy};
use credkeeper::configuration::get_configuration;
use credkeeper::email_client::{EmailClient, EmailSender, LogEmailSender, SenderEmail};
use credkeeper::security::RateLimitConfig;
use credkeeper::startup::run;
use credkeeper::store::PgCredentialStore;
use credkeeper::telemetry::init_telemetry;

fn startup_error(kind: std::io::ErrorKind, message: &str) -> std::io::Error {
    std::io::Error::new(kind, message.to_string())
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = get_configuration().map_err(|e| {
        tracing::error!("Failed to read configuration: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, "Configuration error")
    })?;
    tracing::info!("Configuration loaded successfully");

    // A bad signing secret or token lifetime stops the process here
    let minter = AccessTokenMinter::new(&configuration.jwt).map_err(|e| {
        tracing::error!("Invalid JWT configuration: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, "JWT configuration error")
    })?;
    let policy = TokenPolicy::from_settings(&configuration).map_err(|e| {
        tracing::error!("Invalid token configuration: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, "Token configuration error")
    })?;

    tracing::info!("Attempting to connect to database");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&configuration.database.connection_string())
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            startup_error(std::io::ErrorKind::ConnectionRefused, "Database connection error")
        })?;
    tracing::info!("Database connection pool created successfully");

    let store = PgCredentialStore::new(pool.clone());
    store.migrate().await.map_err(|e| {
        tracing::error!("Failed to run migrations: {}", e);
        startup_error(std::io::ErrorKind::Other, "Database migration error")
    })?;

    let email: Arc<dyn EmailSender> = match &configuration.email_client.base_url {
        Some(base_url) => {
            let sender = SenderEmail::parse(configuration.email_client.sender_email.clone())
                .map_err(|e| {
                    tracing::error!("Invalid sender email: {}", e);
                    startup_error(std::io::ErrorKind::InvalidInput, "Email configuration error")
                })?;
            tracing::info!(base_url = %base_url, "Reset emails will be delivered over HTTP");
            Arc::new(EmailClient::new(
                base_url.clone(),
                sender,
                configuration.email_client.timeout(),
            ))
        }
        None => {
            tracing::warn!("No email service configured, reset emails will only be logged");
            Arc::new(LogEmailSender)
        }
    };

    let service = AuthService::new(
        AuthDependencies {
            store: Arc::new(store),
            hasher: Arc::new(BcryptHasher::new(configuration.application.bcrypt_cost)),
            minter: Arc::new(minter),
            audit: Arc::new(PgAuditSink::new(pool)),
            email,
        },
        policy,
    )
    .map_err(|e| {
        tracing::error!("Failed to build auth service: {}", e);
        startup_error(std::io::ErrorKind::Other, "Service initialisation error")
    })?;

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    let rate_limit = RateLimitConfig {
        requests_per_minute: configuration.application.requests_per_minute,
        ..RateLimitConfig::default()
    };

    run(listener, Arc::new(service), rate_limit)?.await
}
