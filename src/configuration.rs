use config::ConfigError;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub jwt: JwtSettings,
    #[serde(default)]
    pub password_reset: PasswordResetSettings,
    #[serde(default)]
    pub email_client: EmailClientSettings,
    #[serde(default)]
    pub lockout: LockoutSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
    /// Per-client limit for the credential endpoints
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }
}

/// JWT authentication settings
#[derive(serde::Deserialize, Clone)]
pub struct JwtSettings {
    pub secret: String,
    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry: i64,   // seconds (e.g., 900 for 15 minutes)
    #[serde(default = "default_refresh_token_expiry")]
    pub refresh_token_expiry: i64,  // seconds (e.g., 604800 for 7 days)
    pub issuer: String,
}

#[derive(serde::Deserialize, Clone)]
pub struct PasswordResetSettings {
    #[serde(default = "default_reset_token_expiry")]
    pub token_expiry: i64,          // seconds (e.g., 1800 for 30 minutes)
    #[serde(default = "default_reset_link_base_url")]
    pub link_base_url: String,
}

impl Default for PasswordResetSettings {
    fn default() -> Self {
        Self {
            token_expiry: default_reset_token_expiry(),
            link_base_url: default_reset_link_base_url(),
        }
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct EmailClientSettings {
    /// When unset, reset emails are written to the log instead of sent
    pub base_url: Option<String>,
    #[serde(default = "default_sender_email")]
    pub sender_email: String,
    #[serde(default = "default_email_timeout")]
    pub timeout_milliseconds: u64,
}

impl Default for EmailClientSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            sender_email: default_sender_email(),
            timeout_milliseconds: default_email_timeout(),
        }
    }
}

/// Failed-login lockout
#[derive(serde::Deserialize, Clone)]
pub struct LockoutSettings {
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: i32,
    #[serde(default = "default_lockout_seconds")]
    pub lockout_seconds: i64,       // seconds (e.g., 900 for 15 minutes)
}

impl Default for LockoutSettings {
    fn default() -> Self {
        Self {
            max_failed_attempts: default_max_failed_attempts(),
            lockout_seconds: default_lockout_seconds(),
        }
    }
}

impl EmailClientSettings {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_milliseconds)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

fn default_requests_per_minute() -> u32 {
    10
}

fn default_access_token_expiry() -> i64 {
    15 * 60
}

fn default_refresh_token_expiry() -> i64 {
    7 * 24 * 60 * 60
}

fn default_reset_token_expiry() -> i64 {
    30 * 60
}

fn default_reset_link_base_url() -> String {
    "https://example.com/reset-password".to_string()
}

fn default_max_failed_attempts() -> i32 {
    5
}

fn default_lockout_seconds() -> i64 {
    15 * 60
}

fn default_sender_email() -> String {
    "no-reply@example.com".to_string()
}

fn default_email_timeout() -> u64 {
    10_000
}

/// Reads `configuration.yaml` (optional) and `APP_*` environment overrides,
/// e.g. `APP_JWT__SECRET`.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    settings.try_deserialize::<Settings>()
}
