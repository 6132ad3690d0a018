use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub drafts: DraftConfig,
    pub verification: VerificationConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let session_idle_timeout =
            duration_var("SESSION_IDLE_TIMEOUT_SECS", 1_800, Duration::from_secs)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let drafts = DraftConfig {
            profile_debounce: duration_var(
                "DRAFT_PROFILE_DEBOUNCE_MS",
                3_000,
                Duration::from_millis,
            )?,
            long_form_debounce: duration_var(
                "DRAFT_LONG_FORM_DEBOUNCE_MS",
                30_000,
                Duration::from_millis,
            )?,
            directory: env::var("DRAFT_DIR")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from),
        };

        let code_length = match env::var("VERIFICATION_CODE_LENGTH") {
            Ok(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|length| *length > 0)
                .ok_or(ConfigError::InvalidNumber {
                    variable: "VERIFICATION_CODE_LENGTH",
                })?,
            Err(_) => 6,
        };

        let max_attempts = match env::var("VERIFICATION_MAX_ATTEMPTS") {
            Ok(raw) if !raw.trim().is_empty() => Some(raw.trim().parse::<u32>().map_err(
                |_| ConfigError::InvalidNumber {
                    variable: "VERIFICATION_MAX_ATTEMPTS",
                },
            )?),
            _ => None,
        };

        let demo_codes = env::var("VERIFICATION_DEMO_CODES")
            .unwrap_or_else(|_| "123456,000000".to_string())
            .split(',')
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            environment,
            server: ServerConfig {
                host,
                port,
                session_idle_timeout,
            },
            telemetry: TelemetryConfig { log_level },
            drafts,
            verification: VerificationConfig {
                code_length,
                max_attempts,
                demo_codes,
            },
        })
    }
}

fn duration_var(
    variable: &'static str,
    default: u64,
    unit: fn(u64) -> Duration,
) -> Result<Duration, ConfigError> {
    match env::var(variable) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(unit)
            .map_err(|_| ConfigError::InvalidNumber { variable }),
        Err(_) => Ok(unit(default)),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Wizard sessions untouched for this long are saved and closed.
    pub session_idle_timeout: Duration,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Auto-save quiet windows and the optional on-disk draft location.
#[derive(Debug, Clone)]
pub struct DraftConfig {
    pub profile_debounce: Duration,
    pub long_form_debounce: Duration,
    pub directory: Option<PathBuf>,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            profile_debounce: Duration::from_secs(3),
            long_form_debounce: Duration::from_secs(30),
            directory: None,
        }
    }
}

/// One-time-code settings shared by every verifiable field.
#[derive(Debug, Clone)]
pub struct VerificationConfig {
    pub code_length: usize,
    pub max_attempts: Option<u32>,
    pub demo_codes: Vec<String>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            code_length: 6,
            max_attempts: None,
            demo_codes: vec!["123456".to_string(), "000000".to_string()],
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { variable: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable } => {
                write!(f, "{variable} must be a non-negative integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "SESSION_IDLE_TIMEOUT_SECS",
            "DRAFT_PROFILE_DEBOUNCE_MS",
            "DRAFT_LONG_FORM_DEBOUNCE_MS",
            "DRAFT_DIR",
            "VERIFICATION_CODE_LENGTH",
            "VERIFICATION_MAX_ATTEMPTS",
            "VERIFICATION_DEMO_CODES",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.session_idle_timeout, Duration::from_secs(1_800));
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.drafts.profile_debounce, Duration::from_secs(3));
        assert_eq!(config.drafts.long_form_debounce, Duration::from_secs(30));
        assert!(config.drafts.directory.is_none());
        assert_eq!(config.verification.code_length, 6);
        assert_eq!(config.verification.max_attempts, None);
        assert_eq!(config.verification.demo_codes, vec!["123456", "000000"]);
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        reset_env();
    }

    #[test]
    fn reads_draft_and_verification_overrides() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("DRAFT_PROFILE_DEBOUNCE_MS", "500");
        env::set_var("SESSION_IDLE_TIMEOUT_SECS", "90");
        env::set_var("VERIFICATION_MAX_ATTEMPTS", "5");
        env::set_var("VERIFICATION_DEMO_CODES", " 111111 , ,222222");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.drafts.profile_debounce, Duration::from_millis(500));
        assert_eq!(config.server.session_idle_timeout, Duration::from_secs(90));
        assert_eq!(config.verification.max_attempts, Some(5));
        assert_eq!(config.verification.demo_codes, vec!["111111", "222222"]);
        reset_env();
    }

    #[test]
    fn rejects_non_numeric_debounce() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("DRAFT_LONG_FORM_DEBOUNCE_MS", "soon");
        let err = AppConfig::load().expect_err("invalid number rejected");
        assert!(err.to_string().contains("DRAFT_LONG_FORM_DEBOUNCE_MS"));
        reset_env();
    }
}
