//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub mpesa: MpesaConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Daraja (M-Pesa) gateway configuration
#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub business_shortcode: String,
    pub passkey: String,
    pub callback_url: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            mpesa: MpesaConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.mpesa.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl MpesaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(MpesaConfig {
            consumer_key: env::var("MPESA_CONSUMER_KEY")
                .map_err(|_| ConfigError::MissingVariable("MPESA_CONSUMER_KEY".to_string()))?,
            consumer_secret: env::var("MPESA_CONSUMER_SECRET")
                .map_err(|_| ConfigError::MissingVariable("MPESA_CONSUMER_SECRET".to_string()))?,
            business_shortcode: env::var("MPESA_SHORTCODE")
                .map_err(|_| ConfigError::MissingVariable("MPESA_SHORTCODE".to_string()))?,
            passkey: env::var("MPESA_PASSKEY")
                .map_err(|_| ConfigError::MissingVariable("MPESA_PASSKEY".to_string()))?,
            callback_url: env::var("MPESA_CALLBACK_URL")
                .map_err(|_| ConfigError::MissingVariable("MPESA_CALLBACK_URL".to_string()))?,
            base_url: env::var("MPESA_BASE_URL")
                .unwrap_or_else(|_| "https://sandbox.safaricom.co.ke".to_string()),
            timeout_secs: env::var("MPESA_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("MPESA_TIMEOUT_SECS".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.consumer_key.is_empty()
            || self.consumer_secret.is_empty()
            || self.passkey.is_empty()
        {
            return Err(ConfigError::InvalidValue(
                "MPESA_CONSUMER_KEY, MPESA_CONSUMER_SECRET and MPESA_PASSKEY are required"
                    .to_string(),
            ));
        }

        if self.business_shortcode.is_empty() {
            return Err(ConfigError::InvalidValue("MPESA_SHORTCODE".to_string()));
        }

        if !self.callback_url.starts_with("http://") && !self.callback_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "MPESA_CALLBACK_URL must be a valid URL".to_string(),
            ));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "MPESA_BASE_URL must be a valid URL".to_string(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("MPESA_TIMEOUT_SECS".to_string()));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mpesa_config() -> MpesaConfig {
        MpesaConfig {
            consumer_key: "key".to_string(),
            consumer_secret: "secret".to_string(),
            business_shortcode: "174379".to_string(),
            passkey: "passkey".to_string(),
            callback_url: "https://example.com/api/payments/mpesa/callback".to_string(),
            base_url: "https://sandbox.safaricom.co.ke".to_string(),
            timeout_secs: 30,
        }
    }

    #[test]
    fn test_mpesa_config_validation() {
        assert!(mpesa_config().validate().is_ok());

        let mut missing_key = mpesa_config();
        missing_key.consumer_key = String::new();
        assert!(missing_key.validate().is_err());

        let mut bad_callback = mpesa_config();
        bad_callback.callback_url = "not-a-url".to_string();
        assert!(bad_callback.validate().is_err());
    }

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };
        assert!(config.validate().is_ok());

        let zero_port = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        assert!(zero_port.validate().is_err());
    }

    #[test]
    fn test_logging_config_validation() {
        let config = LoggingConfig {
            level: "INFO".to_string(),
            format: LogFormat::Plain,
        };
        assert!(config.validate().is_ok());

        let bad_level = LoggingConfig {
            level: "VERBOSE".to_string(),
            format: LogFormat::Json,
        };
        assert!(bad_level.validate().is_err());
    }
}
