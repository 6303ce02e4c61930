//! Custom error types for the application.
//!
//! This module defines the primary error type, `BridgeError`, for the whole bridge.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of errors that can occur, from configuration problems at
//! startup to serial and HTTP failures while monitoring.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically TOML parse or type errors.
//! - **`Configuration`**: Semantic errors in an otherwise well-formed configuration.
//! - **`MissingCredentials`**: The data store URL or API key is absent.
//! - **`Serial*` / `NoSerialDevice`**: Opening, enumerating or reading the sensor port.
//! - **`HttpStatus` / `HttpTransport` / `Decode`**: Failures talking to the data store.
//!
//! Startup and serial errors end the process. HTTP and decode errors are logged by the
//! monitor and the loop moves on to the next line.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Missing data store credentials: {0} is not set (set SUPABASE_URL and SUPABASE_API_KEY in the environment or .env)")]
    MissingCredentials(&'static str),

    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("Serial I/O error: {0}")]
    SerialIo(#[from] std::io::Error),

    #[error("Serial port disconnected")]
    SerialDisconnected,

    #[error("No sensor serial device detected")]
    NoSerialDevice,

    #[error("{resource}: HTTP {status}: {body}")]
    HttpStatus {
        resource: String,
        status: u16,
        body: String,
    },

    #[error("{resource}: transport error: {message}")]
    HttpTransport { resource: String, message: String },

    #[error("{resource}: could not decode response: {message}")]
    Decode { resource: String, message: String },
}

impl From<figment::Error> for BridgeError {
    fn from(value: figment::Error) -> Self {
        BridgeError::Config(Box::new(value))
    }
}

impl BridgeError {
    /// Maps a `ureq` failure against `resource` onto the application error.
    pub(crate) fn from_ureq(resource: &str, err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, response) => BridgeError::HttpStatus {
                resource: resource.to_string(),
                status,
                body: response.into_string().unwrap_or_default(),
            },
            ureq::Error::Transport(transport) => BridgeError::HttpTransport {
                resource: resource.to_string(),
                message: transport.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_names_resource_and_body() {
        let err = BridgeError::HttpStatus {
            resource: "sensor_counts".into(),
            status: 401,
            body: "{\"message\":\"Invalid API key\"}".into(),
        };
        assert_eq!(
            err.to_string(),
            "sensor_counts: HTTP 401: {\"message\":\"Invalid API key\"}"
        );
    }

    #[test]
    fn serial_and_config_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged");
        assert!(matches!(BridgeError::from(io), BridgeError::SerialIo(_)));

        let figment_err = figment::Error::from("bad value".to_string());
        let err = BridgeError::from(figment_err);
        assert!(matches!(err, BridgeError::Config(_)));
        assert!(err.to_string().starts_with("Configuration error:"));
    }

    #[test]
    fn missing_credentials_names_the_variable() {
        let msg = BridgeError::MissingCredentials("SUPABASE_API_KEY").to_string();
        assert!(msg.contains("SUPABASE_API_KEY"));
    }
}
