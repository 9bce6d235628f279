use anyhow::{Context, Result};
use postgres_native_tls::MakeTlsConnector;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Connection settings for one named database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub ssl_mode: SslMode,
    /// Accept invalid/self-signed certificates. Use with caution.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Optional path to a custom CA certificate file (PEM format).
    #[serde(default)]
    pub ca_cert_path: Option<String>,
    /// Maximum pooled connections. `None` opens a dedicated connection
    /// per operation instead of pooling.
    #[serde(default)]
    pub pool_size: Option<usize>,
}

/// SSL/TLS connection modes, matching the standard PostgreSQL `sslmode`
/// parameter:
/// - `Disable`: no SSL (unencrypted)
/// - `Prefer`: try SSL first, fall back to non-SSL (default)
/// - `Require`: require SSL but don't verify the certificate chain unless
///   a custom CA is configured
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
}

impl ConnectionConfig {
    /// Build a libpq keyword/value connection string.
    pub fn connection_string(&self) -> String {
        let sslmode = match self.ssl_mode {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
        };
        format!(
            "host={} port={} dbname={} user={} password={} sslmode={} connect_timeout=10",
            quote_conn_value(&self.host),
            self.port,
            quote_conn_value(&self.database),
            quote_conn_value(&self.username),
            quote_conn_value(&self.password),
            sslmode
        )
    }

    pub fn display_string(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }

    /// Build the TLS connector matching this configuration.
    pub fn tls_connector(&self) -> Result<MakeTlsConnector> {
        let mut builder = native_tls::TlsConnector::builder();

        if self.accept_invalid_certs {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        } else if let Some(ca_path) = &self.ca_cert_path {
            let pem = std::fs::read(ca_path)
                .with_context(|| format!("Failed to read CA certificate file: {ca_path}"))?;
            let cert = native_tls::Certificate::from_pem(&pem)
                .context("Failed to parse CA certificate")?;
            builder.add_root_certificate(cert);
        }

        let connector = builder.build().context("Failed to build TLS connector")?;
        Ok(MakeTlsConnector::new(connector))
    }

    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pglayer")
            .join("databases.toml")
    }

    /// Load the named-connection catalog from a TOML file.
    pub fn load_all(path: &std::path::Path) -> Result<Vec<ConnectionConfig>> {
        if !path.exists() {
            return Ok(vec![]);
        }
        let content = std::fs::read_to_string(path)?;
        let saved: SavedConnections = toml::from_str(&content)?;
        Ok(saved.connections)
    }

    pub fn save_all(path: &std::path::Path, connections: &[ConnectionConfig]) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let saved = SavedConnections {
            connections: connections.to_vec(),
        };
        let content = toml::to_string_pretty(&saved)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: String::from("default"),
            host: String::from("localhost"),
            port: 5432,
            database: String::from("postgres"),
            username: String::from("postgres"),
            password: String::new(),
            ssl_mode: SslMode::default(),
            accept_invalid_certs: false,
            ca_cert_path: None,
            pool_size: Some(4),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedConnections {
    connections: Vec<ConnectionConfig>,
}

/// Quote a value for use in a libpq key=value connection string.
/// Wraps in single quotes and escapes backslashes and single quotes.
fn quote_conn_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}
