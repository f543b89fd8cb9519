use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("both OPSCHED_TLS_CERT and OPSCHED_TLS_KEY must be set, or neither")]
    PartialTls,

    #[error("no private key found in {0}")]
    MissingKey(PathBuf),

    #[error("tls: {0}")]
    Tls(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Process configuration, read once from `OPSCHED_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub seed_file: Option<PathBuf>,
    pub seed_tenant: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "opsched".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            seed_file: None,
            seed_tenant: "default".into(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset variables keep their defaults;
    /// set but unparseable ones are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            port: parsed(&lookup, "OPSCHED_PORT")?.unwrap_or(defaults.port),
            bind: lookup("OPSCHED_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("OPSCHED_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            password: lookup("OPSCHED_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&lookup, "OPSCHED_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "OPSCHED_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "OPSCHED_METRICS_PORT")?,
            tls_cert: lookup("OPSCHED_TLS_CERT").map(PathBuf::from),
            tls_key: lookup("OPSCHED_TLS_KEY").map(PathBuf::from),
            seed_file: lookup("OPSCHED_SEED_FILE").map(PathBuf::from),
            seed_tenant: lookup("OPSCHED_SEED_TENANT").unwrap_or(defaults.seed_tenant),
        };
        if config.tls_cert.is_some() != config.tls_key.is_some() {
            return Err(ConfigError::PartialTls);
        }
        if config.max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "OPSCHED_MAX_CONNECTIONS",
                value: "0".into(),
            });
        }
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn load_tls_acceptor(&self) -> Result<Option<TlsAcceptor>, ConfigError> {
        let (cert_path, key_path) = match (&self.tls_cert, &self.tls_key) {
            (None, None) => return Ok(None),
            (Some(c), Some(k)) => (c, k),
            _ => return Err(ConfigError::PartialTls),
        };

        let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
            .collect::<Result<_, _>>()?;
        let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
            .ok_or_else(|| ConfigError::MissingKey(key_path.clone()))?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| ConfigError::Tls(e.to_string()))?;
        config.alpn_protocols = vec![b"postgresql".to_vec()];

        Ok(Some(TlsAcceptor::from(Arc::new(config))))
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
