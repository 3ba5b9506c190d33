//! Configuration surface (§6, §10.2): listen address/port, TLS material
//! paths, the private-key directory, cipher list, worker count, and the
//! optional PID file / silent-logging flag.
//!
//! Loaded in layers — built-in defaults, then an optional TOML file, then
//! CLI flags — via the `config` crate, mirroring the reference crate's
//! existing `config`/`toml`/`serde` stack. Nothing here is fatal via
//! `unwrap`/`expect`; invalid or incomplete configuration becomes a
//! `ConfigError` that `main` turns into a logged message and exit code 1.

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

/// Worker counts outside this range are a configuration error (§4.6: `1 ≤ W ≤ 32`).
const MAX_WORKERS: u32 = 32;
const MIN_WORKERS: u32 = 1;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required configuration field: {field}")]
    MissingField { field: &'static str },

    #[error("worker count must be between {min} and {max}, got {got}")]
    WorkerCountOutOfRange { got: u32, min: u32, max: u32 },

    #[error("failed to load configuration file {path}: {source}")]
    FileLoad {
        path: String,
        #[source]
        source: ::config::ConfigError,
    },
}

/// Command-line surface. Any flag given here wins over the config file.
#[derive(Parser, Debug)]
#[command(name = "keyless-server")]
#[command(about = "Keyless SSL key server: RSA private-key operations over mutual TLS")]
pub struct CliArgs {
    /// Path to an optional TOML configuration file.
    #[arg(short, long, default_value = "keyless-server.toml")]
    pub config: PathBuf,

    /// Port to listen on.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind the listening socket to.
    #[arg(long)]
    pub bind_address: Option<String>,

    /// Path to the server's TLS certificate (PEM).
    #[arg(long)]
    pub server_cert: Option<PathBuf>,

    /// Path to the server's TLS private key (PEM).
    #[arg(long)]
    pub server_key: Option<PathBuf>,

    /// Path to the CA bundle client certificates must chain to.
    #[arg(long)]
    pub client_ca: Option<PathBuf>,

    /// Directory of `*.key` RSA private keys to load into the registry.
    #[arg(long)]
    pub key_directory: Option<PathBuf>,

    /// Comma-separated TLS cipher suite names.
    #[arg(long, value_delimiter = ',')]
    pub ciphers: Option<Vec<String>>,

    /// Number of worker event loops sharing the listening socket (1..=32).
    #[arg(short = 'w', long)]
    pub workers: Option<u32>,

    /// Optional PID file to write at startup and remove at shutdown.
    #[arg(long)]
    pub pid_file: Option<PathBuf>,

    /// Suppress all logging but errors.
    #[arg(long, default_value_t = false)]
    pub silent: bool,

    /// Log level, unless `--silent` is given. Defaults to `info` if neither
    /// this flag nor the config file's `log_level` is set.
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Intermediate shape for layered deserialization: every field that is
/// required in the final [`ServerConfig`] is `Option` here so a TOML file
/// missing it deserializes cleanly and the gap is caught by [`ServerConfig::validate`]
/// rather than by serde.
#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    bind_address: Option<String>,
    port: Option<u16>,
    server_cert: Option<PathBuf>,
    server_key: Option<PathBuf>,
    client_ca: Option<PathBuf>,
    key_directory: Option<PathBuf>,
    ciphers: Option<Vec<String>>,
    workers: Option<u32>,
    pid_file: Option<PathBuf>,
    silent: Option<bool>,
    log_level: Option<String>,
}

/// Fully-validated server configuration, ready to drive TLS bootstrap, key
/// loading, and worker supervision.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub client_ca: PathBuf,
    pub key_directory: PathBuf,
    pub ciphers: Vec<String>,
    pub workers: u32,
    pub pid_file: Option<PathBuf>,
    pub silent: bool,
    pub log_level: String,
}

impl ServerConfig {
    /// Loads defaults, layers an optional TOML file over them, then layers
    /// `cli` over the result. `cli.config` is read if it exists; a missing
    /// file is not an error (matches the reference crate's `required(false)`
    /// pattern), a malformed one is.
    pub fn load(cli: CliArgs) -> Result<Self, ConfigError> {
        let builder = ::config::Config::builder()
            .set_default("bind_address", "0.0.0.0")
            .expect("static default key/value always builds")
            .set_default("workers", 1i64)
            .expect("static default key/value always builds")
            .set_default("silent", false)
            .expect("static default key/value always builds")
            .set_default("log_level", "info")
            .expect("static default key/value always builds")
            .add_source(::config::File::from(cli.config.clone()).required(false));

        let settings = builder.build().map_err(|source| ConfigError::FileLoad {
            path: cli.config.display().to_string(),
            source,
        })?;

        let raw: RawConfig = settings.try_deserialize().map_err(|source| ConfigError::FileLoad {
            path: cli.config.display().to_string(),
            source,
        })?;

        let bind_address = cli
            .bind_address
            .or(raw.bind_address)
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let port = cli
            .port
            .or(raw.port)
            .ok_or(ConfigError::MissingField { field: "port" })?;
        let server_cert = cli.server_cert.or(raw.server_cert).ok_or(ConfigError::MissingField {
            field: "server_cert",
        })?;
        let server_key = cli.server_key.or(raw.server_key).ok_or(ConfigError::MissingField {
            field: "server_key",
        })?;
        let client_ca = cli.client_ca.or(raw.client_ca).ok_or(ConfigError::MissingField {
            field: "client_ca",
        })?;
        let key_directory = cli
            .key_directory
            .or(raw.key_directory)
            .ok_or(ConfigError::MissingField {
                field: "key_directory",
            })?;
        let ciphers = cli
            .ciphers
            .or(raw.ciphers)
            .ok_or(ConfigError::MissingField { field: "ciphers" })?;
        let workers = cli.workers.or(raw.workers).unwrap_or(1);
        let pid_file = cli.pid_file.or(raw.pid_file);
        let silent = cli.silent || raw.silent.unwrap_or(false);
        let log_level = cli
            .log_level
            .or(raw.log_level)
            .unwrap_or_else(|| "info".to_string());

        let config = ServerConfig {
            bind_address,
            port,
            server_cert,
            server_key,
            client_ca,
            key_directory,
            ciphers,
            workers,
            pid_file,
            silent,
            log_level,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&self.workers) {
            return Err(ConfigError::WorkerCountOutOfRange {
                got: self.workers,
                min: MIN_WORKERS,
                max: MAX_WORKERS,
            });
        }
        if self.ciphers.is_empty() {
            return Err(ConfigError::MissingField { field: "ciphers" });
        }
        Ok(())
    }

    /// The effective `env_logger` filter: `error` when `--silent` is set
    /// regardless of `log_level` (§10.1).
    pub fn effective_log_level(&self) -> &str {
        if self.silent {
            "error"
        } else {
            &self.log_level
        }
    }
}
