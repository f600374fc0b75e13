use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_DB_FILE: &str = "./tally.count";
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

/// Where and how to reach the upstream node in clustered mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub url: String,
    pub timeout: Duration,
}

impl UpstreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub db_file: PathBuf,
    /// `Some` enables clustered mode.
    pub upstream: Option<UpstreamConfig>,
    /// Identity reported to clients in clustered mode.
    pub instance_name: String,
    /// Upper bound on draining in-flight requests.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.into(),
            db_file: PathBuf::from(DEFAULT_DB_FILE),
            upstream: None,
            instance_name: String::new(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Creates a config from environment variables.
    ///
    /// Reads:
    /// - `TALLY_LISTEN_ADDR`: listener address (default: 0.0.0.0:8080)
    /// - `TALLY_DB_FILE`: snapshot path (default: ./tally.count)
    /// - `TALLY_CLUSTER_ADDR`: upstream URL, enables clustered mode when set
    /// - `TALLY_INSTANCE_NAME`: reported identity (default: host name)
    /// - `TALLY_SHUTDOWN_TIMEOUT_SECS`: drain bound (default: 5)
    /// - `TALLY_UPSTREAM_TIMEOUT_SECS`: upstream request bound (default: 5)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let upstream_timeout = parse_or(
            &lookup,
            "TALLY_UPSTREAM_TIMEOUT_SECS",
            DEFAULT_UPSTREAM_TIMEOUT.as_secs(),
        );
        let shutdown_timeout = parse_or(
            &lookup,
            "TALLY_SHUTDOWN_TIMEOUT_SECS",
            DEFAULT_SHUTDOWN_TIMEOUT.as_secs(),
        );

        Self {
            listen_addr: non_empty("TALLY_LISTEN_ADDR")
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.into()),
            db_file: non_empty("TALLY_DB_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE)),
            upstream: non_empty("TALLY_CLUSTER_ADDR").map(|url| UpstreamConfig {
                url,
                timeout: Duration::from_secs(upstream_timeout),
            }),
            instance_name: non_empty("TALLY_INSTANCE_NAME").unwrap_or_else(local_host_name),
            shutdown_timeout: Duration::from_secs(shutdown_timeout),
        }
    }

    pub fn is_clustered(&self) -> bool {
        self.upstream.is_some()
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "Ignoring unparseable setting");
            default
        }),
    }
}

fn local_host_name() -> String {
    let name = gethostname::gethostname().to_string_lossy().into_owned();
    if name.is_empty() {
        // Not critical, the listen address still identifies the instance.
        tracing::warn!("Could not resolve host name");
    }
    name
}
