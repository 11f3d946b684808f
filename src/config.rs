//! Runtime configuration
//!
//! Defaults first, environment overrides second (`SPILLWAY_*`), validation
//! last. Builder methods cover the knobs the embedding host is most likely
//! to set in code.

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// How admission treats a channel that is already flagged saturated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaturationPolicy {
    /// Point the consumer at the synthesized fallback feed
    Substitute,
    /// Grant the nominally-full slot so the host can retune the real upstream
    ReuseSlot,
}

impl SaturationPolicy {
    /// Parse a policy name as used in `SPILLWAY_POLICY`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "substitute" => Some(SaturationPolicy::Substitute),
            "reuse-slot" | "reuse_slot" => Some(SaturationPolicy::ReuseSlot),
            _ => None,
        }
    }

    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            SaturationPolicy::Substitute => "substitute",
            SaturationPolicy::ReuseSlot => "reuse-slot",
        }
    }
}

impl Default for SaturationPolicy {
    fn default() -> Self {
        SaturationPolicy::Substitute
    }
}

impl std::fmt::Display for SaturationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration options
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the fallback server binds to
    pub host: IpAddr,

    /// Port the fallback server binds to
    pub port: u16,

    /// Saturation time-to-live; a marked channel stays saturated this long
    pub ttl: Duration,

    /// Failure marks required before a channel counts as saturated
    pub failure_threshold: u64,

    /// Still image looped by the encoder (optional)
    pub image: Option<PathBuf>,

    /// Persisted saturation state file
    pub state_path: PathBuf,

    /// Encoder executable
    pub encoder_program: PathBuf,

    /// Policy for admitting consumers of already-saturated channels
    pub policy: SaturationPolicy,

    /// Maximum concurrent HTTP clients (0 = unlimited)
    pub max_clients: usize,

    /// Time allowed for a client to send its request head
    pub request_timeout: Duration,

    /// Cadence of null-packet output when no encoder output is available
    pub keepalive_interval: Duration,

    /// Grace between SIGTERM and SIGKILL at encoder teardown
    pub kill_grace: Duration,

    /// Consecutive encoder crashes tolerated before degrading to keepalive
    pub restart_budget: u32,

    /// Base delay for encoder restart backoff (doubles per consecutive crash)
    pub restart_backoff: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 1337,
            ttl: Duration::from_secs(30),
            failure_threshold: 1,
            image: None,
            state_path: env::temp_dir().join("spillway").join("saturation.json"),
            encoder_program: PathBuf::from("ffmpeg"),
            policy: SaturationPolicy::Substitute,
            max_clients: 0, // Unlimited
            request_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_millis(500),
            kill_grace: Duration::from_secs(2),
            restart_budget: 5,
            restart_backoff: Duration::from_millis(250),
        }
    }
}

impl Config {
    /// Defaults overridden by `SPILLWAY_*` environment variables, validated
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` resolves, validated.
    /// `from_env` resolves through the process environment; tests pass a map.
    fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(
        &mut self,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = parse_var("SPILLWAY_HOST", lookup)? {
            self.host = host;
        }
        if let Some(port) = parse_var("SPILLWAY_PORT", lookup)? {
            self.port = port;
        }
        if let Some(secs) = parse_var::<u64>("SPILLWAY_TTL_SECS", lookup)? {
            self.ttl = Duration::from_secs(secs);
        }
        if let Some(threshold) = parse_var("SPILLWAY_FAILURE_THRESHOLD", lookup)? {
            self.failure_threshold = threshold;
        }
        if let Some(path) = lookup("SPILLWAY_IMAGE") {
            self.image = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("SPILLWAY_STATE_FILE") {
            self.state_path = PathBuf::from(path);
        }
        if let Some(program) = lookup("SPILLWAY_FFMPEG") {
            self.encoder_program = PathBuf::from(program);
        }
        if let Some(raw) = lookup("SPILLWAY_POLICY") {
            self.policy = SaturationPolicy::parse(&raw).ok_or(ConfigError::InvalidEnv {
                key: "SPILLWAY_POLICY",
                value: raw,
            })?;
        }
        if let Some(max) = parse_var("SPILLWAY_MAX_CLIENTS", lookup)? {
            self.max_clients = max;
        }
        Ok(())
    }

    /// Check the bounds the admission and saturation logic rely on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl.is_zero() {
            return Err(ConfigError::Constraint(
                "saturation TTL must be greater than zero",
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::Constraint(
                "failure threshold must be at least 1",
            ));
        }
        Ok(())
    }

    /// Socket address the fallback server binds to
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// URL the host registers as the fallback stream source
    pub fn stream_url(&self) -> String {
        format!("http://{}:{}/stream.ts", self.host, self.port)
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.host = addr.ip();
        self.port = addr.port();
        self
    }

    /// Set the saturation TTL
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the failure threshold
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the looped still image
    pub fn image(mut self, path: impl Into<PathBuf>) -> Self {
        self.image = Some(path.into());
        self
    }

    /// Set the saturation state file
    pub fn state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = path.into();
        self
    }

    /// Set the encoder executable
    pub fn encoder_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.encoder_program = program.into();
        self
    }

    /// Set the saturation policy
    pub fn policy(mut self, policy: SaturationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the client cap
    pub fn max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }

    /// Set the keepalive packet interval
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Set the encoder kill grace
    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Set the encoder restart budget
    pub fn restart_budget(mut self, budget: u32) -> Self {
        self.restart_budget = budget;
        self
    }

    /// Set the delay before the first encoder restart
    pub fn restart_backoff(mut self, backoff: Duration) -> Self {
        self.restart_backoff = backoff;
        self
    }
}

fn parse_var<T: std::str::FromStr>(
    key: &'static str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => Ok(Some(value)),
            Err(_) => Err(ConfigError::InvalidEnv { key, value: raw }),
        },
        None => Ok(None),
    }
}
