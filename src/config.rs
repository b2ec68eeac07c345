//! Comm configuration (§6, §9).

use std::time::Duration;

use crate::error::CommError;
use crate::frame::HEADER_SIZE;

/// Default total send window size, split evenly across peers.
pub const DEFAULT_WINDOW_BYTES: usize = 1 << 20;
/// Default transport element size `E`; payloads are padded to a multiple of this.
pub const DEFAULT_ELEMENT_SIZE: usize = 8;
/// Default background flush cadence.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(10);
/// Default idle period before a drained send group's window is unmapped and remapped.
pub const DEFAULT_RECLAIM_AFTER: Duration = Duration::from_secs(10);

/// Tunables for a [`crate::Comm`] (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Total bytes backing one send group, split evenly across peers.
    pub window_bytes: usize,
    /// Transport element size `E`. Payloads are padded up to a multiple of this before
    /// being staged, and element counts (not byte counts) cross the transport boundary.
    pub element_size: usize,
    /// How often the background flusher wakes to drive a flush and a termination round.
    pub flush_interval: Duration,
    /// How long a send group must sit drained and idle before its window is reclaimed.
    pub reclaim_after: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            window_bytes: DEFAULT_WINDOW_BYTES,
            element_size: DEFAULT_ELEMENT_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            reclaim_after: DEFAULT_RECLAIM_AFTER,
        }
    }
}

impl Config {
    /// Bytes available to a single peer's slot, rounded down to a multiple of `element_size`.
    pub fn per_peer_capacity(&self, peers: usize) -> usize {
        (self.window_bytes / peers / self.element_size) * self.element_size
    }

    /// Checks the invariants a [`crate::Comm`] depends on for a group of `peers` peers.
    ///
    /// In particular, the per-peer slot must be able to hold at least one frame header —
    /// otherwise `send` could stage a header across a flush boundary it can never finish,
    /// and stall forever regardless of how often peers drain.
    pub fn validate(&self, peers: usize) -> Result<(), CommError> {
        if peers == 0 {
            return Err(CommError::InvalidArgument(
                "a comm group must have at least one peer".into(),
            ));
        }
        if self.element_size == 0 {
            return Err(CommError::InvalidArgument(
                "element_size must be nonzero".into(),
            ));
        }
        if self.window_bytes < peers * self.element_size {
            return Err(CommError::InvalidArgument(format!(
                "window_bytes ({}) cannot hold even one element per peer out of {peers}",
                self.window_bytes
            )));
        }
        if self.per_peer_capacity(peers) < HEADER_SIZE {
            return Err(CommError::InvalidArgument(format!(
                "per-peer capacity ({}) is smaller than the frame header ({HEADER_SIZE} bytes); \
                 increase window_bytes or decrease the peer count",
                self.per_peer_capacity(peers)
            )));
        }
        Ok(())
    }

    /// Reads `GROUPCOMM_RANK`/`GROUPCOMM_SIZE` (required) and `GROUPCOMM_WINDOW_BYTES`
    /// (optional) from the environment, validating the result against `peers`.
    pub fn from_env() -> Result<(Config, usize, usize), CommError> {
        let rank = env_usize("GROUPCOMM_RANK")?;
        let size = env_usize("GROUPCOMM_SIZE")?;
        let mut config = Config::default();
        if let Ok(raw) = std::env::var("GROUPCOMM_WINDOW_BYTES") {
            config.window_bytes = raw.parse().map_err(|_| {
                CommError::InvalidArgument("GROUPCOMM_WINDOW_BYTES must be an integer".into())
            })?;
        }
        config.validate(size)?;
        Ok((config, rank, size))
    }

    /// Parses `-w/--window`, `-p/--rank`, `-n/--size` out of `args`, mirroring the teacher's
    /// `Configuration::from_args`.
    #[cfg(feature = "getopts")]
    pub fn from_args<I>(args: I) -> Result<(Config, usize, usize), CommError>
    where
        I: Iterator<Item = String>,
    {
        let mut opts = getopts::Options::new();
        opts.optopt("w", "window", "total send window size in bytes", "BYTES");
        opts.optopt("p", "rank", "this peer's rank", "RANK");
        opts.optopt("n", "size", "total number of peers", "SIZE");

        let matches = opts
            .parse(args)
            .map_err(|e| CommError::InvalidArgument(e.to_string()))?;

        let mut config = Config::default();
        if let Some(raw) = matches.opt_str("w") {
            config.window_bytes = raw
                .parse()
                .map_err(|_| CommError::InvalidArgument("-w expects an integer".into()))?;
        }
        let rank = parse_opt(&matches, "p")?.unwrap_or(0);
        let size = parse_opt(&matches, "n")?.unwrap_or(1);

        config.validate(size)?;
        Ok((config, rank, size))
    }
}

#[cfg(feature = "getopts")]
fn parse_opt(matches: &getopts::Matches, name: &str) -> Result<Option<usize>, CommError> {
    matches
        .opt_str(name)
        .map(|raw| {
            raw.parse()
                .map_err(|_| CommError::InvalidArgument(format!("-{name} expects an integer")))
        })
        .transpose()
}

fn env_usize(key: &str) -> Result<usize, CommError> {
    std::env::var(key)
        .map_err(|_| CommError::InvalidArgument(format!("{key} is not set")))?
        .parse()
        .map_err(|_| CommError::InvalidArgument(format!("{key} must be an integer")))
}
