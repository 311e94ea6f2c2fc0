use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// What approval does when some occurrences of a recurring request conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecurrencePolicy {
    /// Insert the free occurrences, skip the rest, and report each skip.
    #[default]
    SkipConflicts,
    /// Reject the whole approval if any occurrence conflicts.
    AllOrNothing,
}

impl FromStr for RecurrencePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" | "skip-conflicts" | "skip_conflicts" => Ok(Self::SkipConflicts),
            "all-or-nothing" | "all_or_nothing" | "strict" => Ok(Self::AllOrNothing),
            other => Err(format!("unknown recurrence policy: {other}")),
        }
    }
}

/// Runtime settings for the booking core. Built once at startup and handed to
/// [`crate::engine::Engine`] and [`crate::store::WalStore`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the WAL file.
    pub data_dir: PathBuf,
    /// Bound on every workflow operation, store lock and WAL commit included.
    pub op_timeout: Duration,
    /// Compact the WAL after this many appended transactions. 0 disables compaction.
    pub compact_threshold: u64,
    /// Bookable facilities. Empty accepts any facility name.
    pub facilities: Vec<String>,
    pub recurrence_policy: RecurrencePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            op_timeout: Duration::from_secs(3),
            compact_threshold: 1000,
            facilities: Vec::new(),
            recurrence_policy: RecurrencePolicy::SkipConflicts,
        }
    }
}

impl Config {
    /// Read `BOOKING_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let data_dir = lookup("BOOKING_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let op_timeout = parse_or(&lookup, "BOOKING_OP_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.op_timeout);
        let compact_threshold =
            parse_or(&lookup, "BOOKING_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold);
        let facilities = lookup("BOOKING_FACILITIES")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let recurrence_policy =
            parse_or(&lookup, "BOOKING_RECURRENCE_POLICY").unwrap_or(defaults.recurrence_policy);

        Self {
            data_dir,
            op_timeout,
            compact_threshold,
            facilities,
            recurrence_policy,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }

    /// Whether `facility` may be booked under this configuration.
    pub fn knows_facility(&self, facility: &str) -> bool {
        self.facilities.is_empty() || self.facilities.iter().any(|f| f == facility)
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring invalid {key}={raw:?}, using default");
            None
        }
    }
}
