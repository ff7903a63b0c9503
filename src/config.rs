use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How chatty the scanner is. Maps onto a tracing level filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintLevel {
    Quiet,
    #[default]
    Normal,
    Verbose,
    Trace,
}

impl PrintLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            PrintLevel::Quiet => "warn",
            PrintLevel::Normal => "info",
            PrintLevel::Verbose => "debug",
            PrintLevel::Trace => "trace",
        }
    }

    /// `0 => Quiet`, `1 => Normal`, `2 => Verbose`, anything higher is `Trace`.
    pub fn from_count(n: u8) -> Self {
        match n {
            0 => PrintLevel::Quiet,
            1 => PrintLevel::Normal,
            2 => PrintLevel::Verbose,
            _ => PrintLevel::Trace,
        }
    }
}

/// Startup parameters of one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Number of concurrent fetch workers.
    pub workers: usize,
    /// IDs scheduled per refill.
    pub batch_size: u64,
    /// Work queue capacity. `None` means four batches.
    pub queue_capacity: Option<usize>,
    /// Base fetch timeout, scaled by each worker's wait multiplier.
    #[serde(with = "millis")]
    pub base_wait: Duration,
    /// How long the range manager sleeps between occupancy checks.
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Exclusive lower bound of the tail scan.
    pub floor: u64,
    /// Tailmax used when no checkpoint has been stored yet.
    pub start: u64,
    /// Checkpoint key.
    pub scan_name: String,
    pub print_level: PrintLevel,
    /// Skip IDs that already have a result instead of enqueueing them.
    pub skip_recorded: bool,
    /// Treat a terminal fetch failure as fatal for the whole pool.
    pub halt_on_fetch_failure: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 50,
            queue_capacity: None,
            base_wait: Duration::from_millis(1500),
            poll_interval: Duration::from_secs(1),
            floor: 0,
            start: 0,
            scan_name: "tail".into(),
            print_level: PrintLevel::Normal,
            skip_recorded: true,
            halt_on_fetch_failure: false,
        }
    }
}

impl ScanConfig {
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or_else(|| usize::try_from(self.batch_size.saturating_mul(4)).unwrap_or(usize::MAX))
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        if (self.queue_capacity() as u64) < self.batch_size {
            return Err(Error::Config(format!(
                "queue_capacity {} is smaller than batch_size {}",
                self.queue_capacity(),
                self.batch_size
            )));
        }
        if self.base_wait.is_zero() || self.poll_interval.is_zero() {
            return Err(Error::Config(
                "base_wait and poll_interval must be non-zero".into(),
            ));
        }
        if self.scan_name.is_empty() {
            return Err(Error::Config("scan_name must not be empty".into()));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
