use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, Utc};

pub use crate::partition::PartitionScheme;

pub const DEFAULT_CHAIN_CACHE: usize = 64;

/// Wall-clock source for directory entry timestamps.
pub trait TimeSource {
    fn now_utc(&self) -> DateTime<Utc>;
}

#[cfg(feature = "std")]
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

#[cfg(feature = "std")]
impl TimeSource for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl TimeSource for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for FixedClock {
    fn default() -> Self {
        // 1980-01-01, the FAT epoch.
        Self(DateTime::from_timestamp(315_532_800, 0).unwrap_or_default())
    }
}

/// Everything a mount needs that would otherwise be process-wide state.
#[derive(Clone)]
pub struct MountConfig {
    pub schemes: Vec<PartitionScheme>,
    /// FAT stores local time without a zone; this is the zone it is read and written in.
    pub time_zone: FixedOffset,
    pub clock: Arc<dyn TimeSource + Send + Sync>,
    pub chain_cache: usize,
}

impl MountConfig {
    pub fn with_schemes(mut self, schemes: &[PartitionScheme]) -> Self {
        self.schemes = schemes.to_vec();
        self
    }

    pub fn with_time_zone(mut self, time_zone: FixedOffset) -> Self {
        self.time_zone = time_zone;
        self
    }

    pub fn with_clock<C: TimeSource + Send + Sync + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_chain_cache(mut self, entries: usize) -> Self {
        self.chain_cache = entries;
        self
    }

    pub fn local_now(&self) -> NaiveDateTime {
        self.clock.now_utc().with_timezone(&self.time_zone).naive_local()
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        #[cfg(feature = "std")]
        let clock: Arc<dyn TimeSource + Send + Sync> = Arc::new(SystemClock);
        #[cfg(not(feature = "std"))]
        let clock: Arc<dyn TimeSource + Send + Sync> = Arc::new(FixedClock::default());

        Self {
            schemes: vec![PartitionScheme::Superfloppy, PartitionScheme::Gpt, PartitionScheme::Mbr],
            time_zone: Utc.fix(),
            clock,
            chain_cache: DEFAULT_CHAIN_CACHE,
        }
    }
}

impl fmt::Debug for MountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountConfig")
            .field("schemes", &self.schemes)
            .field("time_zone", &self.time_zone)
            .field("chain_cache", &self.chain_cache)
            .finish_non_exhaustive()
    }
}
