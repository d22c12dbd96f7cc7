//! Tunables bundling the lower layers' own configuration into one facade-level knob set
//! (spec §4.J, §4.C "checkpoint interval", §4.D "flush thresholds").

use wal::WalConfig;

/// Configuration for a [`crate::Database`], applied uniformly to every namespace it opens a
/// [`crate::Collection`] for.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Write a fresh `table_log` checkpoint every this-many committed versions (spec §4.C
    /// "S2: periodic checkpointing").
    pub checkpoint_interval: u64,
    /// WAL buffering and backpressure configuration, shared by every namespace's buffer.
    pub wal: WalConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 10,
            wal: WalConfig::default(),
        }
    }
}
