use serde::Deserialize;

/// Tuning for a synchronization pass
///
/// ```ron
/// (
///     batch_size: 64,
///     max_workers: 8,
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Number of message ids handed to the downloader per request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Upper bound on concurrent downloads.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

const fn default_batch_size() -> usize {
    64
}

const fn default_max_workers() -> usize {
    8
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_workers: default_max_workers(),
        }
    }
}
