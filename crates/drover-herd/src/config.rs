//! Herd configuration and concurrency-pool sizing.

use serde::Deserialize;

/// Sizing inputs for the herd's bounded concurrency pools.
///
/// The file descriptor limit should be the process's soft rlimit; reading
/// it from the OS is the embedder's bootstrap concern, so it arrives here
/// as plain configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HerdConfig {
    /// Soft limit on open file descriptors for this process.
    pub file_descriptor_limit: u64,
    /// CPU parallelism to size the poll/push/compute pools from. `None`
    /// uses the host's available parallelism.
    pub cpu_slots: Option<usize>,
}

impl Default for HerdConfig {
    fn default() -> Self {
        Self {
            file_descriptor_limit: 1024,
            cpu_slots: None,
        }
    }
}

impl HerdConfig {
    pub(crate) fn cpus(&self) -> usize {
        self.cpu_slots.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1)
        })
    }
}

/// Concurrent outbound connection attempts allowed for a descriptor
/// limit: the limit minus a safety margin of 50, rounded down to a
/// multiple of 100, never less than 1. Bounds connection attempts so the
/// coordinator cannot exhaust descriptors regardless of population size.
pub(crate) fn connection_slots(file_descriptor_limit: u64) -> usize {
    let hundreds = file_descriptor_limit.saturating_sub(50) / 100;
    if hundreds < 1 {
        1
    } else {
        (hundreds * 100) as usize
    }
}
