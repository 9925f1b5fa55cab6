use std::time::Duration;

use crate::cli::ServeArgs;

pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-connection knobs shared by every handler the relay spawns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Lines buffered for a peer before broadcasters have to wait on it.
    pub outbox_capacity: usize,
    /// Upper bound on a single socket write, and on how long a broadcaster
    /// waits for room in a full outbox.
    pub write_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl From<&ServeArgs> for RelayConfig {
    fn from(args: &ServeArgs) -> Self {
        Self {
            outbox_capacity: args.outbox_capacity.max(1),
            write_timeout: Duration::from_millis(args.write_timeout_ms),
        }
    }
}
