// Worker constants (no magic values)
use std::time::Duration;

/// Sleep between empty polls in polling consumer loops (100ms)
pub const IDLE_SLEEP_DURATION: Duration = Duration::from_millis(100);

/// Sleep after a backend error before polling again (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// How long shutdown waits for in-flight deliveries (30s)
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default base delay between delivery attempts (1000ms = 1s)
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;

/// Default attempt budget: deliver once, no redelivery
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;

/// Claimed-but-unsettled messages become visible again after this window (5 minutes)
pub const DEFAULT_VISIBILITY_TIMEOUT_MS: i64 = 5 * 60 * 1000;
