//! Default ports, addresses and tuning knobs for Gatewire services.
//!
//! Use these constants instead of magic numbers so defaults stay consistent
//! across the library crates, the server binary, and tests.

use std::time::Duration;

/// Default bind address for the SSH session listener.
pub const DEFAULT_SSH_BIND: &str = "0.0.0.0:2222";

/// Default bind address for the public facade listener.
pub const DEFAULT_FACADE_BIND: &str = "0.0.0.0:8080";

/// Reserved destination port on direct-connect channels that routes to the
/// diagnostic sink instead of a network dial.
pub const DEFAULT_DIAGNOSTIC_PORT: u16 = 4300;

/// Interval between liveness probes on an idle session.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Consecutive probe failures tolerated before a session is torn down.
/// The failure that exceeds this threshold forces shutdown.
pub const KEEPALIVE_MAX_FAILURES: u32 = 5;

/// Depth of the per-session inbound connection queue fed by the facade.
pub const INBOUND_QUEUE_DEPTH: usize = 4;

/// Upper bound on a public request's header block during the routing peek.
pub const MAX_HEADER_BLOCK: usize = 16 * 1024;

/// Deadline for a public connection to produce its header block.
pub const HEADER_PEEK_TIMEOUT: Duration = Duration::from_secs(10);

/// Pending request/response correlation entries buffered per connection.
pub const CORRELATION_DEPTH: usize = 4;

/// Entries kept in the per-session recent-activity ring.
pub const ACTIVITY_RING_CAPACITY: usize = 52;

/// Generated access id length.
pub const ACCESS_ID_LEN: usize = 8;

/// Attempts at generating an unused access id before giving up.
pub const ACCESS_ID_MAX_ATTEMPTS: usize = 16;
