//! Protocol constants for header exchange and peer discipline.

use std::time::Duration;

/// Protocol version advertised in GETHEADERS
pub const PROTOCOL_VERSION: u32 = 1;

// Message limits
pub const MAX_HEADERS_RESULTS: usize = 2000;
pub const MAX_LOCATOR_SZ: usize = 101;

/// Misbehavior score at which a peer is discouraged
pub const DISCOURAGEMENT_THRESHOLD: u32 = 100;

/// Unconnecting HEADERS messages tolerated before penalizing
pub const MAX_UNCONNECTING_HEADERS: u32 = 10;

/// How long a discouraged address stays discouraged
pub const DISCOURAGEMENT_DURATION: Duration = Duration::from_secs(24 * 60 * 60); // 24 hours

/// Maximum number of discouraged addresses remembered
pub const MAX_DISCOURAGED: usize = 10_000;

/// Misbehavior scores for header sync violations
pub mod misbehavior_scores {
    /// Header hash does not meet its target
    pub const INVALID_POW: u32 = 100;

    /// Header failed contextual validation
    pub const INVALID_HEADER: u32 = 100;

    /// Message exceeded a protocol limit
    pub const OVERSIZED_MESSAGE: u32 = 20;

    /// Batch does not form a chain
    pub const NON_CONTINUOUS_HEADERS: u32 = 20;

    /// Batch carries too little work
    pub const LOW_WORK_HEADERS: u32 = 10;

    /// Too many batches that do not connect to anything we know
    pub const TOO_MANY_UNCONNECTING: u32 = 100;

    /// Orphan quota exhausted
    pub const TOO_MANY_ORPHANS: u32 = 100;
}
