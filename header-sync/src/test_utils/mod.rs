//! Test helpers for the header sync core.
//!
//! Compiled for unit tests and behind the `test-utils` feature for
//! integration tests and downstream crates.

mod chain;
mod network;
mod pow;

pub use chain::{ChainBuilder, test_header};
pub use network::MockNetwork;
pub use pow::MockPow;

pub use crate::time::MockClock;
