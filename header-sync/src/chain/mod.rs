//! Header chain: work arithmetic, the header index, orphan caching and the
//! serialized acceptance entry point.

pub mod block_locator;
pub mod chain_work;
pub mod chainstate;
pub mod index;
pub mod orphan_pool;

pub use block_locator::build_block_locator;
pub use chain_work::{ChainWork, CompactTarget};
pub use chainstate::{AcceptOutcome, ChainstateManager, RejectReason};
pub use index::{HeaderIndex, HeaderRecord, TipChange, Validity};
pub use orphan_pool::{InsertOutcome, OrphanEntry, OrphanHeaderPool, OrphanPoolStats};
