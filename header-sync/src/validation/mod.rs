//! Header validation: proof-of-work oracle, batch checks and anti-DoS gating.

pub mod anti_dos;
pub mod headers;
pub mod pow;

pub use anti_dos::{AntiDoSGate, WorkCheck};
pub use headers::{HeaderContext, check_contextual, check_continuity, check_headers_pow};
pub use pow::{PowVerifyMode, ProofOfWork, TargetProofOfWork};
