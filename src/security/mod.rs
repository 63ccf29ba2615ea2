//! Security Module
//!
//! Challenge handler registry and certificate public key pinning.

pub mod challenge;
pub mod pinning;

pub use challenge::{parse_challenges, Challenge, ChallengeAnswer, ChallengeHandler, ChallengeRegistry};
pub use pinning::{pinned_tls_config, PinnedVerifier, PublicKeyPin, PIN_MISMATCH_MARKER};
