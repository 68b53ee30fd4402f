//! Social features module
//!
//! Provides user profiles, badges and challenge progress.

pub mod badges;
pub mod challenges;
pub mod profile;
pub mod types;

pub use challenges::{ChallengeEngine, ChallengeError, IncrementOutcome, TriggerReport};
pub use profile::{Identity, ProfileError, ProfileManager, ProvisionOutcome};
pub use types::*;
