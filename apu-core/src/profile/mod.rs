//! Profiles: structural validation, persistence seam and the manager

mod manager;
pub mod store;
pub mod validation;

pub use manager::{ActivationGuard, ProfileManager};
pub use store::{JsonDirStore, MemoryStore, ProfileStore};
