//! Blocklists, whitelist, schedules and toggles: what the parent configured.

pub mod defaults;
pub mod effective;
pub mod model;
pub mod store;
pub mod validate;

pub use effective::{EnforcementPlan, effective_block};
pub use model::{
    BlockingToggles, BlocklistCategory, BlocklistItem, ItemCategory, ItemGroup, PolicyDocument,
    TogglesUpdate,
};
pub use store::PolicyStore;
