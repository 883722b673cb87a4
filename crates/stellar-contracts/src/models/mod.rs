mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, TierConfig};
pub use selectors::{ImageRoute, ModelSelection, ModelSelector};
