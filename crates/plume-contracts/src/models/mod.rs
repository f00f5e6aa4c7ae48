mod registry;
mod selectors;

pub use registry::{
    ModelRegistry, ModelSpec, CAPABILITY_NSFW, CAPABILITY_TEXT, CAPABILITY_VISION,
};
pub use selectors::{ModelRole, ModelSelection, ModelSelector, SelectionError};
