pub mod native;

pub use native::{GenerationParams, NativeCompletionModel, NativeModelConfig};
