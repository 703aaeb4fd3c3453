mod fragment_context;
mod pipeline;
#[allow(clippy::module_inception)]
mod pipeline_executor;

pub use fragment_context::*;
pub use pipeline::*;
pub use pipeline_executor::*;
