mod errors;
mod physical_plan;
mod pipeline_executor;
mod runtime_state;
#[cfg(test)]
pub(crate) mod test_util;

pub use errors::*;
pub use physical_plan::*;
pub use pipeline_executor::*;
pub use runtime_state::*;
