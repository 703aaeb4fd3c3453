pub mod execution;
pub mod util;

pub use self::execution::{
    FragmentContext, OperatorInstance, OperatorKind, OperatorTemplate, Pipeline, PipelineError,
    PipelineExecutor, PipelineId, PipelineState, RuntimeState, RuntimeStateBuilder,
    StructureError, TaskScheduler, UsageError,
};
