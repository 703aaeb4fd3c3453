use super::{OperatorKind, PipelineId};

/// Malformed operator chain or pipeline graph. Fatal to fragment startup.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StructureError {
    #[error("pipeline source already set")]
    SourceAlreadySet,
    #[error("pipeline sink already set")]
    SinkAlreadySet,
    #[error("pipeline sink set before source")]
    SinkWithoutSource,
    #[error("operator added after pipeline sink")]
    OperatorAfterSink,
    #[error("pipeline missing source operator")]
    MissingSource,
    #[error("pipeline missing sink operator")]
    MissingSink,
    #[error("expect {expected} operator, but got {actual}")]
    KindMismatch {
        expected: OperatorKind,
        actual: OperatorKind,
    },
    #[error("pipeline {0} transitively depends on itself")]
    Cyclic(PipelineId),
    #[error("fragment has no pipeline")]
    EmptyFragment,
    #[error("pipeline can not depend on itself")]
    SelfDependency,
    #[error("pipeline has more than {} dependencies", u32::MAX)]
    TooManyDependencies,
}

/// Contract violation by the caller. Recovering would mask scheduling corruption.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("already prepared")]
    AlreadyPrepared,
    #[error("dependency added after prepare")]
    DependencyAfterPrepare,
    #[error("dependency on pipeline {0} already exists")]
    DuplicateDependency(PipelineId),
    #[error("finish_one_dependency called more than {required} times")]
    TooManyCompletions { required: u32 },
    #[error("dependency signaled before prepare")]
    NotPreparedForSignal,
    #[error("pipeline already closed")]
    Closed,
    #[error("unknown pipeline {0}")]
    UnknownPipeline(PipelineId),
    #[error("fragment already submitted")]
    AlreadySubmitted,
    #[error("fragment cancelled")]
    Cancelled,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("structure error: {0}")]
    Structure(
        #[source]
        #[from]
        StructureError,
    ),
    #[error("usage error: {0}")]
    Usage(
        #[source]
        #[from]
        UsageError,
    ),
    #[error("pipeline {0} is not prepared")]
    NotPrepared(PipelineId),
}
