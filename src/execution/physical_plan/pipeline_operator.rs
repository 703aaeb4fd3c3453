use std::sync::Arc;

use derive_new::new;
use downcast_rs::{impl_downcast, Downcast};
use strum_macros::{AsRefStr, Display};

pub type OperatorTemplateId = u32;

pub type OperatorTemplateRef = Arc<dyn OperatorTemplate>;

/// Where an operator may sit within a pipeline's chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum OperatorKind {
    /// Produces blocks, always chain position 0
    Source,
    /// Consumes the previous operator's output and produces blocks
    Intermediate,
    /// Consumes blocks, always the last chain position
    Sink,
}

#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct OperatorTemplateBase {
    pub(crate) id: OperatorTemplateId,
    pub(crate) name: String,
    pub(crate) kind: OperatorKind,
}

/// Immutable plan-time description of one dataflow stage.
///
/// A template is shared read-only by every task executing its pipeline, so any per-task mutable
/// state belongs to the [`OperatorInstance`] it creates.
pub trait OperatorTemplate: Send + Sync {
    fn base(&self) -> &OperatorTemplateBase;

    fn id(&self) -> OperatorTemplateId {
        self.base().id
    }

    fn name(&self) -> &str {
        &self.base().name
    }

    fn kind(&self) -> OperatorKind {
        self.base().kind
    }

    /// Creates fresh runtime state for one task. Must not touch `self`'s observable state.
    fn create_instance(&self) -> Box<dyn OperatorInstance>;
}

/// Mutable per-task runtime counterpart of an [`OperatorTemplate`]. Owned by exactly one task.
pub trait OperatorInstance: Downcast + Send {
    fn template_id(&self) -> OperatorTemplateId;

    fn name(&self) -> &str;

    /// Releases task-local resources. Called once by [`close_operators`] when the task ends.
    fn close(&mut self) {}
}

impl_downcast!(OperatorInstance);

pub type OperatorInstances = Vec<Box<dyn OperatorInstance>>;

/// Closes a task's instance chain, sink first.
pub fn close_operators(operators: &mut [Box<dyn OperatorInstance>]) {
    for op in operators.iter_mut().rev() {
        op.close();
    }
}
