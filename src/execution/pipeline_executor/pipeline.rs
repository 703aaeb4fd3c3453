use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use itertools::Itertools;
use log::{debug, error, trace, warn};
use strum_macros::{AsRefStr, Display};

use crate::execution::{
    OperatorInstances, OperatorKind, OperatorTemplateRef, PipelineError, RuntimeState,
    StructureError, UsageError,
};
use crate::util::{Counter, RuntimeProfile};

pub type PipelineId = u32;

/// Externally observable lifecycle of a pipeline.
///
/// A prepared pipeline is either `Blocked` on unfinished children or `Runnable`. The
/// `Blocked -> Runnable` transition fires exactly once, reported by
/// [`Pipeline::finish_one_dependency`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum PipelineState {
    Building,
    Blocked,
    Runnable,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Building,
    Prepared,
    Closed,
}

/// Query is divided into pipelines, Pipelines are executed in parallel.
///
/// Pipeline represents an execution pipeline, it gets data from `source` and pass it to `operators`
/// for immediate computation, and then pass data to `sink` for final computation. A pipeline may
/// only run once every child pipeline (dependency) has finished.
///
/// Dependency edges are stored as [`PipelineId`] handles into the owning
/// [`FragmentContext`](super::FragmentContext), so the graph holds no ownership at all.
pub struct Pipeline {
    id: PipelineId,
    lifecycle: Lifecycle,

    /// The source of this pipeline
    source: Option<OperatorTemplateRef>,
    /// The chain of intermediate operators
    operators: Vec<OperatorTemplateRef>,
    /// The sink (i.e. destination) for data; this is e.g. a hash table to-be-built
    sink: Option<OperatorTemplateRef>,

    /// The parent pipelines (i.e. pipelines that are dependent on this pipeline to finish)
    parents: Vec<PipelineId>,
    /// The dependencies of this pipeline
    children: Vec<PipelineId>,

    /// Number of children captured by `prepare`
    required: u32,
    /// Number of children that signaled completion so far, never exceeds `required`
    complete_dependency: AtomicU32,

    profile: Option<PipelineProfile>,
}

struct PipelineProfile {
    profile: RuntimeProfile,
    finished_dependencies: Counter,
    instance_chains_built: Counter,
}

/// Fan-in target for `children` edges. The completion counter is a `u32`.
fn fan_in_target(children: usize) -> Result<u32, StructureError> {
    u32::try_from(children).map_err(|_| StructureError::TooManyDependencies)
}

impl Pipeline {
    pub(crate) fn new(id: PipelineId) -> Self {
        Self {
            id,
            lifecycle: Lifecycle::Building,
            source: None,
            operators: vec![],
            sink: None,
            parents: vec![],
            children: vec![],
            required: 0,
            complete_dependency: AtomicU32::new(0),
            profile: None,
        }
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn set_source(&mut self, source: OperatorTemplateRef) -> Result<(), PipelineError> {
        self.check_building()?;
        check_kind(OperatorKind::Source, &source)?;
        if self.source.is_some() {
            return Err(StructureError::SourceAlreadySet.into());
        }
        self.source = Some(source);
        Ok(())
    }

    /// Appends an intermediate operator, which consumes the output of the one added before it.
    pub fn add_operator(&mut self, op: OperatorTemplateRef) -> Result<(), PipelineError> {
        self.check_building()?;
        check_kind(OperatorKind::Intermediate, &op)?;
        if self.sink.is_some() {
            return Err(StructureError::OperatorAfterSink.into());
        }
        self.operators.push(op);
        Ok(())
    }

    pub fn set_sink(&mut self, sink: OperatorTemplateRef) -> Result<(), PipelineError> {
        self.check_building()?;
        check_kind(OperatorKind::Sink, &sink)?;
        if self.sink.is_some() {
            return Err(StructureError::SinkAlreadySet.into());
        }
        if self.source.is_none() {
            return Err(StructureError::SinkWithoutSource.into());
        }
        self.sink = Some(sink);
        Ok(())
    }

    pub fn source(&self) -> Option<&OperatorTemplateRef> {
        self.source.as_ref()
    }

    pub fn sink(&self) -> Option<&OperatorTemplateRef> {
        self.sink.as_ref()
    }

    /// The whole chain in execution order: source, intermediates, sink.
    pub fn operators(&self) -> impl Iterator<Item = &OperatorTemplateRef> {
        self.source
            .iter()
            .chain(self.operators.iter())
            .chain(self.sink.iter())
    }

    /// Registers `other` as a child of `self` and `self` as a parent of `other`.
    ///
    /// Both pipelines must still be building: once a pipeline is prepared its fan-in target is
    /// fixed and signaling may already be in flight.
    pub fn add_dependency(&mut self, other: &mut Pipeline) -> Result<(), PipelineError> {
        if self.lifecycle != Lifecycle::Building || other.lifecycle != Lifecycle::Building {
            error!(
                "Pipeline dependency added after build phase: parent={} child={}",
                self.id, other.id
            );
            return Err(UsageError::DependencyAfterPrepare.into());
        }
        if self.id == other.id {
            return Err(StructureError::SelfDependency.into());
        }
        if self.children.contains(&other.id) {
            return Err(UsageError::DuplicateDependency(other.id).into());
        }
        fan_in_target(self.children.len() + 1)?;
        self.children.push(other.id);
        other.parents.push(self.id);
        debug!(
            "Pipeline dependency added: parent={} child={}",
            self.id, other.id
        );
        Ok(())
    }

    pub fn children(&self) -> &[PipelineId] {
        &self.children
    }

    pub fn parents(&self) -> &[PipelineId] {
        &self.parents
    }

    /// The fan-in target. Follows the live edge count until `prepare` freezes it.
    pub fn required(&self) -> u32 {
        match self.lifecycle {
            Lifecycle::Building => fan_in_target(self.children.len()).unwrap_or(u32::MAX),
            Lifecycle::Prepared | Lifecycle::Closed => self.required,
        }
    }

    pub fn completed_dependencies(&self) -> u32 {
        self.complete_dependency.load(Ordering::Acquire)
    }

    /// Validates the chain, freezes the dependency count and allocates the pipeline profile
    /// under the runtime state's root profile.
    pub fn prepare(&mut self, state: &RuntimeState) -> Result<(), PipelineError> {
        match self.lifecycle {
            Lifecycle::Building => {}
            Lifecycle::Prepared => {
                error!("Pipeline prepared twice: pipeline_id={}", self.id);
                return Err(UsageError::AlreadyPrepared.into());
            }
            Lifecycle::Closed => return Err(UsageError::Closed.into()),
        }
        if self.source.is_none() {
            return Err(StructureError::MissingSource.into());
        }
        if self.sink.is_none() {
            return Err(StructureError::MissingSink.into());
        }

        self.required = fan_in_target(self.children.len())?;

        let profile = RuntimeProfile::new(format!("Pipeline (id={})", self.id));
        profile.add_counter("DependencyCount").set(self.required as i64);
        let finished_dependencies = profile.add_counter("FinishedDependencies");
        let instance_chains_built = profile.add_counter("InstanceChainsBuilt");
        state.runtime_profile().add_child(profile.clone());
        self.profile = Some(PipelineProfile {
            profile,
            finished_dependencies,
            instance_chains_built,
        });

        self.lifecycle = Lifecycle::Prepared;
        debug!(
            "Pipeline prepared: pipeline_id={} required={} operators={}",
            self.id,
            self.required,
            self.operators().map(|op| op.name()).join(" -> ")
        );
        Ok(())
    }

    pub fn runtime_profile(&self) -> Option<&RuntimeProfile> {
        self.profile.as_ref().map(|p| &p.profile)
    }

    /// Whether some child has not finished yet. Safe to call from any thread.
    pub fn has_pending_dependency(&self) -> bool {
        self.complete_dependency.load(Ordering::Acquire) < self.required()
    }

    /// Signals that one child finished. Must be called exactly once per child.
    ///
    /// Returns true for precisely one call: the one that completed the last outstanding child.
    /// That call happens-after every other signal for this pipeline.
    ///
    /// The increment is checked rather than a plain `fetch_add`, so an excess call fails without
    /// moving the counter past `required`. The winner is still the call whose pre-increment value
    /// is `required - 1`.
    pub fn finish_one_dependency(&self) -> Result<bool, PipelineError> {
        match self.lifecycle {
            Lifecycle::Prepared => {}
            Lifecycle::Building => {
                error!(
                    "Pipeline dependency signaled before prepare: pipeline_id={}",
                    self.id
                );
                return Err(UsageError::NotPreparedForSignal.into());
            }
            Lifecycle::Closed => return Err(UsageError::Closed.into()),
        }

        let required = self.required;
        let done = self
            .complete_dependency
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |done| {
                (done < required).then(|| done + 1)
            })
            .map_err(|done| {
                error!(
                    "Pipeline dependency over-signaled: pipeline_id={} done={} required={}",
                    self.id, done, required
                );
                PipelineError::from(UsageError::TooManyCompletions { required })
            })?;

        if let Some(profile) = &self.profile {
            profile.finished_dependencies.update(1);
        }
        let runnable = done == required - 1;
        trace!(
            "Pipeline dependency finished: pipeline_id={} done={} required={} runnable={}",
            self.id,
            done + 1,
            required,
            runnable
        );
        Ok(runnable)
    }

    /// Materializes a fresh operator instance chain for one task, in chain order.
    pub fn build_operators(&self) -> Result<OperatorInstances, PipelineError> {
        match self.lifecycle {
            Lifecycle::Prepared => {}
            Lifecycle::Building => return Err(PipelineError::NotPrepared(self.id)),
            Lifecycle::Closed => return Err(UsageError::Closed.into()),
        }
        let instances = self
            .operators()
            .map(|op| op.create_instance())
            .collect::<OperatorInstances>();
        if let Some(profile) = &self.profile {
            profile.instance_chains_built.update(1);
        }
        debug!(
            "Pipeline operators built: pipeline_id={} operators={}",
            self.id,
            instances.iter().map(|op| op.name()).join(" -> ")
        );
        Ok(instances)
    }

    pub fn state(&self) -> PipelineState {
        match self.lifecycle {
            Lifecycle::Building => PipelineState::Building,
            Lifecycle::Closed => PipelineState::Closed,
            Lifecycle::Prepared if self.has_pending_dependency() => PipelineState::Blocked,
            Lifecycle::Prepared => PipelineState::Runnable,
        }
    }

    /// Releases the profile and drops operator templates and dependency links.
    ///
    /// Callable whatever `prepare` returned. Requires exclusive access, so no task built from
    /// this pipeline can still be borrowing it.
    pub fn close(&mut self, state: &RuntimeState) {
        if self.lifecycle == Lifecycle::Closed {
            warn!("Pipeline closed twice: pipeline_id={}", self.id);
            return;
        }
        if let Some(profile) = self.profile.take() {
            state.runtime_profile().remove_child(profile.profile.name());
        }
        self.source = None;
        self.operators = vec![];
        self.sink = None;
        self.parents = vec![];
        self.children = vec![];
        self.lifecycle = Lifecycle::Closed;
        debug!("Pipeline closed: pipeline_id={}", self.id);
    }

    fn check_building(&self) -> Result<(), PipelineError> {
        match self.lifecycle {
            Lifecycle::Building => Ok(()),
            Lifecycle::Prepared => Err(UsageError::AlreadyPrepared.into()),
            Lifecycle::Closed => Err(UsageError::Closed.into()),
        }
    }
}

fn check_kind(expected: OperatorKind, op: &OperatorTemplateRef) -> Result<(), StructureError> {
    let actual = op.kind();
    if actual != expected {
        return Err(StructureError::KindMismatch { expected, actual });
    }
    Ok(())
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("state", &self.state())
            .field(
                "operators",
                &self.operators().map(|op| op.name()).collect::<Vec<_>>(),
            )
            .field("children", &self.children)
            .field("parents", &self.parents)
            .field("complete_dependency", &self.completed_dependencies())
            .finish()
    }
}
