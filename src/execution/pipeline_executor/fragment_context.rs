use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use super::{Pipeline, PipelineId};
use crate::execution::{
    OperatorTemplateId, PipelineError, RuntimeState, StructureError, UsageError,
};

/// The FragmentContext owns every pipeline of one fragment instance.
///
/// Pipelines are stored densely by [`PipelineId`] and refer to each other only through ids, so
/// the context is the single owner of the whole pipeline graph.
pub struct FragmentContext {
    runtime_state: Arc<RuntimeState>,
    pipelines: Vec<Pipeline>,
    next_operator_template_id: AtomicU32,
    prepared: bool,
    closed_pipeline_cnt: AtomicUsize,
}

impl FragmentContext {
    pub fn new(runtime_state: Arc<RuntimeState>) -> Self {
        Self {
            runtime_state,
            pipelines: vec![],
            next_operator_template_id: AtomicU32::new(0),
            prepared: false,
            closed_pipeline_cnt: AtomicUsize::new(0),
        }
    }

    pub fn runtime_state(&self) -> &Arc<RuntimeState> {
        &self.runtime_state
    }

    pub fn add_pipeline(&mut self) -> Result<PipelineId, PipelineError> {
        if self.prepared {
            error!(
                "Pipeline added to prepared fragment: fragment_instance_id={}",
                self.runtime_state.fragment_instance_id()
            );
            return Err(UsageError::AlreadyPrepared.into());
        }
        let id = self.pipelines.len() as PipelineId;
        self.pipelines.push(Pipeline::new(id));
        Ok(id)
    }

    pub fn next_operator_template_id(&self) -> OperatorTemplateId {
        self.next_operator_template_id
            .fetch_add(1, Ordering::Relaxed)
    }

    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    pub fn pipeline(&self, id: PipelineId) -> Result<&Pipeline, PipelineError> {
        self.pipelines
            .get(id as usize)
            .ok_or_else(|| UsageError::UnknownPipeline(id).into())
    }

    pub fn pipeline_mut(&mut self, id: PipelineId) -> Result<&mut Pipeline, PipelineError> {
        self.pipelines
            .get_mut(id as usize)
            .ok_or_else(|| UsageError::UnknownPipeline(id).into())
    }

    /// Makes `child` a dependency of `parent`, see [`Pipeline::add_dependency`].
    pub fn add_dependency(
        &mut self,
        parent: PipelineId,
        child: PipelineId,
    ) -> Result<(), PipelineError> {
        self.pipeline(parent)?;
        self.pipeline(child)?;
        if parent == child {
            return Err(StructureError::SelfDependency.into());
        }
        let (parent, child) = (parent as usize, child as usize);
        if parent < child {
            let (left, right) = self.pipelines.split_at_mut(child);
            left[parent].add_dependency(&mut right[0])
        } else {
            let (left, right) = self.pipelines.split_at_mut(parent);
            right[0].add_dependency(&mut left[child])
        }
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Checks the graph is acyclic, then prepares every pipeline.
    ///
    /// On error some pipelines may already be prepared; [`FragmentContext::close`] releases them.
    pub fn prepare(&mut self) -> Result<(), PipelineError> {
        if self.prepared {
            return Err(UsageError::AlreadyPrepared.into());
        }
        if self.pipelines.is_empty() {
            return Err(StructureError::EmptyFragment.into());
        }
        self.topological_order()?;
        for pipeline in self.pipelines.iter_mut() {
            pipeline.prepare(&self.runtime_state)?;
        }
        self.prepared = true;
        info!(
            "Fragment prepared: query_id={} fragment_instance_id={} pipelines={} runnable={:?}",
            self.runtime_state.query_id(),
            self.runtime_state.fragment_instance_id(),
            self.pipelines.len(),
            self.runnable_pipelines()
        );
        Ok(())
    }

    /// Pipeline ids ordered so that every child comes before its parents.
    pub fn topological_order(&self) -> Result<Vec<PipelineId>, PipelineError> {
        let graph = self.dependency_graph()?;
        let order = toposort(&graph, None)
            .map_err(|cycle| StructureError::Cyclic(graph[cycle.node_id()]))?;
        Ok(order.into_iter().map(|idx| graph[idx]).collect())
    }

    /// Edges point from child to parent, node index equals pipeline id.
    fn dependency_graph(&self) -> Result<DiGraph<PipelineId, ()>, PipelineError> {
        self.check_pipeline_ids()?;
        let mut graph = DiGraph::with_capacity(self.pipelines.len(), 0);
        for pipeline in &self.pipelines {
            graph.add_node(pipeline.id());
        }
        for pipeline in &self.pipelines {
            for &child in pipeline.children() {
                graph.add_edge(
                    NodeIndex::new(child as usize),
                    NodeIndex::new(pipeline.id() as usize),
                    (),
                );
            }
        }
        Ok(graph)
    }

    /// Every slot must hold the pipeline with its own id, linked only to pipelines of this
    /// fragment. A slot replaced through [`FragmentContext::pipeline_mut`] may break both.
    fn check_pipeline_ids(&self) -> Result<(), PipelineError> {
        let len = self.pipelines.len();
        for (index, pipeline) in self.pipelines.iter().enumerate() {
            let unknown = if pipeline.id() as usize != index {
                Some(pipeline.id())
            } else {
                pipeline
                    .children()
                    .iter()
                    .chain(pipeline.parents())
                    .copied()
                    .find(|&id| id as usize >= len)
            };
            if let Some(id) = unknown {
                error!(
                    "Pipeline slot refers outside the fragment: slot={} pipeline_id={} unknown={}",
                    index,
                    pipeline.id(),
                    id
                );
                return Err(UsageError::UnknownPipeline(id).into());
            }
        }
        Ok(())
    }

    /// Prepared pipelines whose dependencies are all finished.
    pub fn runnable_pipelines(&self) -> Vec<PipelineId> {
        if !self.prepared {
            return vec![];
        }
        self.pipelines
            .iter()
            .filter(|p| !p.has_pending_dependency())
            .map(|p| p.id())
            .collect()
    }

    /// Records that all tasks of one pipeline finished. Returns true when it was the last
    /// pipeline of the fragment.
    pub fn close_a_pipeline(&self, id: PipelineId) -> bool {
        let closed = self.closed_pipeline_cnt.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(
            "Pipeline finished: pipeline_id={} closed={}/{}",
            id,
            closed,
            self.pipelines.len()
        );
        if closed > self.pipelines.len() {
            warn!(
                "More pipelines finished than exist: pipeline_id={} closed={}",
                id, closed
            );
        }
        closed == self.pipelines.len()
    }

    pub fn closed_pipeline_count(&self) -> usize {
        self.closed_pipeline_cnt.load(Ordering::Acquire)
    }

    pub fn cancel(&self) -> bool {
        let first = self.runtime_state.set_cancelled();
        if first {
            warn!(
                "Fragment cancelled: query_id={} fragment_instance_id={}",
                self.runtime_state.query_id(),
                self.runtime_state.fragment_instance_id()
            );
        }
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.runtime_state.is_cancelled()
    }

    pub fn close(&mut self) {
        for pipeline in self.pipelines.iter_mut() {
            pipeline.close(&self.runtime_state);
        }
        info!(
            "Fragment closed: query_id={} fragment_instance_id={}",
            self.runtime_state.query_id(),
            self.runtime_state.fragment_instance_id()
        );
    }
}
