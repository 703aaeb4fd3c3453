use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info};

use super::{FragmentContext, PipelineId};
use crate::execution::{PipelineError, UsageError};

/// Consumer of "pipeline became runnable" events, typically a worker pool that creates the tasks
/// of the pipeline via [`Pipeline::build_operators`](super::Pipeline::build_operators).
pub trait TaskScheduler: Send + Sync {
    fn schedule(&self, pipeline: PipelineId) -> Result<(), PipelineError>;
}

/// The PipelineExecutor connects a prepared fragment to a [`TaskScheduler`].
///
/// Pipelines only report the fan-in transition, the executor turns it into a submission.
pub struct PipelineExecutor {
    /// The fragment whose pipelines are executed
    context: Arc<FragmentContext>,
    scheduler: Arc<dyn TaskScheduler>,
    submitted: AtomicBool,
}

impl PipelineExecutor {
    pub fn new(context: Arc<FragmentContext>, scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self {
            context,
            scheduler,
            submitted: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &Arc<FragmentContext> {
        &self.context
    }

    pub fn into_context(self) -> Arc<FragmentContext> {
        self.context
    }

    /// Schedules every pipeline without pending dependencies. Allowed once.
    pub fn submit(&self) -> Result<Vec<PipelineId>, PipelineError> {
        if !self.context.is_prepared() {
            return Err(UsageError::NotPreparedForSignal.into());
        }
        if self.context.is_cancelled() {
            return Err(UsageError::Cancelled.into());
        }
        if self.submitted.swap(true, Ordering::AcqRel) {
            return Err(UsageError::AlreadySubmitted.into());
        }
        let runnable = self.context.runnable_pipelines();
        for &id in &runnable {
            self.scheduler.schedule(id)?;
        }
        info!(
            "Fragment submitted: query_id={} runnable={:?}",
            self.context.runtime_state().query_id(),
            runnable
        );
        Ok(runnable)
    }

    /// Called once all tasks of `id` finished. Signals every parent and schedules the ones this
    /// completion made runnable, which are returned.
    ///
    /// A failing signal or schedule does not stop the others: every parent is signaled, every
    /// parent that became runnable is handed to the scheduler and `id` is counted as finished.
    /// The first error is returned afterwards.
    pub fn finish_pipeline(&self, id: PipelineId) -> Result<Vec<PipelineId>, PipelineError> {
        let pipeline = self.context.pipeline(id)?;
        let mut first_err = None;
        let mut runnable = vec![];
        for &parent in pipeline.parents() {
            match self
                .context
                .pipeline(parent)
                .and_then(|p| p.finish_one_dependency())
            {
                Ok(true) => runnable.push(parent),
                Ok(false) => {}
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        if self.context.is_cancelled() {
            debug!(
                "Skip scheduling parents of cancelled fragment: pipeline_id={} parents={:?}",
                id, runnable
            );
            runnable.clear();
        }
        for &parent in &runnable {
            if let Err(e) = self.scheduler.schedule(parent) {
                error!(
                    "Failed to schedule runnable pipeline: pipeline_id={} finished={} error={}",
                    parent, id, e
                );
                first_err.get_or_insert(e);
            }
        }
        if self.context.close_a_pipeline(id) {
            info!(
                "All pipelines finished: query_id={} fragment_instance_id={}",
                self.context.runtime_state().query_id(),
                self.context.runtime_state().fragment_instance_id()
            );
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(runnable),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::execution::test_util::*;
    use crate::execution::PipelineState;

    #[derive(Default)]
    struct RecordingScheduler {
        scheduled: Mutex<Vec<PipelineId>>,
    }

    impl RecordingScheduler {
        fn scheduled(&self) -> Vec<PipelineId> {
            self.scheduled.lock().unwrap().clone()
        }
    }

    impl TaskScheduler for RecordingScheduler {
        fn schedule(&self, pipeline: PipelineId) -> Result<(), PipelineError> {
            self.scheduled.lock().unwrap().push(pipeline);
            Ok(())
        }
    }

    /// p(0) depends on q(1) and r(2), both depend on s(3).
    fn diamond() -> FragmentContext {
        init_logger();
        let mut ctx = FragmentContext::new(Arc::new(runtime_state()));
        for _ in 0..4 {
            let id = ctx.add_pipeline().unwrap();
            *ctx.pipeline_mut(id).unwrap() = build_pipeline(id, 1);
        }
        ctx.add_dependency(0, 1).unwrap();
        ctx.add_dependency(0, 2).unwrap();
        ctx.add_dependency(1, 3).unwrap();
        ctx.add_dependency(2, 3).unwrap();
        ctx
    }

    fn executor(ctx: FragmentContext) -> (PipelineExecutor, Arc<RecordingScheduler>) {
        let scheduler = Arc::new(RecordingScheduler::default());
        let executor = PipelineExecutor::new(Arc::new(ctx), scheduler.clone());
        (executor, scheduler)
    }

    #[test]
    fn submit_requires_prepare() {
        let (executor, scheduler) = executor(diamond());
        assert_eq!(
            executor.submit(),
            Err(UsageError::NotPreparedForSignal.into())
        );
        assert!(scheduler.scheduled().is_empty());
    }

    #[test]
    fn diamond_runs_in_dependency_order() {
        let mut ctx = diamond();
        ctx.prepare().unwrap();
        let (executor, scheduler) = executor(ctx);

        assert_eq!(executor.submit().unwrap(), vec![3]);
        assert_eq!(
            executor.submit(),
            Err(UsageError::AlreadySubmitted.into())
        );

        assert_eq!(executor.finish_pipeline(3).unwrap(), vec![1, 2]);
        assert_eq!(
            executor.finish_pipeline(2).unwrap(),
            Vec::<PipelineId>::new()
        );
        assert_eq!(executor.finish_pipeline(1).unwrap(), vec![0]);
        assert_eq!(
            executor.finish_pipeline(0).unwrap(),
            Vec::<PipelineId>::new()
        );
        assert_eq!(scheduler.scheduled(), vec![3, 1, 2, 0]);

        let mut ctx = Arc::try_unwrap(executor.into_context()).ok().unwrap();
        ctx.close();
        assert!(ctx.runtime_state().runtime_profile().children().is_empty());
    }

    #[test]
    fn cancelled_fragment_stops_scheduling() {
        let mut ctx = diamond();
        ctx.prepare().unwrap();
        let (executor, scheduler) = executor(ctx);
        executor.submit().unwrap();

        executor.context().cancel();
        assert_eq!(
            executor.finish_pipeline(3).unwrap(),
            Vec::<PipelineId>::new()
        );
        assert_eq!(scheduler.scheduled(), vec![3]);
        // the fan-in counters still advance
        assert!(!executor
            .context()
            .pipeline(1)
            .unwrap()
            .has_pending_dependency());
    }

    #[test]
    fn submit_after_cancel_is_rejected() {
        let mut ctx = diamond();
        ctx.prepare().unwrap();
        let (executor, scheduler) = executor(ctx);
        executor.context().cancel();
        assert_eq!(executor.submit(), Err(UsageError::Cancelled.into()));
        assert!(scheduler.scheduled().is_empty());
    }

    #[test]
    fn finishing_twice_over_signals_parent() {
        let mut ctx = diamond();
        ctx.prepare().unwrap();
        let (executor, _) = executor(ctx);
        executor.submit().unwrap();
        executor.finish_pipeline(1).unwrap();
        executor.finish_pipeline(2).unwrap();
        assert_eq!(
            executor.finish_pipeline(1),
            Err(UsageError::TooManyCompletions { required: 2 }.into())
        );
    }

    /// Rejects the first schedule of `fail_on`, accepts everything else.
    struct FailOnceScheduler {
        fail_on: PipelineId,
        failed: AtomicBool,
        attempts: Mutex<Vec<PipelineId>>,
    }

    impl TaskScheduler for FailOnceScheduler {
        fn schedule(&self, pipeline: PipelineId) -> Result<(), PipelineError> {
            self.attempts.lock().unwrap().push(pipeline);
            if pipeline == self.fail_on && !self.failed.swap(true, Ordering::AcqRel) {
                return Err(UsageError::Closed.into());
            }
            Ok(())
        }
    }

    #[test]
    fn schedule_failure_does_not_lose_other_parents() {
        let mut ctx = diamond();
        ctx.prepare().unwrap();
        let scheduler = Arc::new(FailOnceScheduler {
            fail_on: 1,
            failed: AtomicBool::new(false),
            attempts: Mutex::new(vec![]),
        });
        let executor = PipelineExecutor::new(Arc::new(ctx), scheduler.clone());
        executor.submit().unwrap();

        assert_eq!(executor.finish_pipeline(3), Err(UsageError::Closed.into()));
        assert_eq!(*scheduler.attempts.lock().unwrap(), vec![3, 1, 2]);
        assert_eq!(executor.context().closed_pipeline_count(), 1);
        for id in [1, 2] {
            assert_eq!(
                executor.context().pipeline(id).unwrap().state(),
                PipelineState::Runnable
            );
        }

        // the rejected pipeline is still runnable, so the caller can hand it over again
        scheduler.schedule(1).unwrap();
        assert_eq!(
            executor.finish_pipeline(2).unwrap(),
            Vec::<PipelineId>::new()
        );
        assert_eq!(executor.finish_pipeline(1).unwrap(), vec![0]);
        assert_eq!(
            executor.finish_pipeline(0).unwrap(),
            Vec::<PipelineId>::new()
        );
        assert_eq!(*scheduler.attempts.lock().unwrap(), vec![3, 1, 2, 1, 0]);
        assert_eq!(executor.context().closed_pipeline_count(), 4);
    }
}
