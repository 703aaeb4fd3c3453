use std::sync::Arc;

use super::{
    OperatorInstance, OperatorKind, OperatorTemplate, OperatorTemplateBase, OperatorTemplateId,
    OperatorTemplateRef, Pipeline, PipelineId, RuntimeState, RuntimeStateBuilder,
};

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) fn runtime_state() -> RuntimeState {
    RuntimeStateBuilder::default()
        .query_id("test-query")
        .build()
        .unwrap()
}

pub(crate) struct MockTemplate {
    base: OperatorTemplateBase,
}

impl MockTemplate {
    fn build(id: OperatorTemplateId, kind: OperatorKind) -> OperatorTemplateRef {
        let name = format!("Mock{:?}Operator#{}", kind, id);
        Arc::new(Self {
            base: OperatorTemplateBase::new(id, name, kind),
        })
    }

    pub(crate) fn source(id: OperatorTemplateId) -> OperatorTemplateRef {
        Self::build(id, OperatorKind::Source)
    }

    pub(crate) fn intermediate(id: OperatorTemplateId) -> OperatorTemplateRef {
        Self::build(id, OperatorKind::Intermediate)
    }

    pub(crate) fn sink(id: OperatorTemplateId) -> OperatorTemplateRef {
        Self::build(id, OperatorKind::Sink)
    }
}

impl OperatorTemplate for MockTemplate {
    fn base(&self) -> &OperatorTemplateBase {
        &self.base
    }

    fn create_instance(&self) -> Box<dyn OperatorInstance> {
        Box::new(MockInstance {
            template_id: self.base.id,
            name: self.base.name.clone(),
            rows_processed: 0,
            closed: false,
        })
    }
}

pub(crate) struct MockInstance {
    pub(crate) template_id: OperatorTemplateId,
    pub(crate) name: String,
    pub(crate) rows_processed: usize,
    pub(crate) closed: bool,
}

impl OperatorInstance for MockInstance {
    fn template_id(&self) -> OperatorTemplateId {
        self.template_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) {
        assert!(!self.closed, "{} closed twice", self.name);
        self.closed = true;
    }
}

/// Builds a pipeline `source -> intermediate * n -> sink`, template ids derived from `id`.
pub(crate) fn build_pipeline(id: PipelineId, intermediates: u32) -> Pipeline {
    let base = id * 100;
    let mut pipeline = Pipeline::new(id);
    pipeline.set_source(MockTemplate::source(base)).unwrap();
    for i in 0..intermediates {
        pipeline
            .add_operator(MockTemplate::intermediate(base + 1 + i))
            .unwrap();
    }
    pipeline
        .set_sink(MockTemplate::sink(base + 1 + intermediates))
        .unwrap();
    pipeline
}
