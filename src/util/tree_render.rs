use std::fmt::Write;

use derive_new::new;
use itertools::Itertools;

use crate::execution::{FragmentContext, Pipeline, PipelineId};

#[derive(new)]
pub struct TreeRender;

impl TreeRender {
    fn pipeline_to_string(pipeline: &Pipeline) -> String {
        let operators = pipeline.operators().map(|op| op.name()).join(" -> ");
        format!(
            "Pipeline#{}[{}]: {}",
            pipeline.id(),
            pipeline.state(),
            operators
        )
    }

    fn pipeline_tree_internal(
        ctx: &FragmentContext,
        id: PipelineId,
        level: usize,
        explain_result: &mut dyn Write,
    ) {
        let Ok(pipeline) = ctx.pipeline(id) else {
            return;
        };
        let pipeline_string = Self::pipeline_to_string(pipeline);
        writeln!(explain_result, "{}{}", " ".repeat(level * 2), pipeline_string).unwrap();
        for &child in pipeline.children() {
            Self::pipeline_tree_internal(ctx, child, level + 1, explain_result);
        }
    }

    /// Renders every pipeline under the pipelines waiting on it, starting from the pipelines
    /// nothing depends on. A cyclic graph is rendered as a flat list with its dependencies.
    pub fn pipeline_tree(ctx: &FragmentContext) -> String {
        let mut explain_result = String::new();
        if ctx.topological_order().is_err() {
            for pipeline in ctx.pipelines() {
                writeln!(
                    explain_result,
                    "{} deps=[{}]",
                    Self::pipeline_to_string(pipeline),
                    pipeline.children().iter().join(", ")
                )
                .unwrap();
            }
            return explain_result;
        }
        for root in ctx.pipelines().iter().filter(|p| p.parents().is_empty()) {
            Self::pipeline_tree_internal(ctx, root.id(), 0, &mut explain_result);
        }
        explain_result
    }
}
