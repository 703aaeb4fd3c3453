use std::sync::atomic::{AtomicBool, Ordering};

use derive_builder::Builder;

use crate::util::RuntimeProfile;

/// The RuntimeState holds fragment-wide execution settings, the root of the profile tree and the
/// cancellation flag. Pipelines receive it in `prepare` and `close`.
///
/// ```
/// use pipedag::execution::RuntimeStateBuilder;
///
/// let state = RuntimeStateBuilder::default()
///     .query_id("q1")
///     .mem_limit(Some(1 << 30))
///     .build()
///     .unwrap();
/// assert_eq!(state.query_id(), "q1");
/// ```
#[derive(Builder, Debug)]
#[builder(pattern = "owned")]
pub struct RuntimeState {
    #[builder(setter(into), default = "\"0\".to_string()")]
    query_id: String,
    #[builder(default)]
    fragment_instance_id: u64,
    /// Memory limit in bytes, `None` means unlimited
    #[builder(default)]
    mem_limit: Option<usize>,
    #[builder(setter(skip), default = "RuntimeProfile::new(\"PipelineContext\")")]
    runtime_profile: RuntimeProfile,
    #[builder(setter(skip))]
    cancelled: AtomicBool,
}

impl RuntimeState {
    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    pub fn fragment_instance_id(&self) -> u64 {
        self.fragment_instance_id
    }

    pub fn mem_limit(&self) -> Option<usize> {
        self.mem_limit
    }

    pub fn runtime_profile(&self) -> &RuntimeProfile {
        &self.runtime_profile
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns true only for the call that flipped the flag.
    pub fn set_cancelled(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }
}
