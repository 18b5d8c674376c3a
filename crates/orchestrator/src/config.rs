use std::time::Duration;

/// Bounds on the two blocking points of a state-machine step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Maximum time a single publish may take before it counts as a dispatch failure.
    pub publish_timeout: Duration,
    /// Maximum time a single store call may take before the step is aborted.
    pub store_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(5),
            store_timeout: Duration::from_secs(5),
        }
    }
}
