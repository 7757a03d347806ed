use serde::{Deserialize, Serialize};

/// Which tool origins a run may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Local tools only; remote descriptors are excluded entirely.
    LocalOnly,
    /// Local plus whatever remote tools happen to be connected.
    Hybrid,
    /// Local plus remote, with remote capability required: a run fails at
    /// Init when no remote tool is available.
    RemoteAugmented,
}

/// Sampling parameters forwarded verbatim to the provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SamplingOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 4096,
        }
    }
}

/// Immutable per-run configuration. The only process-level input crossing
/// into this core; the embedding application populates it fully before a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub mode: ExecutionMode,
    pub provider: String,
    pub model: String,
    pub max_turns: usize,
    pub auto_approve: bool,
    pub sampling: SamplingOptions,
}

impl RunConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            mode: ExecutionMode::LocalOnly,
            provider: provider.into(),
            model: model.into(),
            max_turns: 10,
            auto_approve: false,
            sampling: SamplingOptions::default(),
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_turns(mut self, max: usize) -> Self {
        self.max_turns = max;
        self
    }

    pub fn with_auto_approve(mut self, auto: bool) -> Self {
        self.auto_approve = auto;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingOptions) -> Self {
        self.sampling = sampling;
        self
    }
}
