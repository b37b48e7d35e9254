use derive_more::Display;

/// A unit of work in either pipeline direction. Errors are tagged with the
/// stage that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Stage {
    #[display("capture")]
    Capture,
    #[display("compress")]
    Compress,
    #[display("upload")]
    Upload,
    #[display("download")]
    Download,
    #[display("decompress")]
    Decompress,
    #[display("restore")]
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PipelineState {
    Idle,
    Capturing,
    Compressing,
    Transporting,
    Downloading,
    Decompressing,
    Restoring,
    Cleanup,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Failed) => true,
            (Idle, Capturing | Downloading) => true,
            (Capturing, Compressing | Transporting) => true,
            (Compressing, Transporting) => true,
            (Downloading, Decompressing | Restoring) => true,
            (Decompressing, Restoring) => true,
            (Transporting | Restoring, Cleanup) => true,
            (Cleanup, Done) => true,
            _ => false,
        }
    }
}

impl From<Stage> for PipelineState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Capture => Self::Capturing,
            Stage::Compress => Self::Compressing,
            Stage::Upload => Self::Transporting,
            Stage::Download => Self::Downloading,
            Stage::Decompress => Self::Decompressing,
            Stage::Restore => Self::Restoring,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Operation {
    #[display("backup")]
    Backup,
    #[display("restore")]
    Restore,
}

/// Ordered record of the states a single run went through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTrail {
    states: Vec<PipelineState>,
}

impl Default for StateTrail {
    fn default() -> Self {
        Self {
            states: vec![PipelineState::Idle],
        }
    }
}

impl StateTrail {
    pub fn current(&self) -> PipelineState {
        self.states
            .last()
            .copied()
            .unwrap_or(PipelineState::Idle)
    }

    /// Records `next`. Illegal transitions are a programming error and are
    /// only asserted in debug builds.
    pub fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.current().can_transition_to(next),
            "illegal pipeline transition {} -> {}",
            self.current(),
            next
        );
        tracing::debug!("Pipeline state {} -> {}", self.current(), next);
        self.states.push(next);
    }

    /// Records the state in which `stage` runs.
    pub fn enter(&mut self, stage: Stage) {
        self.advance(stage.into());
    }

    pub fn states(&self) -> &[PipelineState] {
        &self.states
    }

    pub fn into_states(self) -> Vec<PipelineState> {
        self.states
    }
}
