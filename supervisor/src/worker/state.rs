/// Current state of the worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Worker is not running
    Stopped,
    /// Worker was spawned (or adopted) and is not yet confirmed live
    Starting,
    /// Worker answered a health probe
    Running,
    /// Graceful stop in progress
    Stopping,
    /// Unexpected exit observed, transitioning to StoppedError
    Crashing,
    /// Worker exited unexpectedly; an explicit start is required
    StoppedError,
}

impl WorkerState {
    /// Whether a `start()` may begin from this state.
    ///
    /// Starting is only legal from the two terminal states; every
    /// other state means a worker instance already exists.
    pub fn can_start(self) -> bool {
        matches!(self, Self::Stopped | Self::StoppedError)
    }

    /// Whether a worker instance is considered active.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    pub fn can_transition(self, to: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, to),
            (Stopped, Starting)
                | (StoppedError, Starting)
                | (Stopped, Running)      // adopted: already answering probes
                | (StoppedError, Running)
                | (Starting, Running)
                | (Starting, Stopping)
                | (Starting, Crashing)
                | (Starting, Stopped)      // clean self-exit during startup
                | (Starting, StoppedError) // spawn refused by the OS
                | (Running, Stopping)
                | (Running, Crashing)
                | (Running, Stopped)       // clean self-exit
                | (Stopping, Stopped)
                | (Crashing, StoppedError)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Crashing => "crashing",
            Self::StoppedError => "stopped_error",
        }
    }
}
