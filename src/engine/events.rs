use std::sync::mpsc::Sender;

use crate::error::JobLabel;

/// Progress notifications published while a job runs.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisEvent {
    JobBegin { jobs: usize },
    ComponentInitialized { job: JobLabel },
    RowProcessingBegin,
    RowProcessingProgress { rows: u64 },
    ComponentError { job: JobLabel, message: String },
    RowProcessingSuccess { rows: u64 },
    ComponentResult { job: JobLabel },
    JobSuccess,
    JobFailed { errors: usize },
}

/// Rows between two [`AnalysisEvent::RowProcessingProgress`] events.
pub const PROGRESS_INTERVAL: u64 = 1000;

#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink {
    sender: Option<Sender<AnalysisEvent>>,
}

impl EventSink {
    pub fn new(sender: Option<Sender<AnalysisEvent>>) -> Self {
        Self { sender }
    }

    /// A receiver that went away is not an error.
    pub fn send(&self, event: AnalysisEvent) {
        if let Some(sender) = &self.sender
            && sender.send(event).is_err()
        {
            tracing::trace!("analysis event receiver disconnected");
        }
    }
}
