//! Task records: the unit of work the conversion manager schedules, plus
//! the aggregate statistics it maintains.

use std::fmt;
use std::time::Duration;

use camino::Utf8PathBuf;
use time::OffsetDateTime;

use crate::converter::ConversionParams;
use crate::modality::Modality;

/// Manager-assigned task identifier, unique within one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Task lifecycle. `Pending -> Running -> {Completed, Failed, Cancelled}`;
/// pending tasks may also go straight to `Cancelled`. Terminal states never
/// change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// One conversion job. The manager owns the record; callers observe
/// snapshots of it through the status queries.
#[derive(Debug, Clone)]
pub struct ConversionTask {
    pub id: TaskId,
    pub input: Utf8PathBuf,
    pub output: Utf8PathBuf,
    /// Known modality, or `None` to detect from the input at run time.
    pub modality: Option<Modality>,
    pub params: ConversionParams,
    /// Higher runs earlier; equal priorities run in submission order.
    pub priority: i32,
    pub status: TaskStatus,
    pub created: OffsetDateTime,
    pub started: Option<OffsetDateTime>,
    pub completed: Option<OffsetDateTime>,
    /// Pipeline progress in `[0, 1]`.
    pub progress: f32,
    pub error_message: Option<String>,
    pub result_files: Vec<Utf8PathBuf>,
}

impl ConversionTask {
    pub fn new(
        id: TaskId,
        input: Utf8PathBuf,
        output: Utf8PathBuf,
        modality: Option<Modality>,
        params: ConversionParams,
        priority: i32,
    ) -> Self {
        Self {
            id,
            input,
            output,
            modality,
            params,
            priority,
            status: TaskStatus::Pending,
            created: OffsetDateTime::now_utc(),
            started: None,
            completed: None,
            progress: 0.0,
            error_message: None,
            result_files: Vec::new(),
        }
    }

    /// Wall time between the start and completion stamps, when both exist.
    pub fn processing_time(&self) -> Option<Duration> {
        let (started, completed) = (self.started?, self.completed?);
        Some((completed - started).unsigned_abs())
    }
}

/// Aggregate outcome counters with a running average of processing time
/// over completed tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversionStats {
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total_processing_time: Duration,
    pub average_time_per_task: Duration,
}

impl ConversionStats {
    pub fn record(&mut self, status: TaskStatus, processing_time: Option<Duration>) {
        match status {
            TaskStatus::Completed => {
                self.completed += 1;
                if let Some(elapsed) = processing_time {
                    self.total_processing_time += elapsed;
                }
                self.average_time_per_task = self.total_processing_time / self.completed as u32;
            }
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
            TaskStatus::Pending | TaskStatus::Running => {}
        }
    }

    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }
}
