//! The conversion manager: a fixed pool of worker threads draining the
//! priority queue. Tasks are isolated from each other; pause, resume and
//! cancellation are cooperative; observers subscribe to progress,
//! completion and error events.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use time::OffsetDateTime;

use crate::converter::{
    list_slice_files, ConversionContext, ConversionParams, PipelineEnv, StructureSetSource,
};
use crate::error::TaskError;
use crate::modality::{self, KeywordTables, Modality};
use crate::queue::TaskQueue;
use crate::reader::SeriesReader;
use crate::task::{ConversionStats, ConversionTask, TaskId, TaskStatus};
use crate::transform::Transform;
use crate::volume::VolumeWriter;

/// How often workers re-check shutdown and pause while idle.
const POLL: Duration = Duration::from_millis(200);
const COMPLETION_POLL: Duration = Duration::from_millis(50);

/// The seams every task pipeline runs against, shared by all workers.
pub struct Collaborators {
    pub reader: Arc<dyn SeriesReader>,
    pub structures: Arc<dyn StructureSetSource>,
    pub writer: Arc<dyn VolumeWriter>,
    pub transform: Arc<dyn Transform>,
}

/// One task submission, as produced by the batch generator.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub input: Utf8PathBuf,
    pub output: Utf8PathBuf,
    /// `None` requests modality auto-detection at run time.
    pub modality: Option<Modality>,
    pub params: ConversionParams,
    pub priority: i32,
}

/// Counters snapshot for callers polling overall progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Tasks ever submitted to this manager.
    pub total: u64,
    pub workers: usize,
    pub paused: bool,
}

type ProgressFn = Box<dyn Fn(TaskId, f32, &str) + Send + Sync>;
type CompletionFn = Box<dyn Fn(&ConversionTask) + Send + Sync>;
type ErrorFn = Box<dyn Fn(TaskId, &str) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    progress: Vec<ProgressFn>,
    completion: Vec<CompletionFn>,
    error: Vec<ErrorFn>,
}

struct Shared {
    queue: TaskQueue,
    /// Pending and running tasks. Finalized tasks move to `completed`.
    tasks: Mutex<HashMap<TaskId, ConversionTask>>,
    completed: Mutex<HashMap<TaskId, ConversionTask>>,
    /// Per-task cancellation flags, shared with the running pipeline.
    cancel_flags: Mutex<HashMap<TaskId, Arc<AtomicBool>>>,
    stats: Mutex<ConversionStats>,
    next_id: AtomicU64,
    paused: Mutex<bool>,
    resumed: Condvar,
    shutdown: AtomicBool,
    subscribers: Mutex<Subscribers>,
    keywords: KeywordTables,
    collaborators: Collaborators,
}

pub struct ConversionManager {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ConversionManager {
    pub fn new(
        workers: NonZeroUsize,
        collaborators: Collaborators,
        keywords: KeywordTables,
    ) -> Self {
        let shared = Arc::new(Shared {
            queue: TaskQueue::new(),
            tasks: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashMap::new()),
            cancel_flags: Mutex::new(HashMap::new()),
            stats: Mutex::new(ConversionStats::default()),
            next_id: AtomicU64::new(1),
            paused: Mutex::new(false),
            resumed: Condvar::new(),
            shutdown: AtomicBool::new(false),
            subscribers: Mutex::new(Subscribers::default()),
            keywords,
            collaborators,
        });
        let handles = (0..workers.get())
            .map(|n| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("convert-worker-{n}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("spawning a worker thread")
            })
            .collect();
        tracing::info!(workers = workers.get(), "conversion manager started");
        Self {
            shared,
            workers: handles,
        }
    }

    pub fn add_task(
        &self,
        input: Utf8PathBuf,
        output: Utf8PathBuf,
        modality: Option<Modality>,
        params: ConversionParams,
        priority: i32,
    ) -> TaskId {
        let id = TaskId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let task = ConversionTask::new(id, input, output, modality, params, priority);
        let created = task.created;
        tracing::info!(task = %id, input = task.input.as_str(), priority, "task queued");
        self.shared
            .cancel_flags
            .lock()
            .unwrap()
            .insert(id, Arc::new(AtomicBool::new(false)));
        self.shared.tasks.lock().unwrap().insert(id, task);
        self.shared.queue.push(id, priority, created);
        id
    }

    pub fn add_batch(&self, specs: Vec<TaskSpec>) -> Vec<TaskId> {
        specs
            .into_iter()
            .map(|spec| {
                self.add_task(
                    spec.input,
                    spec.output,
                    spec.modality,
                    spec.params,
                    spec.priority,
                )
            })
            .collect()
    }

    /// Cancel one task. Pending tasks finalize as cancelled immediately;
    /// running tasks observe the flag at their next pipeline checkpoint.
    /// `false` when the task already finished or was never known.
    pub fn cancel_task(&self, id: TaskId) -> bool {
        if self.shared.queue.cancel(id) {
            finalize(&self.shared, id, Err(TaskError::Cancelled));
            return true;
        }
        let flag = self.shared.cancel_flags.lock().unwrap().get(&id).cloned();
        match flag {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                tracing::info!(task = %id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Snapshot of one task, live or finished.
    pub fn task_status(&self, id: TaskId) -> Option<ConversionTask> {
        if let Some(task) = self.shared.tasks.lock().unwrap().get(&id) {
            return Some(task.clone());
        }
        self.shared.completed.lock().unwrap().get(&id).cloned()
    }

    pub fn queue_status(&self) -> QueueStatus {
        let (pending, running) = {
            let tasks = self.shared.tasks.lock().unwrap();
            let running = tasks
                .values()
                .filter(|t| t.status == TaskStatus::Running)
                .count();
            (tasks.len() - running, running)
        };
        let stats = *self.shared.stats.lock().unwrap();
        QueueStatus {
            pending,
            running,
            completed: stats.completed,
            failed: stats.failed,
            cancelled: stats.cancelled,
            total: self.shared.next_id.load(Ordering::Relaxed) - 1,
            workers: self.workers.len(),
            paused: *self.shared.paused.lock().unwrap(),
        }
    }

    pub fn statistics(&self) -> ConversionStats {
        *self.shared.stats.lock().unwrap()
    }

    pub fn on_progress(&self, f: impl Fn(TaskId, f32, &str) + Send + Sync + 'static) {
        self.shared
            .subscribers
            .lock()
            .unwrap()
            .progress
            .push(Box::new(f));
    }

    pub fn on_completion(&self, f: impl Fn(&ConversionTask) + Send + Sync + 'static) {
        self.shared
            .subscribers
            .lock()
            .unwrap()
            .completion
            .push(Box::new(f));
    }

    pub fn on_error(&self, f: impl Fn(TaskId, &str) + Send + Sync + 'static) {
        self.shared
            .subscribers
            .lock()
            .unwrap()
            .error
            .push(Box::new(f));
    }

    /// Stop dispatching queued tasks. Tasks already picked up keep running.
    pub fn pause(&self) {
        *self.shared.paused.lock().unwrap() = true;
        tracing::info!("conversion paused");
    }

    pub fn resume(&self) {
        *self.shared.paused.lock().unwrap() = false;
        self.shared.resumed.notify_all();
        tracing::info!("conversion resumed");
    }

    /// Block until every submitted task reached a terminal state.
    /// `false` on timeout.
    pub fn wait_for_completion(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.shared.tasks.lock().unwrap().is_empty() {
                return true;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            std::thread::sleep(COMPLETION_POLL);
        }
    }

    /// Drop finished task records, keeping the `keep_recent` most recently
    /// completed ones.
    pub fn cleanup_completed(&self, keep_recent: usize) {
        let mut completed = self.shared.completed.lock().unwrap();
        if completed.len() <= keep_recent {
            return;
        }
        let mut entries: Vec<(TaskId, ConversionTask)> = completed.drain().collect();
        entries.sort_by_key(|(_, task)| task.completed);
        let keep = entries.split_off(entries.len() - keep_recent);
        let dropped = entries.len();
        completed.extend(keep);
        tracing::debug!(dropped, "cleaned up finished tasks");
    }

    /// Stop the workers and wait for them to exit. Running tasks finish
    /// first; queued tasks stay pending.
    pub fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        self.shared.resumed.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("a worker thread panicked");
            }
        }
    }
}

impl Drop for ConversionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared) {
    while !shared.shutdown.load(Ordering::Relaxed) {
        let Some(id) = shared.queue.pop_timeout(POLL) else {
            continue;
        };
        // Pause gate: hold the popped task until resumed or shut down.
        {
            let mut paused = shared.paused.lock().unwrap();
            while *paused && !shared.shutdown.load(Ordering::Relaxed) {
                let (guard, _) = shared.resumed.wait_timeout(paused, POLL).unwrap();
                paused = guard;
            }
        }
        if shared.shutdown.load(Ordering::Relaxed) {
            return;
        }
        process_task(shared, id);
    }
}

fn process_task(shared: &Shared, id: TaskId) {
    let Some((input, output, modality, params)) = ({
        let mut tasks = shared.tasks.lock().unwrap();
        tasks.get_mut(&id).map(|task| {
            task.status = TaskStatus::Running;
            task.started = Some(OffsetDateTime::now_utc());
            (
                task.input.clone(),
                task.output.clone(),
                task.modality,
                task.params.clone(),
            )
        })
    }) else {
        return;
    };
    let cancel_flag = shared
        .cancel_flags
        .lock()
        .unwrap()
        .get(&id)
        .cloned()
        .unwrap_or_default();
    tracing::info!(task = %id, input = input.as_str(), "task started");
    let outcome = run_pipeline(shared, id, &input, &output, modality, &params, &cancel_flag);
    finalize(shared, id, outcome);
}

fn run_pipeline(
    shared: &Shared,
    id: TaskId,
    input: &Utf8Path,
    output: &Utf8Path,
    modality: Option<Modality>,
    params: &ConversionParams,
    cancel_flag: &AtomicBool,
) -> Result<Vec<Utf8PathBuf>, TaskError> {
    let modality = match modality {
        Some(modality) => modality,
        None => detect_modality(shared, input)?,
    };
    let env = PipelineEnv {
        reader: &*shared.collaborators.reader,
        structures: &*shared.collaborators.structures,
        writer: &*shared.collaborators.writer,
        transform: &*shared.collaborators.transform,
    };
    let progress = |fraction: f32, message: &str| {
        if let Some(task) = shared.tasks.lock().unwrap().get_mut(&id) {
            task.progress = fraction;
        }
        let subscribers = shared.subscribers.lock().unwrap();
        for f in &subscribers.progress {
            if catch_unwind(AssertUnwindSafe(|| f(id, fraction, message))).is_err() {
                tracing::error!(task = %id, "progress subscriber panicked");
            }
        }
    };
    let ctx = ConversionContext::new(&progress, cancel_flag);
    modality.converter().convert(&env, input, output, params, &ctx)
}

/// Explicit header tag first, then path keywords, then the series
/// description. A file-less or unreadable input still gets a chance via its
/// path.
fn detect_modality(shared: &Shared, input: &Utf8Path) -> Result<Modality, TaskError> {
    let header = list_slice_files(input)
        .ok()
        .and_then(|files| files.first().cloned())
        .and_then(|file| shared.collaborators.reader.read_header(&file).ok());
    match header {
        Some(header) => modality::detect(
            Some(&header.modality),
            input.as_str(),
            &[&header.series_description],
            &shared.keywords,
        ),
        None => modality::detect(None, input.as_str(), &[], &shared.keywords),
    }
}

fn finalize(shared: &Shared, id: TaskId, outcome: Result<Vec<Utf8PathBuf>, TaskError>) {
    let Some(mut task) = shared.tasks.lock().unwrap().remove(&id) else {
        return;
    };
    shared.cancel_flags.lock().unwrap().remove(&id);
    task.completed = Some(OffsetDateTime::now_utc());
    match outcome {
        Ok(files) => {
            task.status = TaskStatus::Completed;
            task.progress = 1.0;
            task.result_files = files;
            tracing::info!(task = %id, files = task.result_files.len(), "task completed");
        }
        Err(TaskError::Cancelled) => {
            task.status = TaskStatus::Cancelled;
            tracing::info!(task = %id, "task cancelled");
        }
        Err(error) => {
            task.status = TaskStatus::Failed;
            let message = error.to_string();
            tracing::warn!(task = %id, error = message.as_str(), "task failed");
            let subscribers = shared.subscribers.lock().unwrap();
            for f in &subscribers.error {
                if catch_unwind(AssertUnwindSafe(|| f(id, &message))).is_err() {
                    tracing::error!(task = %id, "error subscriber panicked");
                }
            }
            task.error_message = Some(message);
        }
    }
    shared
        .stats
        .lock()
        .unwrap()
        .record(task.status, task.processing_time());
    {
        let subscribers = shared.subscribers.lock().unwrap();
        for f in &subscribers.completion {
            if catch_unwind(AssertUnwindSafe(|| f(&task))).is_err() {
                tracing::error!(task = %id, "completion subscriber panicked");
            }
        }
    }
    shared.completed.lock().unwrap().insert(id, task);
}
