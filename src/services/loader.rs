//! Планировщик фоновой работы с пятью классами приоритета.
//!
//! Один рабочий task берёт самый приоритетный элемент (FIFO внутри класса),
//! выполняет его и отдаёт результат в handle. После элементов двух старших
//! классов делает короткую паузу, чтобы не забивать рантайм.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{ErrorKind, Failure};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
    Background,
}

impl Priority {
    fn yields_after(self) -> bool {
        matches!(self, Priority::Critical | Priority::High)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("task failed: {0}")]
    Failed(Failure),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task was cancelled before it ran")]
    Cancelled,
}

impl From<LoadError> for Failure {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::Failed(failure) => failure,
            other => Failure::new(ErrorKind::Application, other.to_string()),
        }
    }
}

/// Результат задачи из очереди. Разрешается, когда задача отработала,
/// упала или была снята с очереди.
pub struct LoadHandle<T> {
    rx: oneshot::Receiver<Result<T, LoadError>>,
}

impl<T> Future for LoadHandle<T> {
    type Output = Result<T, LoadError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(LoadError::Cancelled)))
    }
}

struct QueueItem {
    priority: Priority,
    seq: u64,
    job: BoxFuture<'static, ()>,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueueItem {}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueItem {
    // BinaryHeap - max-heap: наверху самый старший класс и самый ранний seq
    fn cmp(&self, other: &Self) -> Ordering {
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

#[derive(Default)]
struct Queue {
    heap: BinaryHeap<QueueItem>,
    next_seq: u64,
    running: Option<Priority>,
    completed: u64,
}

struct Shared {
    queue: Mutex<Queue>,
    wake: Notify,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub by_priority: BTreeMap<Priority, usize>,
    pub running: Option<Priority>,
    pub completed: u64,
}

pub struct PriorityLoader {
    shared: Arc<Shared>,
    worker: JoinHandle<()>,
}

impl PriorityLoader {
    /// Запускает рабочий task. Нужен работающий рантайм tokio.
    pub fn start(yield_delay: Duration) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            wake: Notify::new(),
        });
        let worker = tokio::spawn(run_worker(shared.clone(), yield_delay));
        Self { shared, worker }
    }

    pub fn enqueue<F, T>(&self, priority: Priority, task: F) -> LoadHandle<T>
    where
        F: Future<Output = Result<T, Failure>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job = async move {
            let outcome = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(failure)) => Err(LoadError::Failed(failure)),
                Err(panic) => Err(LoadError::Panicked(panic_message(panic.as_ref()))),
            };
            let _ = tx.send(outcome);
        }
        .boxed();

        {
            let mut queue = self.shared.lock();
            let seq = queue.next_seq;
            queue.next_seq += 1;
            queue.heap.push(QueueItem { priority, seq, job });
        }
        self.shared.wake.notify_one();
        LoadHandle { rx }
    }

    pub fn queue_status(&self) -> QueueStatus {
        let queue = self.shared.lock();
        let mut by_priority = BTreeMap::new();
        for item in queue.heap.iter() {
            *by_priority.entry(item.priority).or_insert(0) += 1;
        }
        QueueStatus {
            pending: queue.heap.len(),
            by_priority,
            running: queue.running,
            completed: queue.completed,
        }
    }

    /// Снимает с очереди всё, что ещё не начато. Их handle получают `Cancelled`.
    pub fn clear_queue(&self) -> usize {
        let dropped: Vec<QueueItem> = self.shared.lock().heap.drain().collect();
        debug!("Cleared {} queued tasks", dropped.len());
        dropped.len()
    }
}

impl Drop for PriorityLoader {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker(shared: Arc<Shared>, yield_delay: Duration) {
    loop {
        let next = {
            let mut queue = shared.lock();
            let item = queue.heap.pop();
            queue.running = item.as_ref().map(|i| i.priority);
            item
        };

        let Some(item) = next else {
            shared.wake.notified().await;
            continue;
        };

        debug!("Running {:?} task #{}", item.priority, item.seq);
        item.job.await;

        {
            let mut queue = shared.lock();
            queue.running = None;
            queue.completed += 1;
        }

        if item.priority.yields_after() {
            tokio::time::sleep(yield_delay).await;
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        warn!("Task panicked with a non-string payload");
        "unknown panic".to_string()
    }
}
