//! Run 调度：调用方把 Run 投递到队列，分发任务为每个 Run 派生一个 tokio 任务，
//! Semaphore 限制同时推进的 Run 数
//!
//! 不同 Run 之间没有共享的可变状态（各自的状态机只存在于自己的任务里），
//! 一个 Run 的重试退避只阻塞它自己的任务。
//! 同一个 Run 同时只有一个任务在推进：任务进行中再投递同一 run_id 会直接以错误通知拒绝。
//! 取消令牌触发后不再分发新任务，正在推进的 Run 在下一个 await 点被放弃，
//! 已落库的进度保留，之后可以用 `start` 继续。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, Orchestrator};
use crate::store::RunStatus;

/// 一个 Run 任务结束（完成、暂停、失败或被取消）后的通知
#[derive(Debug, Clone)]
pub struct RunNotification {
    pub run_id: i64,
    /// Err 为意外错误的描述；None 表示任务在完成前被取消
    pub result: Option<Result<RunStatus, String>>,
}

#[derive(Debug)]
enum Job {
    Start(i64),
    Approval {
        run_id: i64,
        approved: bool,
        reason: String,
    },
}

impl Job {
    fn run_id(&self) -> i64 {
        match self {
            Job::Start(id) => *id,
            Job::Approval { run_id, .. } => *run_id,
        }
    }
}

/// Run 调度器
pub struct RunScheduler {
    jobs_tx: mpsc::UnboundedSender<Job>,
    cancel: CancellationToken,
}

impl RunScheduler {
    /// workers：同时推进的 Run 上限（至少 1）。需在 tokio 运行时内调用。
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        workers: usize,
    ) -> (Self, mpsc::UnboundedReceiver<RunNotification>) {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let permits = Arc::new(Semaphore::new(workers.max(1)));

        tokio::spawn(dispatch(
            orchestrator,
            jobs_rx,
            notify_tx,
            permits,
            cancel.clone(),
        ));
        (Self { jobs_tx, cancel }, notify_rx)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 停止调度：不再分发新任务，进行中的任务尽快退出
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// 投递一个 Run，从其持久化位置推进
    pub fn submit(&self, run_id: i64) -> Result<(), AgentError> {
        self.enqueue(Job::Start(run_id))
    }

    /// 投递一个审批决定，批准时继续推进
    pub fn submit_approval(&self, run_id: i64, approved: bool, reason: String) -> Result<(), AgentError> {
        self.enqueue(Job::Approval {
            run_id,
            approved,
            reason,
        })
    }

    fn enqueue(&self, job: Job) -> Result<(), AgentError> {
        let run_id = job.run_id();
        self.jobs_tx
            .send(job)
            .map_err(|_| AgentError::Store(format!("scheduler stopped, run {run_id} not queued")))
    }
}

/// 正在推进的 run_id 集合
#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<HashSet<i64>>>);

impl InFlight {
    /// 登记成功返回守卫，守卫释放时移除；已在推进中返回 None
    fn claim(&self, run_id: i64) -> Option<InFlightGuard> {
        let mut set = self.0.lock().unwrap_or_else(|e| e.into_inner());
        set.insert(run_id).then(|| InFlightGuard {
            set: self.clone(),
            run_id,
        })
    }
}

struct InFlightGuard {
    set: InFlight,
    run_id: i64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.set.0.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.run_id);
    }
}

async fn dispatch(
    orchestrator: Arc<Orchestrator>,
    mut jobs_rx: mpsc::UnboundedReceiver<Job>,
    notify_tx: mpsc::UnboundedSender<RunNotification>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    let in_flight = InFlight::default();
    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = jobs_rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        let run_id = job.run_id();
        let Some(guard) = in_flight.claim(run_id) else {
            tracing::warn!(run_id, "Run already in progress, rejecting job");
            let _ = notify_tx.send(RunNotification {
                run_id,
                result: Some(Err(format!("run {run_id} is already in progress"))),
            });
            continue;
        };
        tracing::debug!(run_id, "Dispatching run");
        tokio::spawn(run_job(
            Arc::clone(&orchestrator),
            job,
            guard,
            notify_tx.clone(),
            Arc::clone(&permits),
            cancel.clone(),
        ));
    }
    tracing::info!("Run dispatcher stopped");
}

async fn run_job(
    orchestrator: Arc<Orchestrator>,
    job: Job,
    guard: InFlightGuard,
    notify_tx: mpsc::UnboundedSender<RunNotification>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    let run_id = job.run_id();
    let work = async {
        let _permit = permits.acquire_owned().await.ok()?;
        let outcome = match job {
            Job::Start(id) => orchestrator.start(id).await,
            Job::Approval {
                run_id,
                approved,
                reason,
            } => {
                orchestrator
                    .resume_after_approval(run_id, approved, &reason)
                    .await
            }
        };
        Some(outcome.map_err(|e| e.to_string()))
    };
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        outcome = work => outcome,
    };
    match &result {
        Some(Ok(status)) => tracing::info!(run_id, status = %status, "Run task finished"),
        Some(Err(e)) => tracing::error!(run_id, error = %e, "Run task failed"),
        None => tracing::warn!(run_id, "Run task cancelled"),
    }
    // 先释放登记再通知，收到通知的调用方可以立即重新投递
    drop(guard);
    let _ = notify_tx.send(RunNotification { run_id, result });
}
