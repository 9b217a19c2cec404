// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::SharedSettings;
use crate::domain::models::queue_entry::{FailureKind, QueueEntry, QueueStatus};
use crate::domain::repositories::queue_repository::QueueRepository;
use crate::domain::services::training_executor::{TrainingExecutor, TrainingRequest};
use crate::monitoring::task_monitor::TaskMonitor;
use crate::queue::task_queue::{QueueError, TaskQueueService};
use crate::utils::retry_policy::RetryPolicy;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// 一次尝试的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Completed { external_task_id: Option<String> },
    Failed(FailureKind),
}

/// 执行中的任务
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunningTask {
    pub queue_id: i64,
    pub project_id: i64,
    /// 本次尝试对应的 retry_count，用于区分同一记录的不同尝试
    pub retry_count: i32,
    pub started_at: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
    /// 已产生但写入存储失败的结果，由下一次超时检查重试
    #[serde(skip)]
    pub pending: Option<Settlement>,
}

/// 任务调度器
///
/// 进程内只构建一次，由运行时显式启动和停止。准入循环按配置的间隔轮询：
/// 未达到并发上限时取出下一条可调度记录，置为 running 后在独立的执行单元中调用训练执行器，
/// 同一循环中检查超时。执行单元句柄保存在 `JoinSet` 中，停止时逐一等待。
pub struct TaskScheduler {
    queue: Arc<TaskQueueService>,
    repository: Arc<dyn QueueRepository>,
    executor: Arc<dyn TrainingExecutor>,
    settings: Arc<SharedSettings>,
    monitor: Arc<TaskMonitor>,
    running: Mutex<HashMap<i64, RunningTask>>,
    in_flight: Mutex<JoinSet<()>>,
    shutdown: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskScheduler {
    /// 创建新的任务调度器实例
    ///
    /// # 参数
    ///
    /// * `queue` - 队列服务
    /// * `executor` - 训练执行器
    /// * `settings` - 共享配置，每个周期读取最新值
    /// * `monitor` - 任务监控器，用于记录生命周期事件
    pub fn new(
        queue: Arc<TaskQueueService>,
        executor: Arc<dyn TrainingExecutor>,
        settings: Arc<SharedSettings>,
        monitor: Arc<TaskMonitor>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            repository: queue.repository(),
            queue,
            executor,
            settings,
            monitor,
            running: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(JoinSet::new()),
            shutdown,
            loop_handle: Mutex::new(None),
        }
    }

    /// 启动调度循环
    ///
    /// 重复调用只会记录警告
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.loop_handle.lock();
        if handle.is_some() {
            warn!("Task scheduler is already running");
            return;
        }

        self.shutdown.send_replace(false);
        let mut stop = self.shutdown.subscribe();
        self.queue.set_scheduler_running(true);

        let scheduler = Arc::clone(self);
        *handle = Some(tokio::spawn(async move {
            info!("Task scheduler started");
            scheduler.recover_orphaned().await;

            loop {
                if *stop.borrow() {
                    break;
                }

                scheduler.run_cycle().await;

                let interval = scheduler
                    .settings
                    .current()
                    .scheduler
                    .queue_check_interval();
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stop.changed() => {}
                }
            }

            info!("Task scheduler loop exited");
        }));
    }

    /// 停止调度循环，并在宽限时间内等待执行单元结束
    pub async fn stop(&self) {
        let handle = self.loop_handle.lock().take();
        let Some(handle) = handle else {
            return;
        };

        self.shutdown.send_replace(true);
        if let Err(e) = handle.await {
            error!("Task scheduler loop terminated abnormally: {}", e);
        }

        self.drain(self.settings.current().scheduler.shutdown_grace())
            .await;
        self.queue.set_scheduler_running(false);
        info!("Task scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.loop_handle.lock().is_some()
    }

    /// 执行一个调度周期：先准入，再检查超时
    ///
    /// 任何单个任务的错误都只记录日志，不会中断循环
    pub async fn run_cycle(self: &Arc<Self>) {
        self.reap_finished();

        if let Err(e) = self.process_queue().await {
            error!("Error processing task queue: {}", e);
        }

        self.check_timeouts().await;
    }

    /// 准入一条记录
    ///
    /// # 返回值
    ///
    /// * `Ok(Some(id))` - 已启动执行的记录ID
    /// * `Ok(None)` - 达到并发上限、队列为空或记录已被其他操作修改
    /// * `Err(QueueError)` - 存储错误
    pub async fn process_queue(self: &Arc<Self>) -> Result<Option<i64>, QueueError> {
        let settings = self.settings.current();
        let limit = settings.scheduler.max_concurrent_tasks as usize;

        let running = self.running.lock().len();
        if running >= limit {
            debug!(running, limit, "Concurrency limit reached, skipping admission");
            return Ok(None);
        }

        let Some(entry) = self.queue.next_eligible().await? else {
            return Ok(None);
        };

        let now = Utc::now();
        let retry_count = entry.retry_count;
        let started = entry.start(now)?;

        if !self
            .repository
            .compare_and_update(&started, QueueStatus::Queued, retry_count)
            .await?
        {
            debug!(queue_id = started.id, "Entry changed before admission, skipping");
            return Ok(None);
        }

        let task = RunningTask {
            queue_id: started.id,
            project_id: started.project_id,
            retry_count,
            started_at: now,
            timeout_at: now + settings.scheduler.task_timeout(),
            pending: None,
        };
        let running = {
            let mut map = self.running.lock();
            map.insert(task.queue_id, task);
            map.len()
        };
        gauge!("trainq_running_tasks").set(running as f64);
        counter!("trainq_tasks_started_total").increment(1);

        info!(
            queue_id = started.id,
            project_id = started.project_id,
            retry_count,
            "Training task started"
        );
        self.monitor.record_task_event(
            "task_started",
            started.id,
            json!({ "project_id": started.project_id, "retry_count": retry_count }),
        );

        let queue_id = started.id;
        let scheduler = Arc::clone(self);
        self.in_flight
            .lock()
            .spawn(async move { scheduler.execute_entry(started).await });

        Ok(Some(queue_id))
    }

    async fn execute_entry(self: Arc<Self>, entry: QueueEntry) {
        let queue_id = entry.id;
        let retry_count = entry.retry_count;
        let request = TrainingRequest {
            queue_id,
            project_id: entry.project_id,
            attempt: retry_count,
            task_config: entry.task_config,
        };

        let settlement = match self.executor.execute(request).await {
            Ok(outcome) if outcome.success => Settlement::Completed {
                external_task_id: outcome.task_id,
            },
            Ok(outcome) => {
                let message = outcome.message.unwrap_or_else(|| {
                    format!("Executor {} reported failure", self.executor.name())
                });
                warn!(
                    queue_id,
                    executor = self.executor.name(),
                    "Training execution reported failure: {}",
                    message
                );
                Settlement::Failed(FailureKind::ExecutionFailure(message))
            }
            Err(e) => {
                warn!(
                    queue_id,
                    executor = self.executor.name(),
                    "Training execution failed: {}",
                    e
                );
                Settlement::Failed(FailureKind::ExecutionFailure(e.to_string()))
            }
        };

        if let Err(e) = self.settle(queue_id, retry_count, settlement, Utc::now()).await {
            error!(
                queue_id,
                "Failed to record training outcome, slot kept for retry: {}", e
            );
        }
    }

    /// 写入一次尝试的结果
    ///
    /// 写入成功，或存储显示该尝试已经结束时释放执行槽位；返回结果是否由本次写入生效。
    /// 存储出错时槽位保持占用，结果挂在 `RunningTask::pending` 上等待重试
    async fn settle(
        &self,
        queue_id: i64,
        retry_count: i32,
        settlement: Settlement,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        match self.persist(queue_id, retry_count, &settlement, now).await {
            Ok(applied) => {
                self.release(queue_id, retry_count);
                Ok(applied)
            }
            Err(e) => {
                if let Some(task) = self.running.lock().get_mut(&queue_id) {
                    if task.retry_count == retry_count {
                        task.pending = Some(settlement);
                    }
                }
                Err(e)
            }
        }
    }

    async fn persist(
        &self,
        queue_id: i64,
        retry_count: i32,
        settlement: &Settlement,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let Some(entry) = self.repository.find_by_id(queue_id).await? else {
            return Ok(false);
        };

        if entry.status != QueueStatus::Running || entry.retry_count != retry_count {
            warn!(
                queue_id,
                retry_count, "Discarding outcome of an attempt that is no longer running"
            );
            return Ok(false);
        }

        match settlement {
            Settlement::Completed { external_task_id } => {
                self.finish_success(entry, external_task_id.clone(), now)
                    .await
            }
            Settlement::Failed(failure) => Ok(self
                .apply_failure(entry, failure.clone(), now)
                .await?
                .is_some()),
        }
    }

    async fn finish_success(
        &self,
        entry: QueueEntry,
        external_task_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let retry_count = entry.retry_count;
        let completed = entry.complete(now, external_task_id)?;

        if !self
            .repository
            .compare_and_update(&completed, QueueStatus::Running, retry_count)
            .await?
        {
            warn!(
                queue_id = completed.id,
                "Discarding completion of an attempt that is no longer running"
            );
            return Ok(false);
        }

        counter!("trainq_tasks_completed_total").increment(1);
        info!(
            queue_id = completed.id,
            project_id = completed.project_id,
            external_task_id = completed.external_task_id.as_deref().unwrap_or(""),
            "Training task completed"
        );
        self.monitor.record_task_event(
            "task_completed",
            completed.id,
            json!({
                "project_id": completed.project_id,
                "external_task_id": completed.external_task_id,
                "execution_time_secs": completed.execution_time_secs(),
            }),
        );
        Ok(true)
    }

    /// 失败或超时后的重试判定
    ///
    /// 仍有重试次数时重新入队，否则进入 failed；写入只在记录仍处于本次尝试时生效
    async fn apply_failure(
        &self,
        entry: QueueEntry,
        failure: FailureKind,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>, QueueError> {
        let retry_count = entry.retry_count;
        let policy = RetryPolicy::from_settings(&self.settings.current().scheduler);
        let delay = policy.backoff_for((retry_count + 1).max(1) as u32);

        let next = entry.fail_attempt(now, &failure, delay)?;
        if !self
            .repository
            .compare_and_update(&next, QueueStatus::Running, retry_count)
            .await?
        {
            warn!(
                queue_id = next.id,
                "Discarding failure of an attempt that is no longer running"
            );
            return Ok(None);
        }

        if failure == FailureKind::Timeout {
            counter!("trainq_tasks_timed_out_total").increment(1);
            self.monitor.record_task_event(
                "task_timeout",
                next.id,
                json!({ "project_id": next.project_id, "retry_count": retry_count }),
            );
        }

        let error_message = next.error_message.clone().unwrap_or_default();
        match next.status {
            QueueStatus::Queued => {
                counter!("trainq_tasks_retried_total").increment(1);
                warn!(
                    queue_id = next.id,
                    retry_count = next.retry_count,
                    max_retries = next.max_retries,
                    "Training task re-queued: {}",
                    error_message
                );
                self.monitor.record_task_event(
                    "task_retry",
                    next.id,
                    json!({
                        "project_id": next.project_id,
                        "retry_count": next.retry_count,
                        "scheduled_at": next.scheduled_at,
                        "error": error_message,
                    }),
                );
            }
            _ => {
                counter!("trainq_tasks_failed_total").increment(1);
                error!(
                    queue_id = next.id,
                    retry_count = next.retry_count,
                    "Training task failed permanently: {}",
                    error_message
                );
                self.monitor.record_task_event(
                    "task_failed",
                    next.id,
                    json!({
                        "project_id": next.project_id,
                        "retry_count": next.retry_count,
                        "error": error_message,
                    }),
                );
            }
        }

        Ok(Some(next))
    }

    /// 以当前时间检查超时
    pub async fn check_timeouts(&self) -> usize {
        self.check_timeouts_at(Utc::now()).await
    }

    /// 检查截止时间早于 `now` 的执行中任务，并重试写入失败的结果
    ///
    /// 超时只修改记录状态，不会取消仍在等待的执行器调用
    ///
    /// # 返回值
    ///
    /// 本次写入生效的尝试数量
    pub async fn check_timeouts_at(&self, now: DateTime<Utc>) -> usize {
        let due: Vec<(RunningTask, Settlement)> = self
            .running
            .lock()
            .values()
            .filter_map(|task| match &task.pending {
                Some(pending) => Some((task.clone(), pending.clone())),
                None if now > task.timeout_at => {
                    Some((task.clone(), Settlement::Failed(FailureKind::Timeout)))
                }
                None => None,
            })
            .collect();

        let mut handled = 0;
        for (task, settlement) in due {
            if task.pending.is_none() {
                warn!(
                    queue_id = task.queue_id,
                    project_id = task.project_id,
                    timeout_at = %task.timeout_at,
                    "Training task timed out"
                );
            }

            match self
                .settle(task.queue_id, task.retry_count, settlement, now)
                .await
            {
                Ok(true) => handled += 1,
                Ok(false) => {}
                Err(e) => error!(
                    queue_id = task.queue_id,
                    "Failed to settle attempt, slot kept for retry: {}", e
                ),
            }
        }

        handled
    }

    /// 处理上次进程退出时遗留的 running 记录
    ///
    /// 这些记录没有对应的执行单元，按一次失败的尝试处理
    async fn recover_orphaned(&self) {
        let orphaned = match self.repository.list_by_status(QueueStatus::Running).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Failed to load running entries on startup: {}", e);
                return;
            }
        };

        let tracked: Vec<i64> = self.running.lock().keys().copied().collect();
        for entry in orphaned.into_iter().filter(|e| !tracked.contains(&e.id)) {
            let queue_id = entry.id;
            let failure =
                FailureKind::ExecutionFailure("Scheduler restarted while task was running".into());
            if let Err(e) = self.apply_failure(entry, failure, Utc::now()).await {
                error!(queue_id, "Failed to recover orphaned entry: {}", e);
            }
        }
    }

    /// 从执行中映射移除指定尝试
    fn release(&self, queue_id: i64, retry_count: i32) {
        let running = {
            let mut map = self.running.lock();
            if map
                .get(&queue_id)
                .is_some_and(|task| task.retry_count == retry_count)
            {
                map.remove(&queue_id);
            }
            map.len()
        };
        gauge!("trainq_running_tasks").set(running as f64);
    }

    fn reap_finished(&self) {
        let mut set = self.in_flight.lock();
        while let Some(result) = set.try_join_next() {
            if let Err(e) = result {
                error!("Training execution unit panicked: {}", e);
            }
        }
    }

    /// 等待当前所有执行单元结束
    pub async fn wait_idle(&self) {
        loop {
            let mut set = std::mem::take(&mut *self.in_flight.lock());
            if set.is_empty() {
                break;
            }
            while let Some(result) = set.join_next().await {
                if let Err(e) = result {
                    error!("Training execution unit panicked: {}", e);
                }
            }
        }
    }

    /// 在 `grace` 内等待执行单元结束，超时后中止剩余单元
    ///
    /// 被中止的尝试在存储中仍为 running，由下一次启动时的遗留记录恢复处理。
    /// 返回是否全部正常结束
    pub async fn drain(&self, grace: std::time::Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let mut set = std::mem::take(&mut *self.in_flight.lock());
            if set.is_empty() {
                return true;
            }

            loop {
                match tokio::time::timeout_at(deadline, set.join_next()).await {
                    Ok(Some(Err(e))) => error!("Training execution unit panicked: {}", e),
                    Ok(Some(Ok(()))) => {}
                    Ok(None) => break,
                    Err(_) => {
                        warn!(
                            remaining = set.len(),
                            "Shutdown grace period elapsed, aborting training executions"
                        );
                        set.abort_all();
                        while set.join_next().await.is_some() {}
                        return false;
                    }
                }
            }
        }
    }

    /// 尚未结束的执行单元数量
    pub fn in_flight(&self) -> usize {
        self.reap_finished();
        self.in_flight.lock().len()
    }

    /// 执行中任务快照，按开始时间排序
    pub fn running_snapshot(&self) -> Vec<RunningTask> {
        let mut tasks: Vec<RunningTask> = self.running.lock().values().cloned().collect();
        tasks.sort_by_key(|t| (t.started_at, t.queue_id));
        tasks
    }
}

#[cfg(test)]
#[path = "scheduler_test.rs"]
mod tests;
