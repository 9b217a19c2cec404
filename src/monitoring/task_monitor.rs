// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::config::settings::{MonitorSettings, SharedSettings};
use crate::domain::models::queue_entry::{QueueEntry, QueueStatus};
use crate::domain::repositories::queue_repository::{QueueRepository, RepositoryError};
use crate::infrastructure::metrics::sample_system_usage;
use chrono::{DateTime, Duration, Utc};
use metrics::gauge;
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, warn};

fn round2<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64((value * 100.0).round() / 100.0)
}

fn round2_opt<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => round2(v, serializer),
        None => serializer.serialize_none(),
    }
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// 已结束任务的摘要
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskSummary {
    pub queue_id: i64,
    pub project_id: i64,
    pub retry_count: i32,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(serialize_with = "round2_opt")]
    pub execution_time_secs: Option<f64>,
    pub error_message: Option<String>,
}

impl From<&QueueEntry> for TaskSummary {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            queue_id: entry.id,
            project_id: entry.project_id,
            retry_count: entry.retry_count,
            completed_at: entry.completed_at,
            execution_time_secs: entry.execution_time_secs(),
            error_message: entry.error_message.clone(),
        }
    }
}

/// 任务指标快照
#[derive(Debug, Clone, Serialize)]
pub struct TaskMetrics {
    pub collected_at: DateTime<Utc>,
    pub total_tasks: u64,
    pub queued_tasks: u64,
    pub running_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub cancelled_tasks: u64,
    /// 成功率（%）
    #[serde(serialize_with = "round2")]
    pub success_rate: f64,
    /// 失败率（%）
    #[serde(serialize_with = "round2")]
    pub failure_rate: f64,
    /// 已完成任务的平均排队时长（秒）
    #[serde(serialize_with = "round2")]
    pub avg_queue_time_secs: f64,
    /// 已完成任务的平均执行时长（秒）
    #[serde(serialize_with = "round2")]
    pub avg_execution_time_secs: f64,
    #[serde(serialize_with = "round2")]
    pub total_execution_time_secs: f64,
    /// 最近 24 小时的每小时完成数
    #[serde(serialize_with = "round2")]
    pub tasks_per_hour: f64,
    pub recent_completions: Vec<TaskSummary>,
    pub recent_failures: Vec<TaskSummary>,
}

/// 告警类型
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HighQueueLength,
    HighFailureRate,
    LongRunningTask,
    DatabaseUnreachable,
}

/// 告警级别
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// 告警
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
    pub severity: AlertSeverity,
}

/// 系统健康状态
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub scheduler_running: bool,
    pub database_connected: bool,
    pub last_health_check: DateTime<Utc>,
    pub uptime_seconds: i64,
    #[serde(serialize_with = "round2")]
    pub cpu_usage_ratio: f64,
    #[serde(serialize_with = "round2")]
    pub memory_usage_ratio: f64,
    pub high_queue_length: bool,
    pub long_running_tasks: bool,
    pub high_failure_rate: bool,
    pub alerts: Vec<Alert>,
}

impl SystemHealth {
    pub fn is_healthy(&self) -> bool {
        self.database_connected && self.alerts.is_empty()
    }
}

/// 监控事件
#[derive(Debug, Clone, Serialize)]
pub struct MonitorEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub data: serde_json::Value,
}

/// 性能概览
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub samples: usize,
    pub current: Option<TaskMetrics>,
    pub health: Option<SystemHealth>,
    #[serde(serialize_with = "round2")]
    pub avg_success_rate: f64,
    #[serde(serialize_with = "round2")]
    pub avg_failure_rate: f64,
    #[serde(serialize_with = "round2")]
    pub avg_queue_length: f64,
    pub peak_running_tasks: u64,
    pub event_counts: BTreeMap<String, usize>,
}

#[derive(Default)]
struct MonitorState {
    current: Option<TaskMetrics>,
    health: Option<SystemHealth>,
    history: VecDeque<TaskMetrics>,
    events: VecDeque<MonitorEvent>,
}

/// 任务监控器
///
/// 周期性地从队列存储汇总指标、探测存储健康并检测告警，
/// 指标快照与事件分别保存在有界环形缓冲区中，满时淘汰最旧的条目
pub struct TaskMonitor {
    repository: Arc<dyn QueueRepository>,
    settings: Arc<SharedSettings>,
    started_at: DateTime<Utc>,
    state: Mutex<MonitorState>,
}

impl TaskMonitor {
    pub fn new(repository: Arc<dyn QueueRepository>, settings: Arc<SharedSettings>) -> Self {
        Self {
            repository,
            settings,
            started_at: Utc::now(),
            state: Mutex::new(MonitorState::default()),
        }
    }

    /// 执行一次监控周期
    ///
    /// 采集失败时记录 `metrics_error` 事件，不向外传播错误
    pub async fn run_cycle(&self, scheduler_running: bool) {
        let now = Utc::now();
        let settings = self.settings.current().monitor.clone();

        let metrics = match self.collect_metrics_at(now, &settings).await {
            Ok(metrics) => {
                self.store_metrics(metrics.clone(), &settings);
                self.push_event(
                    "metrics_collected",
                    json!({
                        "total_tasks": metrics.total_tasks,
                        "queued_tasks": metrics.queued_tasks,
                        "running_tasks": metrics.running_tasks,
                    }),
                    &settings,
                );
                Some(metrics)
            }
            Err(e) => {
                error!("Failed to collect task metrics: {}", e);
                self.push_event("metrics_error", json!({ "error": e.to_string() }), &settings);
                None
            }
        };

        let health = self
            .check_health_at(now, scheduler_running, metrics.as_ref(), &settings)
            .await;
        for alert in &health.alerts {
            warn!(kind = ?alert.kind, severity = ?alert.severity, "{}", alert.message);
            self.push_event("alert", json!(alert), &settings);
        }
        self.state.lock().health = Some(health);
    }

    /// 汇总当前任务指标
    pub async fn collect_metrics(&self) -> Result<TaskMetrics, RepositoryError> {
        let settings = self.settings.current().monitor.clone();
        self.collect_metrics_at(Utc::now(), &settings).await
    }

    async fn collect_metrics_at(
        &self,
        now: DateTime<Utc>,
        settings: &MonitorSettings,
    ) -> Result<TaskMetrics, RepositoryError> {
        let counts = self.repository.count_by_status().await?;
        let count = |status: QueueStatus| counts.get(&status).copied().unwrap_or(0);

        let completed = count(QueueStatus::Completed);
        let failed = count(QueueStatus::Failed);
        let total: u64 = counts.values().sum();

        let completed_entries = self.repository.list_by_status(QueueStatus::Completed).await?;
        let queue_times: Vec<f64> = completed_entries
            .iter()
            .filter_map(QueueEntry::queue_time_secs)
            .collect();
        let execution_times: Vec<f64> = completed_entries
            .iter()
            .filter_map(QueueEntry::execution_time_secs)
            .collect();
        let total_execution_time: f64 = execution_times.iter().sum();

        let average = |values: &[f64]| {
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        };

        let completed_last_day = self
            .repository
            .count_completed_since(now - Duration::hours(24))
            .await?;

        let (recent_completions, recent_failures) = futures::try_join!(
            self.repository
                .recent_by_status(QueueStatus::Completed, settings.recent_limit),
            self.repository
                .recent_by_status(QueueStatus::Failed, settings.recent_limit),
        )?;

        Ok(TaskMetrics {
            collected_at: now,
            total_tasks: total,
            queued_tasks: count(QueueStatus::Queued),
            running_tasks: count(QueueStatus::Running),
            completed_tasks: completed,
            failed_tasks: failed,
            cancelled_tasks: count(QueueStatus::Cancelled),
            success_rate: percentage(completed, total),
            failure_rate: percentage(failed, total),
            avg_queue_time_secs: average(&queue_times),
            avg_execution_time_secs: average(&execution_times),
            total_execution_time_secs: total_execution_time,
            tasks_per_hour: completed_last_day as f64 / 24.0,
            recent_completions: recent_completions.iter().map(TaskSummary::from).collect(),
            recent_failures: recent_failures.iter().map(TaskSummary::from).collect(),
        })
    }

    /// 执行健康检查
    ///
    /// `metrics` 为空时重新采集一次用于阈值判断
    pub async fn check_health(&self, scheduler_running: bool) -> SystemHealth {
        let settings = self.settings.current().monitor.clone();
        self.check_health_at(Utc::now(), scheduler_running, None, &settings)
            .await
    }

    async fn check_health_at(
        &self,
        now: DateTime<Utc>,
        scheduler_running: bool,
        metrics: Option<&TaskMetrics>,
        settings: &MonitorSettings,
    ) -> SystemHealth {
        let mut alerts = Vec::new();

        let database_connected = match self.repository.ping().await {
            Ok(()) => true,
            Err(e) => {
                alerts.push(Alert {
                    kind: AlertKind::DatabaseUnreachable,
                    message: format!("Queue store is unreachable: {}", e),
                    severity: AlertSeverity::Critical,
                });
                false
            }
        };

        let fresh;
        let metrics = match metrics {
            Some(m) => Some(m),
            None if database_connected => {
                fresh = self.collect_metrics_at(now, settings).await.ok();
                fresh.as_ref()
            }
            None => None,
        };

        let mut high_queue_length = false;
        let mut high_failure_rate = false;
        if let Some(m) = metrics {
            if m.queued_tasks > settings.high_queue_threshold {
                high_queue_length = true;
                alerts.push(Alert {
                    kind: AlertKind::HighQueueLength,
                    message: format!(
                        "Queue length {} exceeds threshold {}",
                        m.queued_tasks, settings.high_queue_threshold
                    ),
                    severity: AlertSeverity::Warning,
                });
            }
            if m.failure_rate > settings.failure_rate_threshold {
                high_failure_rate = true;
                alerts.push(Alert {
                    kind: AlertKind::HighFailureRate,
                    message: format!(
                        "Failure rate {:.2}% exceeds threshold {:.2}%",
                        m.failure_rate, settings.failure_rate_threshold
                    ),
                    severity: AlertSeverity::Critical,
                });
            }
        }

        let mut long_running_tasks = false;
        if database_connected {
            match self.long_running_entries(now, settings).await {
                Ok(entries) => {
                    for entry in entries {
                        long_running_tasks = true;
                        alerts.push(Alert {
                            kind: AlertKind::LongRunningTask,
                            message: format!(
                                "Queue entry {} (project {}) has been running since {}",
                                entry.id,
                                entry.project_id,
                                entry
                                    .started_at
                                    .map(|t| t.to_rfc3339())
                                    .unwrap_or_default()
                            ),
                            severity: AlertSeverity::Warning,
                        });
                    }
                }
                Err(e) => debug!("Skipping long-running check: {}", e),
            }
        }

        let (cpu_usage_ratio, memory_usage_ratio) = sample_system_usage();

        SystemHealth {
            scheduler_running,
            database_connected,
            last_health_check: now,
            uptime_seconds: (now - self.started_at).num_seconds(),
            cpu_usage_ratio,
            memory_usage_ratio,
            high_queue_length,
            long_running_tasks,
            high_failure_rate,
            alerts,
        }
    }

    async fn long_running_entries(
        &self,
        now: DateTime<Utc>,
        settings: &MonitorSettings,
    ) -> Result<Vec<QueueEntry>, RepositoryError> {
        let threshold = Duration::seconds(settings.long_running_secs as i64);
        let running = self.repository.list_by_status(QueueStatus::Running).await?;
        Ok(running
            .into_iter()
            .filter(|e| e.started_at.is_some_and(|started| now - started > threshold))
            .collect())
    }

    fn store_metrics(&self, metrics: TaskMetrics, settings: &MonitorSettings) {
        gauge!("trainq_queue_length").set(metrics.queued_tasks as f64);
        gauge!("trainq_success_rate").set(metrics.success_rate);
        gauge!("trainq_failure_rate").set(metrics.failure_rate);

        let mut state = self.state.lock();
        state.history.push_back(metrics.clone());
        while state.history.len() > settings.history_capacity {
            state.history.pop_front();
        }
        state.current = Some(metrics);
    }

    fn push_event(&self, event_type: &str, data: serde_json::Value, settings: &MonitorSettings) {
        let mut state = self.state.lock();
        state.events.push_back(MonitorEvent {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            data,
        });
        while state.events.len() > settings.event_capacity {
            state.events.pop_front();
        }
    }

    /// 记录任务生命周期事件
    pub fn record_task_event(&self, event_type: &str, queue_id: i64, data: serde_json::Value) {
        let settings = self.settings.current();
        let data = match data {
            serde_json::Value::Object(mut map) => {
                map.insert("queue_id".to_string(), json!(queue_id));
                serde_json::Value::Object(map)
            }
            serde_json::Value::Null => json!({ "queue_id": queue_id }),
            other => json!({ "queue_id": queue_id, "detail": other }),
        };
        self.push_event(event_type, data, &settings.monitor);
    }

    /// 最近一次采集的指标
    pub fn current(&self) -> Option<TaskMetrics> {
        self.state.lock().current.clone()
    }

    /// 最近一次健康检查结果
    pub fn latest_health(&self) -> Option<SystemHealth> {
        self.state.lock().health.clone()
    }

    /// 最近 `limit` 条指标快照，按时间升序
    pub fn history(&self, limit: usize) -> Vec<TaskMetrics> {
        let state = self.state.lock();
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    /// 最近 `limit` 条事件，按时间升序
    pub fn recent_events(&self, limit: usize) -> Vec<MonitorEvent> {
        let state = self.state.lock();
        let skip = state.events.len().saturating_sub(limit);
        state.events.iter().skip(skip).cloned().collect()
    }

    /// 基于指标历史的性能概览
    pub fn performance_summary(&self) -> PerformanceSummary {
        let state = self.state.lock();
        let samples = state.history.len();
        let mean = |f: fn(&TaskMetrics) -> f64| {
            if samples == 0 {
                0.0
            } else {
                state.history.iter().map(f).sum::<f64>() / samples as f64
            }
        };

        let mut event_counts = BTreeMap::new();
        for event in &state.events {
            *event_counts.entry(event.event_type.clone()).or_insert(0) += 1;
        }

        PerformanceSummary {
            samples,
            current: state.current.clone(),
            health: state.health.clone(),
            avg_success_rate: mean(|m| m.success_rate),
            avg_failure_rate: mean(|m| m.failure_rate),
            avg_queue_length: mean(|m| m.queued_tasks as f64),
            peak_running_tasks: state
                .history
                .iter()
                .map(|m| m.running_tasks)
                .max()
                .unwrap_or(0),
            event_counts,
        }
    }
}

#[cfg(test)]
#[path = "task_monitor_test.rs"]
mod tests;
