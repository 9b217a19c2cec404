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

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use validator::{Validate, ValidationError, ValidationErrors};

/// 允许的日志级别
pub const VALID_LOG_LEVELS: [&str; 5] = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];

/// 配置错误
///
/// 加载失败或校验失败都会在启动/重载时同步返回给调用方，不做任何静默修正
#[derive(Error, Debug)]
pub enum SettingsError {
    /// 配置源读取或反序列化失败
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// 配置值不合法
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ValidationErrors),
}

/// 应用程序配置设置
///
/// 包含数据库、服务器、调度器、监控、清理、执行器与日志等所有配置项
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct Settings {
    /// 数据库配置
    pub database: DatabaseSettings,
    /// 服务器配置
    pub server: ServerSettings,
    /// 调度器配置
    #[validate(nested)]
    pub scheduler: SchedulerSettings,
    /// 清理配置
    #[validate(nested)]
    pub cleanup: CleanupSettings,
    /// 监控配置
    #[validate(nested)]
    pub monitor: MonitorSettings,
    /// 训练执行器配置
    #[validate(nested)]
    pub executor: ExecutorSettings,
    /// 日志配置
    #[validate(nested)]
    pub log: LogSettings,
}

/// 数据库配置设置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseSettings {
    /// 数据库连接URL
    pub url: String,
    /// 最大连接数
    pub max_connections: Option<u32>,
    /// 最小连接数
    pub min_connections: Option<u32>,
    /// 连接超时时间（秒）
    pub connect_timeout: Option<u64>,
    /// 空闲连接超时时间（秒）
    pub idle_timeout: Option<u64>,
}

/// 服务器配置设置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    /// 服务器监听主机地址
    pub host: String,
    /// 服务器监听端口
    pub port: u16,
}

/// 调度器配置设置
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_scheduler_settings"))]
pub struct SchedulerSettings {
    /// 最大并发任务数
    #[validate(range(min = 1))]
    pub max_concurrent_tasks: u32,
    /// 队列检查间隔（秒）
    #[validate(range(min = 1))]
    pub queue_check_interval_secs: u64,
    /// 单个任务执行超时（秒）
    #[validate(range(min = 60))]
    pub task_timeout_secs: u64,
    /// 最大重试次数
    #[validate(range(max = 100))]
    pub max_retry_count: u32,
    /// 重试基础延迟（秒），0 表示失败后立即重新可调度
    pub retry_delay_base_secs: u64,
    /// 重试延迟倍数
    #[validate(range(min = 1.0))]
    pub retry_delay_multiplier: f64,
    /// 重试延迟上限（秒）
    pub retry_delay_max_secs: u64,
    /// 排队任务数量上限
    #[validate(range(min = 1))]
    pub queue_size_limit: u64,
    /// 优先级级别数，合法优先级为 [1, priority_levels]
    #[validate(range(min = 1, max = 10))]
    pub priority_levels: i32,
    /// 默认优先级
    pub default_priority: i32,
    /// 停止时等待执行中任务的最长时间（秒），超时后中止剩余执行单元
    pub shutdown_grace_secs: u64,
}

/// 清理配置设置
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CleanupSettings {
    /// 清理间隔（秒）
    #[validate(range(min = 1))]
    pub interval_secs: u64,
    /// 终态记录保留时长（秒）
    #[validate(range(min = 1))]
    pub retention_secs: u64,
}

/// 监控配置设置
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct MonitorSettings {
    /// 是否启用监控循环
    pub enabled: bool,
    /// 指标采集间隔（秒）
    #[validate(range(min = 1))]
    pub interval_secs: u64,
    /// 排队长度告警阈值
    pub high_queue_threshold: u64,
    /// 失败率告警阈值（百分比）
    #[validate(range(min = 0.0, max = 100.0))]
    pub failure_rate_threshold: f64,
    /// 长时间运行告警阈值（秒），独立于执行超时
    #[validate(range(min = 1))]
    pub long_running_secs: u64,
    /// 最近完成/失败任务摘要保留条数
    #[validate(range(min = 1))]
    pub recent_limit: u64,
    /// 事件环形缓冲区容量
    #[validate(range(min = 1))]
    pub event_capacity: usize,
    /// 指标历史环形缓冲区容量
    #[validate(range(min = 1))]
    pub history_capacity: usize,
    /// Prometheus 监听地址，不设置则不导出
    pub metrics_addr: Option<String>,
}

/// 训练执行器配置设置
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ExecutorSettings {
    /// 远程训练服务地址
    #[validate(url)]
    pub base_url: String,
    /// 启动训练的接口路径
    pub train_path: String,
    /// 单次请求超时（秒）
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,
}

/// 日志配置设置
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LogSettings {
    /// 日志级别：DEBUG / INFO / WARNING / ERROR / CRITICAL
    #[validate(custom(function = "validate_log_level"))]
    pub level: String,
    /// 是否输出 JSON 格式日志
    pub json: bool,
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    if VALID_LOG_LEVELS.contains(&level.to_uppercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some(format!("log level must be one of {:?}", VALID_LOG_LEVELS).into());
        Err(err)
    }
}

fn validate_scheduler_settings(s: &SchedulerSettings) -> Result<(), ValidationError> {
    if s.default_priority < 1 || s.default_priority > s.priority_levels {
        let mut err = ValidationError::new("default_priority");
        err.message = Some(
            format!(
                "default_priority must be between 1 and {}",
                s.priority_levels
            )
            .into(),
        );
        return Err(err);
    }

    if s.retry_delay_max_secs < s.retry_delay_base_secs {
        let mut err = ValidationError::new("retry_delay_max_secs");
        err.message = Some("retry_delay_max_secs must be >= retry_delay_base_secs".into());
        return Err(err);
    }

    Ok(())
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 依次合并内置默认值、配置文件和环境变量，然后进行校验
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载并通过校验的配置
    /// * `Err(SettingsError)` - 加载或校验失败
    pub fn new() -> Result<Self, SettingsError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        let builder = Self::defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("TRAINQ")
                    .separator("__")
                    .try_parsing(true),
            );

        Self::load(builder)
    }

    /// 仅包含内置默认值的配置构建器
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, config::ConfigError> {
        Config::builder()
            .set_default("database.url", "sqlite://trainq.db?mode=rwc")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 1)?
            .set_default("database.connect_timeout", 10)?
            .set_default("database.idle_timeout", 300)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            // Scheduler
            .set_default("scheduler.max_concurrent_tasks", 1)?
            .set_default("scheduler.queue_check_interval_secs", 10)?
            .set_default("scheduler.task_timeout_secs", 3600)?
            .set_default("scheduler.max_retry_count", 3)?
            .set_default("scheduler.retry_delay_base_secs", 60)?
            .set_default("scheduler.retry_delay_multiplier", 2.0)?
            .set_default("scheduler.retry_delay_max_secs", 3600)?
            .set_default("scheduler.queue_size_limit", 100)?
            .set_default("scheduler.priority_levels", 10)?
            .set_default("scheduler.default_priority", 5)?
            .set_default("scheduler.shutdown_grace_secs", 30)?
            // Cleanup
            .set_default("cleanup.interval_secs", 300)?
            .set_default("cleanup.retention_secs", 7 * 24 * 3600)?
            // Monitor
            .set_default("monitor.enabled", true)?
            .set_default("monitor.interval_secs", 60)?
            .set_default("monitor.high_queue_threshold", 10)?
            .set_default("monitor.failure_rate_threshold", 20.0)?
            .set_default("monitor.long_running_secs", 2 * 3600)?
            .set_default("monitor.recent_limit", 10)?
            .set_default("monitor.event_capacity", 1000)?
            .set_default("monitor.history_capacity", 100)?
            // Executor
            .set_default("executor.base_url", "http://127.0.0.1:6677")?
            .set_default("executor.train_path", "/train")?
            .set_default("executor.request_timeout_secs", 30)?
            // Log
            .set_default("log.level", "INFO")?
            .set_default("log.json", false)
    }

    /// 从构建器反序列化并校验
    pub fn load(builder: ConfigBuilder<DefaultState>) -> Result<Self, SettingsError> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }
}

impl SchedulerSettings {
    pub fn queue_check_interval(&self) -> Duration {
        Duration::from_secs(self.queue_check_interval_secs)
    }

    pub fn task_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.task_timeout_secs as i64)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// 合法的优先级范围
    pub fn priority_range(&self) -> std::ops::RangeInclusive<i32> {
        1..=self.priority_levels
    }
}

impl CleanupSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention_secs as i64)
    }
}

impl MonitorSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// 可在运行时重载的共享配置
///
/// 新配置总是先通过校验再替换当前值；失败时旧配置继续生效
pub struct SharedSettings {
    current: RwLock<Arc<Settings>>,
}

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings)),
        }
    }

    /// 获取当前生效的配置快照
    pub fn current(&self) -> Arc<Settings> {
        self.current.read().clone()
    }

    /// 从配置文件与环境变量重新加载
    pub fn reload(&self) -> Result<Arc<Settings>, SettingsError> {
        match Settings::new() {
            Ok(settings) => Ok(self.swap(settings)),
            Err(e) => {
                warn!("Configuration reload rejected: {}", e);
                Err(e)
            }
        }
    }

    /// 在当前配置副本上应用修改，校验通过后替换
    pub fn update<F>(&self, apply: F) -> Result<Arc<Settings>, SettingsError>
    where
        F: FnOnce(&mut Settings),
    {
        let mut next = (*self.current()).clone();
        apply(&mut next);
        next.validate()?;
        Ok(self.swap(next))
    }

    fn swap(&self, settings: Settings) -> Arc<Settings> {
        let settings = Arc::new(settings);
        *self.current.write() = settings.clone();
        info!("Configuration updated");
        settings
    }
}

#[cfg(test)]
#[path = "settings_test.rs"]
mod tests;
