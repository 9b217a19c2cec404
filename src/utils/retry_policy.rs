// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::SchedulerSettings;
use std::time::Duration;

/// 重试策略配置
///
/// 不带抖动的指数退避：第 n 次重试的延迟为 `min(base * multiplier^(n-1), max)`。
/// 初始退避为 0 时失败的记录立即重新可调度。
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 初始退避时间
    pub initial_backoff: Duration,
    /// 最大退避时间
    pub max_backoff: Duration,
    /// 退避乘数
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(3600),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 从调度器配置构建
    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        Self {
            initial_backoff: Duration::from_secs(settings.retry_delay_base_secs),
            max_backoff: Duration::from_secs(settings.retry_delay_max_secs),
            backoff_multiplier: settings.retry_delay_multiplier,
        }
    }

    /// 计算第 `retry` 次重试的退避时间，`retry` 从 1 开始
    pub fn calculate_backoff(&self, retry: u32) -> Duration {
        if self.initial_backoff.is_zero() {
            return Duration::ZERO;
        }

        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        // 限制最大退避时间
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// 以 chrono 表示的退避时间，供领域模型使用
    pub fn backoff_for(&self, retry: u32) -> chrono::Duration {
        chrono::Duration::milliseconds(self.calculate_backoff(retry).as_millis() as i64)
    }
}
