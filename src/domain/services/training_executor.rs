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

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 执行器错误类型
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// 请求失败
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// 执行器明确拒绝或返回失败
    #[error("Training rejected: {0}")]
    Rejected(String),
    /// 超时
    #[error("Timeout")]
    Timeout,
    /// 其他错误
    #[error("Other error: {0}")]
    Other(String),
}

/// 训练请求
#[derive(Debug, Clone, Serialize)]
pub struct TrainingRequest {
    /// 队列记录ID
    pub queue_id: i64,
    /// 项目ID
    pub project_id: i64,
    /// 第几次尝试，从 0 开始
    pub attempt: i32,
    /// 任务配置，原样透传
    pub task_config: serde_json::Value,
}

/// 训练响应
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TrainingOutcome {
    /// 是否成功启动
    pub success: bool,
    /// 外部任务ID
    #[serde(default)]
    pub task_id: Option<String>,
    /// 附加说明
    #[serde(default)]
    pub message: Option<String>,
}

/// 训练执行器特质
///
/// 调度器只关心成功/失败与可选的外部任务ID，所有错误都按可重试处理
#[async_trait]
pub trait TrainingExecutor: Send + Sync {
    /// 执行一次训练
    async fn execute(&self, request: TrainingRequest) -> Result<TrainingOutcome, ExecutorError>;

    /// 执行器名称
    fn name(&self) -> &'static str;
}
