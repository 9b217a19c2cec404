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

use crate::config::settings::ExecutorSettings;
use crate::domain::services::training_executor::{
    ExecutorError, TrainingExecutor, TrainingOutcome, TrainingRequest,
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// 远程训练执行器
///
/// 通过 HTTP 调用远程训练服务启动训练，请求体为任务配置，
/// 响应为 `{"success": bool, "task_id": ..., "message": ...}`
pub struct RemoteTrainingExecutor {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteTrainingExecutor {
    /// 创建新的远程执行器
    ///
    /// # 参数
    ///
    /// * `settings` - 执行器配置
    ///
    /// # 返回值
    ///
    /// * `Ok(RemoteTrainingExecutor)` - 执行器实例
    /// * `Err(ExecutorError)` - HTTP 客户端构建失败
    pub fn new(settings: &ExecutorSettings) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("trainq/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        let endpoint = format!(
            "{}/{}",
            settings.base_url.trim_end_matches('/'),
            settings.train_path.trim_start_matches('/')
        );

        Ok(Self { client, endpoint })
    }

    /// 训练接口完整地址
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TrainingExecutor for RemoteTrainingExecutor {
    async fn execute(&self, request: TrainingRequest) -> Result<TrainingOutcome, ExecutorError> {
        debug!(
            queue_id = request.queue_id,
            project_id = request.project_id,
            endpoint = %self.endpoint,
            "Dispatching training request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExecutorError::Timeout
                } else {
                    ExecutorError::RequestFailed(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Rejected(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let outcome: TrainingOutcome = response.json().await?;
        if !outcome.success {
            return Err(ExecutorError::Rejected(
                outcome
                    .message
                    .unwrap_or_else(|| "training service reported failure".to_string()),
            ));
        }

        Ok(outcome)
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

#[cfg(test)]
#[path = "remote_executor_test.rs"]
mod tests;
