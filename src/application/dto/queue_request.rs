// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

/// 入队请求数据传输对象
#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct EnqueueRequestDto {
    /// 项目ID
    #[validate(range(min = 1))]
    pub project_id: i64,
    /// 优先级，数值越小越优先；缺省使用配置的默认优先级
    pub priority: Option<i32>,
    /// 透传给训练服务的任务配置
    pub task_config: Option<Value>,
}

/// 列表查询参数
#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct LimitQueryDto {
    #[validate(range(min = 1, max = 1000))]
    pub limit: Option<usize>,
}

impl LimitQueryDto {
    pub fn limit_or(&self, default: usize) -> usize {
        self.limit.unwrap_or(default)
    }
}

/// 取消响应
#[derive(Debug, Deserialize, Serialize)]
pub struct CancelResponseDto {
    pub id: i64,
    pub cancelled: bool,
}
