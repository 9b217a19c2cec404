// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域模型模块
///
/// 定义训练任务队列的核心实体：队列记录（queue_entry）及其状态机
pub mod queue_entry;
