// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 队列模块
///
/// 提供训练任务的准入接口（task_queue）与并发受限的调度器（scheduler）
pub mod scheduler;
pub mod task_queue;
