// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域服务模块
///
/// 定义外部协作方的抽象接口。训练执行器（training_executor）是一个不透明的
/// 异步操作，返回成功或失败以及可选的外部任务ID。
pub mod training_executor;
