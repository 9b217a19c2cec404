// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工作器模块
///
/// 包括终态记录清理工作器与负责全部后台循环生命周期的调度运行时
pub mod cleanup_worker;
pub mod manager;
