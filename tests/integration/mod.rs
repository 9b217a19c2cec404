// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod helpers;

mod monitor_api_test;
mod queue_api_test;
mod runtime_test;
mod scenarios_test;
