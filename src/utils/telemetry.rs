// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::LogSettings;
use once_cell::sync::OnceCell;
use tracing::{info, warn};
use tracing_subscriber::{
    layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

/// 运行时可替换的日志过滤器句柄
static FILTER_HANDLE: OnceCell<reload::Handle<EnvFilter, Registry>> = OnceCell::new();

/// 将配置中的日志级别映射为 tracing 过滤指令
///
/// WARNING 对应 warn，CRITICAL 与 ERROR 都对应 error
pub fn level_directive(level: &str) -> &'static str {
    match level.to_uppercase().as_str() {
        "DEBUG" => "debug",
        "WARNING" => "warn",
        "ERROR" | "CRITICAL" => "error",
        _ => "info",
    }
}

/// 由配置生成的完整过滤指令
pub fn filter_directives(settings: &LogSettings) -> String {
    format!("{},sqlx=warn", level_directive(&settings.level))
}

/// 初始化日志
///
/// 设置了 `RUST_LOG` 时以环境变量为准，否则使用配置中的级别。
/// 输出格式（`log.json`）只在初始化时生效
pub fn init_telemetry(settings: &LogSettings) {
    let from_env = EnvFilter::try_from_default_env().ok();
    let env_controlled = from_env.is_some();
    let filter = from_env.unwrap_or_else(|| EnvFilter::new(filter_directives(settings)));

    let (filter, handle) = reload::Layer::new(filter);
    let registry = tracing_subscriber::registry().with(filter);
    if settings.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // RUST_LOG 优先于配置，不参与重载
    if !env_controlled {
        let _ = FILTER_HANDLE.set(handle);
    }
}

/// 按新配置替换日志级别
///
/// 返回是否生效；未初始化或由 `RUST_LOG` 控制时返回 false
pub fn reload_log_level(settings: &LogSettings) -> bool {
    let Some(handle) = FILTER_HANDLE.get() else {
        return false;
    };

    match handle.reload(EnvFilter::new(filter_directives(settings))) {
        Ok(()) => {
            info!(level = %settings.level, "Log level reloaded");
            true
        }
        Err(e) => {
            warn!("Failed to reload log level: {}", e);
            false
        }
    }
}
