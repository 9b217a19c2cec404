// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::net::SocketAddr;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tracing::{info, warn};

static SYSTEM: Lazy<Mutex<System>> = Lazy::new(|| {
    let mut sys = System::new_with_specifics(
        RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything()),
    );
    sys.refresh_all();
    Mutex::new(sys)
});

/// 初始化指标系统
///
/// 配置了监听地址时启动 Prometheus HTTP 导出器；无论是否导出都会注册指标说明
///
/// # 参数
///
/// * `addr` - 导出器监听地址，例如 `0.0.0.0:9000`
pub fn init_metrics(addr: Option<&str>) -> anyhow::Result<()> {
    if let Some(addr) = addr {
        let addr: SocketAddr = addr.parse()?;
        // 端口被占用时只告警，不影响调度
        match PrometheusBuilder::new().with_http_listener(addr).install() {
            Ok(()) => info!("Metrics exporter listening on {}", addr),
            Err(e) => warn!("Failed to install Prometheus recorder: {}", e),
        }
    }

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!("trainq_tasks_enqueued_total", "Total number of queue entries admitted");
    describe_counter!("trainq_tasks_started_total", "Total number of execution attempts started");
    describe_counter!("trainq_tasks_completed_total", "Total number of entries completed");
    describe_counter!(
        "trainq_tasks_failed_total",
        "Total number of entries that exhausted their retries"
    );
    describe_counter!("trainq_tasks_retried_total", "Total number of attempts re-queued");
    describe_counter!("trainq_tasks_timed_out_total", "Total number of attempts that timed out");
    describe_counter!("trainq_tasks_cleaned_total", "Total number of terminal entries deleted");
    describe_gauge!("trainq_running_tasks", "Entries currently tracked as running");
    describe_gauge!("trainq_queue_length", "Entries currently queued");
    describe_gauge!("trainq_success_rate", "Completed entries as a percentage of all entries");
    describe_gauge!("trainq_failure_rate", "Failed entries as a percentage of all entries");
    describe_gauge!("system_cpu_usage_ratio", "Current CPU usage ratio (0.0 to 1.0)");
    describe_gauge!("system_memory_usage_ratio", "Current memory usage ratio (0.0 to 1.0)");
}

/// 采样系统资源使用率
///
/// # 返回值
///
/// `(cpu_usage_ratio, memory_usage_ratio)`，均在 0.0 - 1.0 之间
pub fn sample_system_usage() -> (f64, f64) {
    let mut sys = SYSTEM.lock();
    sys.refresh_cpu_all();
    sys.refresh_memory();

    let cpu = (sys.global_cpu_usage() / 100.0) as f64;
    let total_mem = sys.total_memory();
    let memory = if total_mem > 0 {
        sys.used_memory() as f64 / total_mem as f64
    } else {
        0.0
    };

    metrics::gauge!("system_cpu_usage_ratio").set(cpu);
    metrics::gauge!("system_memory_usage_ratio").set(memory);

    (cpu, memory)
}
