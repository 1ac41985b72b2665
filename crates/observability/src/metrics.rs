//! 路由指标记录模块
//!
//! 通过 `metrics` facade 记录投递结果，由 Prometheus exporter 导出。
//! 未安装 recorder 时所有调用均为空操作。

use std::time::Duration;

use metrics::{counter, histogram};

/// 记录一次投递尝试
pub fn record_delivery(destination: &str, success: bool, elapsed: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "cdc_router_deliveries_total",
        "destination" => destination.to_string(),
        "status" => status
    )
    .increment(1);

    histogram!(
        "cdc_router_delivery_duration_ms",
        "destination" => destination.to_string()
    )
    .record(elapsed.as_secs_f64() * 1000.0);
}

/// 记录引擎级错误 (规则评估失败)
pub fn record_routing_error() {
    counter!("cdc_router_routing_errors_total").increment(1);
}

/// 记录单次路由处理耗时
pub fn record_processing_time(elapsed: Duration) {
    histogram!("cdc_router_processing_time_ms").record(elapsed.as_secs_f64() * 1000.0);
}

/// 记录未注册的目标名称
pub fn record_destination_not_found(destination: &str) {
    counter!(
        "cdc_router_destination_not_found_total",
        "destination" => destination.to_string()
    )
    .increment(1);
}

/// 记录收到的变更
pub fn record_change_received(table: &str) {
    counter!("cdc_router_changes_total", "table" => table.to_string()).increment(1);
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    /// 样本数量
    pub fn count(&self) -> u64 {
        self.count
    }

    /// 均值
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// 标准差
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// 最小值
    pub fn min(&self) -> f64 {
        self.min
    }

    /// 最大值
    pub fn max(&self) -> f64 {
        self.max
    }

    /// 摘要
    pub fn summary(&self) -> StatsSummary {
        StatsSummary::from(self)
    }
}
