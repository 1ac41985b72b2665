//! # Routing
//!
//! 变更路由核心模块。
//!
//! 负责：
//! - 按注册顺序评估路由规则
//! - 将变更逐个投递到目标 destination，单个失败不影响其他目标
//! - 聚合部分失败、发布路由事件、记录投递指标

pub mod clock;
pub mod destinations;
pub mod engine;
pub mod error;
pub mod events;
pub mod factory;
pub mod handle;
pub mod metrics;
pub mod result;
pub mod rules;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use contracts::{ChangeRecord, DeliveryResult, Destination, DestinationType};
pub use destinations::{FileDestination, FileDestinationConfig, LogDestination};
pub use engine::{EngineConfig, RoutingEngine, RoutingEngineBuilder};
pub use error::RoutingError;
pub use events::RoutingEvent;
pub use factory::{create_destination_handle, create_engine, create_engine_with_clock};
pub use handle::DestinationHandle;
pub use metrics::{DestinationRoutingStats, OverallRoutingStats, RoutingMetrics};
pub use result::RoutingResult;
pub use rules::{
    BusinessHoursRule, ColumnValueRule, CompositeRule, CustomRule, DataSizeRule, FrequencyRule,
    OperationRule, PriorityRule, RoutingRule, TableRule, TimeWindowRule, build_rule,
};
pub use tokio_util::sync::CancellationToken;
