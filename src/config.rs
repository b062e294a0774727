use chrono::Weekday;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};

/// engine configuration, one instance per tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub schedule: ScheduleConfig,
    pub delivery: DeliveryConfig,
    pub attention: AttentionConfig,
    pub cash_box: CashBoxConfig,
    pub settings: TenantSettings,
}

/// schedule generation rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// weekly rest day skipped when snapping due dates
    pub rest_day: Weekday,
    /// span assumed when a credit has no valid installment count
    pub default_span_days: i64,
}

/// delivery timing rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// days past the scheduled date before a delivery counts as overdue
    pub grace_days: i64,
}

/// thresholds for the requires-attention flag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionConfig {
    /// balance still above this share of the total after `stale_days`
    pub stale_balance_ratio: Rate,
    pub stale_days: i64,
    /// raise attention this many days before the schedule ends
    pub end_window_days: i64,
}

/// cash box reconciliation rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashBoxConfig {
    /// absolute difference tolerated before a close is flagged
    pub discrepancy_tolerance: Money,
}

/// tenant-scoped settings the engine consults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSettings {
    /// when false, credits are created at `default_interest_rate`
    pub allow_custom_interest: bool,
    pub default_interest_rate: Rate,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schedule: ScheduleConfig {
                rest_day: Weekday::Sun,
                default_span_days: 30,
            },
            delivery: DeliveryConfig { grace_days: 1 },
            attention: AttentionConfig {
                stale_balance_ratio: Rate::from_percentage(80),
                stale_days: 7,
                end_window_days: 3,
            },
            cash_box: CashBoxConfig {
                discrepancy_tolerance: Money::from_minor(1),
            },
            settings: TenantSettings {
                allow_custom_interest: true,
                default_interest_rate: Rate::from_percentage(20),
            },
        }
    }
}

impl EngineConfig {
    /// configuration with a different weekly rest day
    pub fn with_rest_day(rest_day: Weekday) -> Self {
        let mut config = Self::default();
        config.schedule.rest_day = rest_day;
        config
    }
}
