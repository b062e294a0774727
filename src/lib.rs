pub mod cashbox;
pub mod category;
pub mod config;
pub mod credit;
pub mod decimal;
pub mod engine;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod schedule;
pub mod types;

// re-export key types
pub use cashbox::{CashBalance, CloseOutcome};
pub use category::{default_categories, select_category, ClientCategory};
pub use config::EngineConfig;
pub use credit::Credit;
pub use decimal::{Money, Rate};
pub use engine::{ClientRecord, CounterCheck, LoanEngine};
pub use errors::{LedgerError, Result};
pub use events::{Event, EventStore, NotificationSink};
pub use ledger::{classify_payment, Payment};
pub use schedule::{calculate_end_date, generate_schedule, ScheduleEntry};
pub use types::{
    CashBoxId, CashBoxStatus, ClientId, CreditId, CreditStatus, InstallmentProjection,
    InstallmentStatus, PaymentApplication, PaymentClassification, PaymentId, PaymentMethod,
    PaymentStatus, Periodicity, UserId,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
