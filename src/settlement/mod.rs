// Accrual settlement: applying accrual answers to orders and balances,
// and the background loop that keeps asking for them
pub mod coordinator;
pub mod scheduler;

pub use scheduler::{ReconciliationScheduler, SchedulerConfig};
