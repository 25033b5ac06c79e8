pub mod service;

pub use service::{BalanceSummary, WithdrawalService};
