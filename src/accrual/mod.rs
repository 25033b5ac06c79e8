pub mod client;

pub use client::{AccrualClient, AccrualOutcome, HttpAccrualClient};
#[cfg(test)]
pub use client::MockAccrualClient;
