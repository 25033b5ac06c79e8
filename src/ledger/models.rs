use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;
use uuid::Uuid;

/// Order status state machine
///
/// NEW → REGISTERED | PROCESSING → INVALID | PROCESSED
/// Terminal states (INVALID, PROCESSED) never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "order_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Registered => "REGISTERED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }

    /// Whether the state machine allows moving from `self` to `to`.
    /// Rewriting the current non-terminal status is allowed and harmless.
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        match self {
            OrderStatus::Invalid | OrderStatus::Processed => false,
            OrderStatus::New | OrderStatus::Registered | OrderStatus::Processing => {
                to != OrderStatus::New || *self == OrderStatus::New
            }
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Uploaded purchase order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub number: String,
    pub user_id: Uuid,
    pub status: OrderStatus,
    /// Meaningful only once the order is PROCESSED
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

impl Order {
    pub fn new(number: impl Into<String>, user_id: Uuid) -> Self {
        Self {
            number: number.into(),
            user_id,
            status: OrderStatus::New,
            accrual: None,
            uploaded_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Spendable points balance, one per user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub user_id: Uuid,
    pub current: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    pub fn zero(user_id: Uuid) -> Self {
        Self {
            user_id,
            current: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    pub fn covers(&self, amount: Decimal) -> bool {
        self.current >= amount
    }
}

/// One successful debit against a balance. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Order the points were spent against, not an order being credited
    pub order_number: String,
    pub amount: Decimal,
    pub processed_at: DateTime<Utc>,
}

/// Outcome of the atomic status + credit unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// Order moved to PROCESSED and the owner's balance was credited
    Credited { user_id: Uuid, amount: Decimal },
    /// Order was already terminal, nothing was written
    AlreadyTerminal,
}

/// Points are stored as NUMERIC(20, 2)
pub const AMOUNT_SCALE: u32 = 2;

/// Whether `amount` is representable in whole cents without rounding
pub fn is_whole_cents(amount: Decimal) -> bool {
    amount.normalize().scale() <= AMOUNT_SCALE
}

/// Round to cents the same way Postgres rounds a NUMERIC(_, 2) column
pub fn round_to_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Check an order number with the Luhn algorithm.
pub fn is_valid_order_number(number: &str) -> bool {
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let sum: u32 = number
        .bytes()
        .rev()
        .map(|b| u32::from(b - b'0'))
        .enumerate()
        .map(|(i, digit)| {
            if i % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                digit
            }
        })
        .sum();

    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luhn_validation() {
        assert!(is_valid_order_number("79927398713"));
        assert!(is_valid_order_number("4561261212345467"));
        assert!(!is_valid_order_number("79927398710"));
        assert!(!is_valid_order_number(""));
        assert!(!is_valid_order_number("7992 7398713"));
        assert!(!is_valid_order_number("abc"));
    }

    #[test]
    fn test_cent_precision() {
        use rust_decimal_macros::dec;

        assert!(is_whole_cents(dec!(500)));
        assert!(is_whole_cents(dec!(729.98)));
        assert!(is_whole_cents(dec!(1.500)));
        assert!(!is_whole_cents(dec!(0.005)));

        assert_eq!(round_to_cents(dec!(10.005)), dec!(10.01));
        assert_eq!(round_to_cents(dec!(10.004)), dec!(10.00));
        assert_eq!(round_to_cents(dec!(42)), dec!(42));
    }

    #[test]
    fn test_terminal_statuses_never_transition() {
        for to in [
            OrderStatus::New,
            OrderStatus::Registered,
            OrderStatus::Processing,
            OrderStatus::Invalid,
            OrderStatus::Processed,
        ] {
            assert!(!OrderStatus::Invalid.can_transition_to(to));
            assert!(!OrderStatus::Processed.can_transition_to(to));
        }

        assert!(OrderStatus::New.can_transition_to(OrderStatus::Registered));
        assert!(OrderStatus::Registered.can_transition_to(OrderStatus::Processed));
        assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Invalid));
        assert!(!OrderStatus::Processing.can_transition_to(OrderStatus::New));
    }

    #[test]
    fn test_status_wire_names() {
        let status: OrderStatus = serde_json::from_str("\"PROCESSING\"").unwrap();
        assert_eq!(status, OrderStatus::Processing);
        assert_eq!(serde_json::to_string(&OrderStatus::Processed).unwrap(), "\"PROCESSED\"");
        assert!(OrderStatus::Invalid.is_terminal());
        assert!(!OrderStatus::Registered.is_terminal());
    }
}
