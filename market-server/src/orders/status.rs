//! Order and item state machines.
//!
//! Both lifecycles are closed enums with an explicit transition table; every
//! status write in the engine goes through [`OrderStatus::ensure_transition`]
//! or [`ItemStatus::ensure_transition`] (or a conditional SQL update that
//! encodes the same rule).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipping,
    Completed,
    Cancelled,
    Refunded,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Paid,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Expired,
}

impl OrderStatus {
    pub fn as_db(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Shipping => "shipping",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
            Self::Expired => "expired",
        }
    }

    pub fn from_db(s: &str) -> Result<Self, AppError> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "shipping" => Ok(Self::Shipping),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "refunded" => Ok(Self::Refunded),
            "expired" => Ok(Self::Expired),
            other => Err(AppError::internal(format!("unknown order status: {other}"))),
        }
    }

    pub fn can_transition(self, to: Self) -> bool {
        match self {
            Self::Pending => matches!(to, Self::Paid | Self::Cancelled | Self::Expired),
            Self::Paid => matches!(to, Self::Shipping | Self::Cancelled),
            Self::Shipping => matches!(to, Self::Completed | Self::Cancelled),
            Self::Completed => matches!(to, Self::Refunded),
            Self::Cancelled | Self::Refunded | Self::Expired => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Refunded | Self::Expired)
    }

    pub fn ensure_transition(self, to: Self) -> Result<(), AppError> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(AppError::validation(format!(
                "Invalid status transition from {self} to {to}"
            )))
        }
    }
}

impl ItemStatus {
    pub fn as_db(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn from_db(s: &str) -> Result<Self, AppError> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            other => Err(AppError::internal(format!("unknown item status: {other}"))),
        }
    }

    pub fn can_transition(self, to: Self) -> bool {
        match self {
            Self::Pending => matches!(to, Self::Paid | Self::Cancelled | Self::Expired),
            Self::Paid => matches!(to, Self::Processing | Self::Cancelled),
            Self::Processing => matches!(to, Self::Shipped | Self::Cancelled),
            Self::Shipped => matches!(to, Self::Delivered),
            Self::Delivered | Self::Cancelled | Self::Expired => false,
        }
    }

    pub fn ensure_transition(self, to: Self) -> Result<(), AppError> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(AppError::validation(format!(
                "Invalid status transition from {self} to {to}"
            )))
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db())
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_transitions() {
        use OrderStatus::*;
        assert!(Pending.can_transition(Paid));
        assert!(Pending.can_transition(Cancelled));
        assert!(Pending.can_transition(Expired));
        assert!(!Pending.can_transition(Shipping));
        assert!(!Pending.can_transition(Completed));

        assert!(Paid.can_transition(Shipping));
        assert!(Paid.can_transition(Cancelled));
        assert!(!Paid.can_transition(Completed));
        assert!(!Paid.can_transition(Refunded));
        assert!(!Paid.can_transition(Pending));
        assert!(!Paid.can_transition(Expired));

        assert!(Shipping.can_transition(Completed));
        assert!(Shipping.can_transition(Cancelled));
        assert!(!Shipping.can_transition(Refunded));

        assert!(Completed.can_transition(Refunded));
        assert!(!Completed.can_transition(Shipping));

        for terminal in [Cancelled, Refunded, Expired] {
            for target in [Pending, Paid, Shipping, Completed, Cancelled, Refunded, Expired] {
                assert!(!terminal.can_transition(target));
            }
            assert!(terminal.is_terminal());
        }
    }

    #[test]
    fn item_transitions() {
        use ItemStatus::*;
        assert!(Pending.can_transition(Paid));
        assert!(Pending.can_transition(Cancelled));
        assert!(Pending.can_transition(Expired));
        assert!(!Pending.can_transition(Shipped));

        assert!(Paid.can_transition(Processing));
        assert!(Paid.can_transition(Cancelled));
        assert!(!Paid.can_transition(Shipped));
        assert!(!Paid.can_transition(Delivered));

        assert!(Processing.can_transition(Shipped));
        assert!(Processing.can_transition(Cancelled));
        assert!(!Processing.can_transition(Delivered));

        assert!(Shipped.can_transition(Delivered));
        assert!(!Shipped.can_transition(Cancelled));

        for terminal in [Delivered, Cancelled, Expired] {
            for target in [Pending, Paid, Processing, Shipped, Delivered, Cancelled, Expired] {
                assert!(!terminal.can_transition(target));
            }
        }
    }

    #[test]
    fn round_trips_db_strings() {
        for s in ["pending", "paid", "shipping", "completed", "cancelled", "refunded", "expired"] {
            assert_eq!(OrderStatus::from_db(s).unwrap().as_db(), s);
        }
        assert!(OrderStatus::from_db("bogus").is_err());
        assert!(ItemStatus::from_db("shipping").is_err());
    }

    #[test]
    fn ensure_transition_message_names_both_states() {
        let err = OrderStatus::Completed.ensure_transition(OrderStatus::Pending).unwrap_err();
        assert!(err.to_string().contains("completed"));
        assert!(err.to_string().contains("pending"));
    }
}
