//! Ledger movement models
//!
//! A movement is an immutable, signed quantity change of one product. The
//! ledger is never edited: corrections are written as new, opposite-signed
//! movements.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ParseTagError;

/// Direction of a movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementOperation {
    Increment,
    Decrement,
}

impl MovementOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementOperation::Increment => "increment",
            MovementOperation::Decrement => "decrement",
        }
    }

    /// Operation matching the sign of `delta`; `None` for zero
    pub fn for_delta(delta: Decimal) -> Option<Self> {
        if delta > Decimal::ZERO {
            Some(MovementOperation::Increment)
        } else if delta < Decimal::ZERO {
            Some(MovementOperation::Decrement)
        } else {
            None
        }
    }
}

impl FromStr for MovementOperation {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "increment" => Ok(MovementOperation::Increment),
            "decrement" => Ok(MovementOperation::Decrement),
            _ => Err(ParseTagError::new("movement operation", s)),
        }
    }
}

/// Why stock moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementReason {
    Purchase,
    PurchaseReturn,
    Waste,
    StocktakingAdjustment,
    SaleConsumption,
    SaleReturn,
}

impl MovementReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementReason::Purchase => "purchase",
            MovementReason::PurchaseReturn => "purchase_return",
            MovementReason::Waste => "waste",
            MovementReason::StocktakingAdjustment => "stocktaking_adjustment",
            MovementReason::SaleConsumption => "sale_consumption",
            MovementReason::SaleReturn => "sale_return",
        }
    }

    /// Whether a movement with this reason may go in the given direction.
    /// Only stocktaking adjustments can go either way.
    pub fn allows(&self, operation: MovementOperation) -> bool {
        use MovementOperation::*;
        match self {
            MovementReason::Purchase | MovementReason::SaleReturn => operation == Increment,
            MovementReason::PurchaseReturn
            | MovementReason::Waste
            | MovementReason::SaleConsumption => operation == Decrement,
            MovementReason::StocktakingAdjustment => true,
        }
    }
}

impl FromStr for MovementReason {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(MovementReason::Purchase),
            "purchase_return" => Ok(MovementReason::PurchaseReturn),
            "waste" => Ok(MovementReason::Waste),
            "stocktaking_adjustment" => Ok(MovementReason::StocktakingAdjustment),
            "sale_consumption" => Ok(MovementReason::SaleConsumption),
            "sale_return" => Ok(MovementReason::SaleReturn),
            _ => Err(ParseTagError::new("movement reason", s)),
        }
    }
}

/// The business record a movement originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum MovementSource {
    PurchaseInvoice(Uuid),
    ReturnPurchaseInvoice(Uuid),
    Waste(Uuid),
    Stocktaking(Uuid),
    Order(Uuid),
    OrderReturn(Uuid),
}

impl MovementSource {
    pub fn type_str(&self) -> &'static str {
        match self {
            MovementSource::PurchaseInvoice(_) => "purchase_invoice",
            MovementSource::ReturnPurchaseInvoice(_) => "return_purchase_invoice",
            MovementSource::Waste(_) => "waste",
            MovementSource::Stocktaking(_) => "stocktaking",
            MovementSource::Order(_) => "order",
            MovementSource::OrderReturn(_) => "order_return",
        }
    }

    pub fn id(&self) -> Uuid {
        match *self {
            MovementSource::PurchaseInvoice(id)
            | MovementSource::ReturnPurchaseInvoice(id)
            | MovementSource::Waste(id)
            | MovementSource::Stocktaking(id)
            | MovementSource::Order(id)
            | MovementSource::OrderReturn(id) => id,
        }
    }

    /// Rebuild a source from its persisted `(type, id)` pair
    pub fn from_parts(source_type: &str, id: Uuid) -> Result<Self, ParseTagError> {
        match source_type {
            "purchase_invoice" => Ok(MovementSource::PurchaseInvoice(id)),
            "return_purchase_invoice" => Ok(MovementSource::ReturnPurchaseInvoice(id)),
            "waste" => Ok(MovementSource::Waste(id)),
            "stocktaking" => Ok(MovementSource::Stocktaking(id)),
            "order" => Ok(MovementSource::Order(id)),
            "order_return" => Ok(MovementSource::OrderReturn(id)),
            _ => Err(ParseTagError::new("movement source", source_type)),
        }
    }
}

/// A recorded ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub id: Uuid,
    /// Monotonic recording order, used to break timestamp ties
    pub sequence: i64,
    pub product_id: Uuid,
    pub delta: Decimal,
    pub operation: MovementOperation,
    pub reason: MovementReason,
    pub source: MovementSource,
    pub actor_id: Uuid,
    /// Product cost at the time the movement was recorded
    pub unit_cost: Decimal,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

/// A movement about to be appended to the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMovement {
    pub product_id: Uuid,
    pub delta: Decimal,
    pub operation: MovementOperation,
    pub reason: MovementReason,
    pub source: MovementSource,
    pub actor_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

/// Check that a movement is well formed: non-zero, with a delta sign that
/// agrees with both its operation and its reason.
pub fn check_movement(movement: &NewMovement) -> Result<(), &'static str> {
    match MovementOperation::for_delta(movement.delta) {
        None => Err("Movement delta cannot be zero"),
        Some(op) if op != movement.operation => {
            Err("Movement delta sign does not match its operation")
        }
        Some(op) if !movement.reason.allows(op) => {
            Err("Movement reason does not allow this direction")
        }
        Some(_) => Ok(()),
    }
}
