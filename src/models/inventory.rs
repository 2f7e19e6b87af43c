use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An inventory item: dental material, medicine, equipment (tenant schema).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: i64,

    pub name: String,
    pub code: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>, // material, medicine, equipment, consumable

    pub supplier_id: Option<i64>,

    pub quantity: i32,
    pub minimum_stock: i32,
    pub unit: Option<String>, // un, kg, ml, box

    pub cost_price: Option<Decimal>,
    pub sale_price: Option<Decimal>,

    pub expiration_date: Option<NaiveDate>,
    pub barcode: Option<String>,
    pub active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A product supplier (tenant schema).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Supplier {
    pub id: i64,

    pub name: String,
    pub cnpj: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,

    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,

    pub active: bool,
    pub notes: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A stock entry/exit/adjustment (tenant schema). Applying a movement also
/// updates `products.quantity` in the same transaction.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StockMovement {
    pub id: i64,

    pub product_id: i64,
    pub kind: String, // entry, exit, adjustment
    pub quantity: i32,
    pub reason: Option<String>, // purchase, sale, loss, adjustment, usage

    pub user_id: i64,
    pub notes: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

pub mod movement_kind {
    pub const ENTRY: &str = "entry";
    pub const EXIT: &str = "exit";
    pub const ADJUSTMENT: &str = "adjustment";

    pub const ALL: &[&str] = &[ENTRY, EXIT, ADJUSTMENT];

    pub fn is_valid(s: &str) -> bool {
        ALL.contains(&s)
    }
}

/// Signed quantity delta a movement applies to the product.
/// Adjustments carry the delta directly and may be negative.
pub fn quantity_delta(kind: &str, quantity: i32) -> i32 {
    match kind {
        movement_kind::ENTRY => quantity,
        movement_kind::EXIT => -quantity,
        _ => quantity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_adds_and_exit_subtracts() {
        assert_eq!(quantity_delta("entry", 5), 5);
        assert_eq!(quantity_delta("exit", 5), -5);
        assert_eq!(quantity_delta("adjustment", -3), -3);
    }
}
