use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A treatment budget/quote (tenant schema). Item lines live in a JSONB
/// column; the stored total is always recomputed from them server-side.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Budget {
    pub id: i64,

    pub patient_id: i64,
    pub dentist_id: i64,

    pub description: Option<String>,
    pub total_value: Decimal,
    pub items: serde_json::Value, // array of BudgetItem

    pub status: String, // pending, approved, rejected, expired, cancelled
    pub valid_until: Option<DateTime<Utc>>,
    pub notes: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// One line of a budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetItem {
    pub procedure: String,
    #[serde(default)]
    pub tooth: Option<String>,
    pub quantity: u32,
    pub unit_value: Decimal,
}

impl BudgetItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_value * Decimal::from(self.quantity)
    }
}

/// Sum of all line totals.
pub fn items_total(items: &[BudgetItem]) -> Decimal {
    items.iter().map(BudgetItem::line_total).sum()
}

pub mod budget_status {
    pub const PENDING: &str = "pending";
    pub const APPROVED: &str = "approved";
    pub const REJECTED: &str = "rejected";
    pub const EXPIRED: &str = "expired";
    pub const CANCELLED: &str = "cancelled";

    pub const ALL: &[&str] = &[PENDING, APPROVED, REJECTED, EXPIRED, CANCELLED];

    pub fn is_valid(s: &str) -> bool {
        ALL.contains(&s)
    }
}

/// A financial transaction, usually an installment of a budget
/// (tenant schema).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: i64,

    pub budget_id: Option<i64>,
    pub patient_id: i64,

    pub kind: String, // income, expense
    pub category: Option<String>,
    pub description: Option<String>,
    pub amount: Decimal,

    pub payment_method: Option<String>, // cash, credit_card, debit_card, pix, transfer, insurance

    pub installment_number: Option<i32>,
    pub total_installments: Option<i32>,

    pub status: String, // pending, paid, overdue, cancelled
    pub due_date: Option<DateTime<Utc>>,
    pub paid_date: Option<DateTime<Utc>>,

    pub notes: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

pub mod payment_status {
    pub const PENDING: &str = "pending";
    pub const PAID: &str = "paid";
    pub const OVERDUE: &str = "overdue";
    pub const CANCELLED: &str = "cancelled";

    pub const ALL: &[&str] = &[PENDING, PAID, OVERDUE, CANCELLED];

    pub fn is_valid(s: &str) -> bool {
        ALL.contains(&s)
    }
}

/// A recurring Stripe plan sold to a patient (tenant schema). Kept in sync
/// by the Stripe webhook.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PatientSubscription {
    pub id: i64,
    pub patient_id: i64,

    pub stripe_subscription_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub stripe_price_id: Option<String>,

    pub product_name: Option<String>,
    pub price_amount: Option<i64>, // cents
    pub price_currency: Option<String>,
    pub billing_interval: Option<String>, // month, year, week

    pub status: String, // pending, active, past_due, canceled, unpaid
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,

    pub checkout_session_id: Option<String>,
    pub checkout_url: Option<String>,

    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// One invoice event for a patient subscription (tenant schema).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PatientSubscriptionPayment {
    pub id: i64,
    pub patient_subscription_id: i64,

    pub stripe_invoice_id: String,
    pub amount: i64, // cents
    pub currency: String,
    pub status: String, // paid, open, void, uncollectible

    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,

    pub invoice_url: Option<String>,
    pub failure_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn items_total_sums_line_totals() {
        let items = vec![
            BudgetItem {
                procedure: "Cleaning".into(),
                tooth: None,
                quantity: 2,
                unit_value: dec("150.00"),
            },
            BudgetItem {
                procedure: "Restoration".into(),
                tooth: Some("16".into()),
                quantity: 1,
                unit_value: dec("320.50"),
            },
        ];
        assert_eq!(items_total(&items), dec("620.50"));
    }

    #[test]
    fn empty_budget_totals_zero() {
        assert_eq!(items_total(&[]), Decimal::ZERO);
    }
}
