//! Generated documents: PDFs for printing, XLSX and CSV for exports.

pub mod csv;
pub mod pdf;
pub mod xlsx;

use rust_decimal::Decimal;

/// One aggregated line of the revenue report (a month, or a category).
#[derive(Debug, Clone)]
pub struct RevenueRow {
    pub label: String,
    pub income: Decimal,
    pub expense: Decimal,
}

impl RevenueRow {
    pub fn net(&self) -> Decimal {
        self.income - self.expense
    }
}
