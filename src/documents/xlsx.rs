//! XLSX export of the revenue report.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};

use crate::error::ApiError;

use super::RevenueRow;

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// One sheet: period rows plus a totals line.
pub fn revenue_report_xlsx(
    clinic_name: &str,
    period_label: &str,
    rows: &[RevenueRow],
) -> Result<Vec<u8>, ApiError> {
    let mut workbook = Workbook::new();
    fill_sheet(workbook.add_worksheet(), clinic_name, period_label, rows)
        .map_err(|e| ApiError::internal(format!("xlsx render: {e}")))?;
    workbook
        .save_to_buffer()
        .map_err(|e| ApiError::internal(format!("xlsx render: {e}")))
}

fn fill_sheet(
    sheet: &mut Worksheet,
    clinic_name: &str,
    period_label: &str,
    rows: &[RevenueRow],
) -> Result<(), XlsxError> {
    let bold = Format::new().set_bold();
    let money = Format::new().set_num_format("#,##0.00");
    let money_bold = Format::new().set_bold().set_num_format("#,##0.00");

    sheet.set_name("Financeiro")?;
    sheet.set_column_width(0, 18)?;
    for col in 1..=3 {
        sheet.set_column_width(col, 14)?;
    }

    sheet.write_string_with_format(0, 0, clinic_name, &bold)?;
    sheet.write_string(1, 0, period_label)?;

    sheet.write_string_with_format(3, 0, "Período", &bold)?;
    sheet.write_string_with_format(3, 1, "Receitas", &bold)?;
    sheet.write_string_with_format(3, 2, "Despesas", &bold)?;
    sheet.write_string_with_format(3, 3, "Resultado", &bold)?;

    let mut total_income = Decimal::ZERO;
    let mut total_expense = Decimal::ZERO;
    let mut row_idx: u32 = 4;
    for row in rows {
        total_income += row.income;
        total_expense += row.expense;
        sheet.write_string(row_idx, 0, &row.label)?;
        sheet.write_number_with_format(row_idx, 1, to_f64(row.income), &money)?;
        sheet.write_number_with_format(row_idx, 2, to_f64(row.expense), &money)?;
        sheet.write_number_with_format(row_idx, 3, to_f64(row.net()), &money)?;
        row_idx += 1;
    }

    sheet.write_string_with_format(row_idx, 0, "Total", &bold)?;
    sheet.write_number_with_format(row_idx, 1, to_f64(total_income), &money_bold)?;
    sheet.write_number_with_format(row_idx, 2, to_f64(total_expense), &money_bold)?;
    sheet.write_number_with_format(row_idx, 3, to_f64(total_income - total_expense), &money_bold)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revenue_report_produces_xlsx_bytes() {
        let rows = vec![RevenueRow {
            label: "2024-05".into(),
            income: "1500.00".parse().unwrap(),
            expense: "400.00".parse().unwrap(),
        }];
        let bytes = revenue_report_xlsx("Clínica Sorriso", "maio de 2024", &rows).unwrap();
        // XLSX is a zip container.
        assert_eq!(&bytes[..2], b"PK");
    }
}
