//! CSV export and import.
//!
//! Exports use a fixed column set per resource so spreadsheets stay stable.
//! Imports are lenient: each bad row is collected as an error and the rest
//! of the file is still processed.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::ApiError;
use crate::models::appointment::AppointmentListRow;
use crate::models::billing::{Budget, Payment};
use crate::models::inventory::Product;
use crate::models::patient::Patient;

/// Result of parsing an import file. `rows` are the usable records; `errors`
/// carry the line number and reason for everything that was skipped.
#[derive(Debug)]
pub struct ParseOutcome<T> {
    pub rows: Vec<T>,
    pub errors: Vec<String>,
}

/// Summary returned to the client after an import.
#[derive(Debug, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// A patient row accepted from an import file.
#[derive(Debug, Clone)]
pub struct PatientImport {
    pub name: String,
    pub cpf: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub cell_phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub city: Option<String>,
    pub state: Option<String>,
}

/// A product row accepted from an import file.
#[derive(Debug, Clone)]
pub struct ProductImport {
    pub name: String,
    pub code: Option<String>,
    pub category: Option<String>,
    pub quantity: i32,
    pub minimum_stock: i32,
    pub unit: Option<String>,
    pub cost_price: Option<Decimal>,
    pub sale_price: Option<Decimal>,
}

fn writer() -> csv::Writer<Vec<u8>> {
    csv::Writer::from_writer(Vec::new())
}

fn into_bytes(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>, ApiError> {
    writer
        .into_inner()
        .map_err(|e| ApiError::internal(format!("csv write: {e}")))
}

fn opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

pub fn export_patients(patients: &[Patient]) -> Result<Vec<u8>, ApiError> {
    let mut w = writer();
    w.write_record([
        "name", "cpf", "email", "phone", "cell_phone", "birth_date", "city", "state", "active",
    ])
    .map_err(|e| ApiError::internal(format!("csv write: {e}")))?;
    for p in patients {
        w.write_record([
            p.name.as_str(),
            opt(&p.cpf),
            opt(&p.email),
            opt(&p.phone),
            opt(&p.cell_phone),
            &p.birth_date.map(|d| d.to_string()).unwrap_or_default(),
            opt(&p.city),
            opt(&p.state),
            if p.active { "true" } else { "false" },
        ])
        .map_err(|e| ApiError::internal(format!("csv write: {e}")))?;
    }
    into_bytes(w)
}

pub fn export_products(products: &[Product]) -> Result<Vec<u8>, ApiError> {
    let mut w = writer();
    w.write_record([
        "name", "code", "category", "quantity", "minimum_stock", "unit", "cost_price", "sale_price",
    ])
    .map_err(|e| ApiError::internal(format!("csv write: {e}")))?;
    for p in products {
        w.write_record([
            p.name.as_str(),
            opt(&p.code),
            opt(&p.category),
            &p.quantity.to_string(),
            &p.minimum_stock.to_string(),
            opt(&p.unit),
            &p.cost_price.map(|v| v.to_string()).unwrap_or_default(),
            &p.sale_price.map(|v| v.to_string()).unwrap_or_default(),
        ])
        .map_err(|e| ApiError::internal(format!("csv write: {e}")))?;
    }
    into_bytes(w)
}

pub fn export_appointments(rows: &[AppointmentListRow]) -> Result<Vec<u8>, ApiError> {
    let mut w = writer();
    w.write_record([
        "patient", "dentist", "start_time", "end_time", "kind", "procedure", "status", "room",
    ])
    .map_err(|e| ApiError::internal(format!("csv write: {e}")))?;
    for row in rows {
        let a = &row.appointment;
        w.write_record([
            row.patient_name.as_str(),
            row.dentist_name.as_str(),
            &a.start_time.to_rfc3339(),
            &a.end_time.to_rfc3339(),
            opt(&a.kind),
            opt(&a.procedure),
            a.status.as_str(),
            opt(&a.room),
        ])
        .map_err(|e| ApiError::internal(format!("csv write: {e}")))?;
    }
    into_bytes(w)
}

pub fn export_budgets(budgets: &[Budget]) -> Result<Vec<u8>, ApiError> {
    let mut w = writer();
    w.write_record(["description", "total_value", "status", "valid_until", "created_at"])
        .map_err(|e| ApiError::internal(format!("csv write: {e}")))?;
    for b in budgets {
        w.write_record([
            opt(&b.description),
            &b.total_value.to_string(),
            b.status.as_str(),
            &b.valid_until.map(|d| d.to_rfc3339()).unwrap_or_default(),
            &b.created_at.to_rfc3339(),
        ])
        .map_err(|e| ApiError::internal(format!("csv write: {e}")))?;
    }
    into_bytes(w)
}

pub fn export_payments(payments: &[Payment]) -> Result<Vec<u8>, ApiError> {
    let mut w = writer();
    w.write_record([
        "kind", "category", "description", "amount", "payment_method", "status", "due_date",
        "paid_date",
    ])
    .map_err(|e| ApiError::internal(format!("csv write: {e}")))?;
    for p in payments {
        w.write_record([
            p.kind.as_str(),
            opt(&p.category),
            opt(&p.description),
            &p.amount.to_string(),
            opt(&p.payment_method),
            p.status.as_str(),
            &p.due_date.map(|d| d.to_rfc3339()).unwrap_or_default(),
            &p.paid_date.map(|d| d.to_rfc3339()).unwrap_or_default(),
        ])
        .map_err(|e| ApiError::internal(format!("csv write: {e}")))?;
    }
    into_bytes(w)
}

fn non_empty(record: &csv::StringRecord, idx: Option<usize>) -> Option<String> {
    idx.and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn header_index(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
}

/// Parse a patient import file. Header row is required; column order is not.
pub fn parse_patients(bytes: &[u8]) -> Result<ParseOutcome<PatientImport>, ApiError> {
    let mut reader = csv::Reader::from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| ApiError::validation(format!("unreadable csv: {e}")))?
        .clone();

    let name_idx = header_index(&headers, "name")
        .ok_or_else(|| ApiError::validation("missing required column: name"))?;
    let cpf_idx = header_index(&headers, "cpf");
    let email_idx = header_index(&headers, "email");
    let phone_idx = header_index(&headers, "phone");
    let cell_idx = header_index(&headers, "cell_phone");
    let birth_idx = header_index(&headers, "birth_date");
    let city_idx = header_index(&headers, "city");
    let state_idx = header_index(&headers, "state");

    let mut outcome = ParseOutcome { rows: Vec::new(), errors: Vec::new() };
    for (i, record) in reader.records().enumerate() {
        let line = i + 2; // 1-based, after the header
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                outcome.errors.push(format!("line {line}: {e}"));
                continue;
            }
        };

        let Some(name) = non_empty(&record, Some(name_idx)) else {
            outcome.errors.push(format!("line {line}: name is required"));
            continue;
        };

        let birth_date = match non_empty(&record, birth_idx) {
            Some(raw) => match parse_date(&raw) {
                Some(d) => Some(d),
                None => {
                    outcome
                        .errors
                        .push(format!("line {line}: invalid birth_date '{raw}'"));
                    continue;
                }
            },
            None => None,
        };

        outcome.rows.push(PatientImport {
            name,
            cpf: non_empty(&record, cpf_idx),
            email: non_empty(&record, email_idx),
            phone: non_empty(&record, phone_idx),
            cell_phone: non_empty(&record, cell_idx),
            birth_date,
            city: non_empty(&record, city_idx),
            state: non_empty(&record, state_idx),
        });
    }
    Ok(outcome)
}

/// Parse a product import file.
pub fn parse_products(bytes: &[u8]) -> Result<ParseOutcome<ProductImport>, ApiError> {
    let mut reader = csv::Reader::from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| ApiError::validation(format!("unreadable csv: {e}")))?
        .clone();

    let name_idx = header_index(&headers, "name")
        .ok_or_else(|| ApiError::validation("missing required column: name"))?;
    let code_idx = header_index(&headers, "code");
    let category_idx = header_index(&headers, "category");
    let quantity_idx = header_index(&headers, "quantity");
    let minimum_idx = header_index(&headers, "minimum_stock");
    let unit_idx = header_index(&headers, "unit");
    let cost_idx = header_index(&headers, "cost_price");
    let sale_idx = header_index(&headers, "sale_price");

    let mut outcome = ParseOutcome { rows: Vec::new(), errors: Vec::new() };
    for (i, record) in reader.records().enumerate() {
        let line = i + 2;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                outcome.errors.push(format!("line {line}: {e}"));
                continue;
            }
        };

        let Some(name) = non_empty(&record, Some(name_idx)) else {
            outcome.errors.push(format!("line {line}: name is required"));
            continue;
        };

        let quantity = match parse_number(&record, quantity_idx, 0) {
            Ok(v) => v,
            Err(raw) => {
                outcome
                    .errors
                    .push(format!("line {line}: invalid quantity '{raw}'"));
                continue;
            }
        };
        let minimum_stock = match parse_number(&record, minimum_idx, 0) {
            Ok(v) => v,
            Err(raw) => {
                outcome
                    .errors
                    .push(format!("line {line}: invalid minimum_stock '{raw}'"));
                continue;
            }
        };

        let cost_price = match parse_decimal(&record, cost_idx) {
            Ok(v) => v,
            Err(raw) => {
                outcome
                    .errors
                    .push(format!("line {line}: invalid cost_price '{raw}'"));
                continue;
            }
        };
        let sale_price = match parse_decimal(&record, sale_idx) {
            Ok(v) => v,
            Err(raw) => {
                outcome
                    .errors
                    .push(format!("line {line}: invalid sale_price '{raw}'"));
                continue;
            }
        };

        outcome.rows.push(ProductImport {
            name,
            code: non_empty(&record, code_idx),
            category: non_empty(&record, category_idx),
            quantity,
            minimum_stock,
            unit: non_empty(&record, unit_idx),
            cost_price,
            sale_price,
        });
    }
    Ok(outcome)
}

/// Accepts ISO (2024-05-31) and Brazilian (31/05/2024) dates.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d/%m/%Y"))
        .ok()
}

fn parse_number(record: &csv::StringRecord, idx: Option<usize>, default: i32) -> Result<i32, String> {
    match non_empty(record, idx) {
        Some(raw) => raw.parse().map_err(|_| raw),
        None => Ok(default),
    }
}

fn parse_decimal(
    record: &csv::StringRecord,
    idx: Option<usize>,
) -> Result<Option<Decimal>, String> {
    match non_empty(record, idx) {
        Some(raw) => raw.replace(',', ".").parse().map(Some).map_err(|_| raw),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_patients_collects_row_errors_without_aborting() {
        let csv = b"name,cpf,birth_date\n\
            Maria Souza,123.456.789-00,1990-05-31\n\
            ,missing-name,\n\
            Joao Lima,,31/12/1985\n\
            Ana Braga,,not-a-date\n";

        let outcome = parse_patients(csv).unwrap();
        assert_eq!(outcome.rows.len(), 2);
        assert_eq!(outcome.errors.len(), 2);
        assert_eq!(outcome.rows[0].name, "Maria Souza");
        assert_eq!(
            outcome.rows[1].birth_date,
            Some(NaiveDate::from_ymd_opt(1985, 12, 31).unwrap())
        );
        assert!(outcome.errors[0].contains("line 3"));
        assert!(outcome.errors[1].contains("line 5"));
    }

    #[test]
    fn parse_patients_requires_name_column() {
        let err = parse_patients(b"cpf,email\n123,a@b.c\n").unwrap_err();
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn parse_products_accepts_comma_decimals() {
        let csv = b"name,quantity,cost_price\nLuvas,10,\"12,50\"\n";
        let outcome = parse_products(csv).unwrap();
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.rows[0].cost_price, Some("12.50".parse().unwrap()));
    }

    fn sample_patient(id: i64, name: &str) -> crate::models::patient::Patient {
        crate::models::patient::Patient {
            id,
            name: name.into(),
            cpf: Some("123.456.789-00".into()),
            rg: None,
            birth_date: NaiveDate::from_ymd_opt(1990, 5, 31),
            gender: None,
            email: Some("maria@example.com".into()),
            phone: None,
            cell_phone: None,
            address: None,
            number: None,
            complement: None,
            district: None,
            city: Some("Campinas".into()),
            state: Some("SP".into()),
            zip_code: None,
            allergies: None,
            medications: None,
            systemic_diseases: None,
            blood_type: None,
            has_insurance: false,
            insurance_name: None,
            insurance_number: None,
            tags: None,
            active: true,
            notes: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn export_patients_round_trips_through_parse() {
        let patient = sample_patient(1, "Maria Souza");
        let bytes = export_patients(std::slice::from_ref(&patient)).unwrap();
        let outcome = parse_patients(&bytes).unwrap();
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.rows[0].name, "Maria Souza");
        assert_eq!(outcome.rows[0].city.as_deref(), Some("Campinas"));
    }

    #[test]
    fn export_survives_arbitrary_names() {
        use fake::faker::name::raw::Name;
        use fake::locales::PT_BR;
        use fake::Fake;

        let patients: Vec<_> = (0..50)
            .map(|i| sample_patient(i, &Name(PT_BR).fake::<String>()))
            .collect();
        let bytes = export_patients(&patients).unwrap();
        let outcome = parse_patients(&bytes).unwrap();
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.rows.len(), 50);
        for (row, patient) in outcome.rows.iter().zip(&patients) {
            assert_eq!(row.name, patient.name);
        }
    }
}
