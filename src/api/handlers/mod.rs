//! HTTP handlers, one module per resource.

pub mod appointments;
pub mod audit_logs;
pub mod auth;
pub mod budgets;
pub mod certificates;
pub mod exams;
pub mod external;
pub mod leads;
pub mod medical_records;
pub mod patient_subscriptions;
pub mod patients;
pub mod payments;
pub mod prescriptions;
pub mod products;
pub mod reports;
pub mod stock_movements;
pub mod subscriptions;
pub mod suppliers;
pub mod tasks;
pub mod tenants;
pub mod waiting_list;
pub mod webhooks;
pub mod whatsapp;

use actix_web::HttpResponse;
use serde::Deserialize;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

/// Shared pagination query parameters, capped server-side.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Pagination {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl Pagination {
    pub fn limit(&self) -> i64 {
        self.per_page.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        (self.page.unwrap_or(1).max(1) - 1) * self.limit()
    }
}

pub fn pdf_response(bytes: Vec<u8>, filename: &str) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("application/pdf")
        .insert_header((
            "Content-Disposition",
            format!("inline; filename=\"{filename}\""),
        ))
        .body(bytes)
}

pub fn csv_response(bytes: Vec<u8>, filename: &str) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{filename}\""),
        ))
        .body(bytes)
}

pub fn xlsx_response(bytes: Vec<u8>, filename: &str) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet")
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{filename}\""),
        ))
        .body(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_caps() {
        let p = Pagination { page: None, per_page: None };
        assert_eq!(p.limit(), 20);
        assert_eq!(p.offset(), 0);

        let p = Pagination { page: Some(3), per_page: Some(500) };
        assert_eq!(p.limit(), 100);
        assert_eq!(p.offset(), 200);

        let p = Pagination { page: Some(0), per_page: Some(0) };
        assert_eq!(p.limit(), 1);
        assert_eq!(p.offset(), 0);
    }
}
