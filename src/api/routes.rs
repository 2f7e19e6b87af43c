//! Route table. Everything lives under `/api`; authentication happens in
//! the extractors, so public endpoints are simply the ones whose handlers
//! take neither `TenantContext` nor `ApiTenant`.

use actix_web::web;

use crate::api::handlers::{
    appointments, audit_logs, auth, budgets, certificates, exams, external, leads,
    medical_records, patient_subscriptions, patients, payments, prescriptions, products, reports,
    stock_movements,
    subscriptions, suppliers, tasks, tenants, waiting_list, webhooks, whatsapp,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(
                web::scope("/auth")
                    .route("/login", web::post().to(auth::login))
                    .route("/refresh", web::post().to(auth::refresh))
                    .route("/logout", web::post().to(auth::logout))
                    .route("/me", web::get().to(auth::me))
                    .route("/me", web::put().to(auth::update_profile))
                    .route("/me/password", web::put().to(auth::change_password)),
            )
            .service(
                web::scope("/tenants")
                    .route("/register", web::post().to(tenants::register))
                    .route("/settings", web::get().to(tenants::settings))
                    .route("/settings", web::put().to(tenants::update_settings))
                    .route("/api-key", web::post().to(tenants::generate_key))
                    .route("/api-key", web::get().to(tenants::key_status))
                    .route("/api-key/toggle", web::patch().to(tenants::toggle_key))
                    .route("/api-key", web::delete().to(tenants::revoke_key)),
            )
            .service(
                web::scope("/patients")
                    .route("/export", web::get().to(patients::export_csv))
                    .route("/import", web::post().to(patients::import_csv))
                    .route("", web::get().to(patients::list))
                    .route("", web::post().to(patients::create))
                    .route("/{id}", web::get().to(patients::get))
                    .route("/{id}", web::put().to(patients::update))
                    .route("/{id}", web::delete().to(patients::delete)),
            )
            .service(
                web::scope("/appointments")
                    .route("/export", web::get().to(appointments::export_csv))
                    .route("", web::get().to(appointments::list))
                    .route("", web::post().to(appointments::create))
                    .route("/{id}", web::get().to(appointments::get))
                    .route("/{id}", web::put().to(appointments::update))
                    .route("/{id}", web::delete().to(appointments::delete))
                    .route("/{id}/status", web::patch().to(appointments::set_status)),
            )
            .service(
                web::scope("/medical-records")
                    .route("", web::get().to(medical_records::list))
                    .route("", web::post().to(medical_records::create))
                    .route("/{id}", web::get().to(medical_records::get))
                    .route("/{id}", web::put().to(medical_records::update))
                    .route("/{id}", web::delete().to(medical_records::delete))
                    .route("/{id}/sign", web::post().to(medical_records::sign)),
            )
            .service(
                web::scope("/prescriptions")
                    .route("", web::get().to(prescriptions::list))
                    .route("", web::post().to(prescriptions::create))
                    .route("/{id}", web::get().to(prescriptions::get))
                    .route("/{id}", web::put().to(prescriptions::update))
                    .route("/{id}", web::delete().to(prescriptions::delete))
                    .route("/{id}/issue", web::post().to(prescriptions::issue))
                    .route("/{id}/print", web::post().to(prescriptions::print))
                    .route("/{id}/pdf", web::get().to(prescriptions::pdf))
                    .route("/{id}/sign", web::post().to(prescriptions::sign)),
            )
            .service(
                web::scope("/budgets")
                    .route("/export", web::get().to(budgets::export_csv))
                    .route("", web::get().to(budgets::list))
                    .route("", web::post().to(budgets::create))
                    .route("/{id}", web::get().to(budgets::get))
                    .route("/{id}", web::put().to(budgets::update))
                    .route("/{id}", web::delete().to(budgets::delete))
                    .route("/{id}/status", web::patch().to(budgets::set_status))
                    .route("/{id}/pdf", web::get().to(budgets::pdf)),
            )
            .service(
                web::scope("/payments")
                    .route("/export", web::get().to(payments::export_csv))
                    .route("/cash-flow", web::get().to(payments::cash_flow))
                    .route("/overdue", web::get().to(payments::overdue_summary))
                    .route("", web::get().to(payments::list))
                    .route("", web::post().to(payments::create))
                    .route("/{id}", web::get().to(payments::get))
                    .route("/{id}", web::put().to(payments::update))
                    .route("/{id}", web::delete().to(payments::delete))
                    .route("/{id}/status", web::patch().to(payments::set_status))
                    .route("/{id}/receipt", web::get().to(payments::receipt)),
            )
            .service(
                web::scope("/products")
                    .route("/export", web::get().to(products::export_csv))
                    .route("/import", web::post().to(products::import_csv))
                    .route("/low-stock", web::get().to(products::low_stock))
                    .route("", web::get().to(products::list))
                    .route("", web::post().to(products::create))
                    .route("/{id}", web::get().to(products::get))
                    .route("/{id}", web::put().to(products::update))
                    .route("/{id}", web::delete().to(products::delete)),
            )
            .service(
                web::scope("/suppliers")
                    .route("", web::get().to(suppliers::list))
                    .route("", web::post().to(suppliers::create))
                    .route("/{id}", web::get().to(suppliers::get))
                    .route("/{id}", web::put().to(suppliers::update))
                    .route("/{id}", web::delete().to(suppliers::delete)),
            )
            .service(
                web::scope("/stock-movements")
                    .route("/stats", web::get().to(stock_movements::stats))
                    .route("", web::get().to(stock_movements::list))
                    .route("", web::post().to(stock_movements::create)),
            )
            .service(
                web::scope("/exams")
                    .route("", web::get().to(exams::list))
                    .route("", web::post().to(exams::upload))
                    .route("/{id}", web::get().to(exams::get))
                    .route("/{id}", web::delete().to(exams::delete))
                    .route("/{id}/download", web::get().to(exams::download_url)),
            )
            .service(
                web::scope("/tasks")
                    .route("/pending-count", web::get().to(tasks::pending_count))
                    .route("", web::get().to(tasks::list))
                    .route("", web::post().to(tasks::create))
                    .route("/{id}", web::get().to(tasks::get))
                    .route("/{id}", web::put().to(tasks::update))
                    .route("/{id}", web::delete().to(tasks::delete))
                    .route("/{id}/status", web::patch().to(tasks::set_status)),
            )
            .service(
                web::scope("/leads")
                    .route("/stats", web::get().to(leads::stats))
                    .route("/check/{phone}", web::get().to(leads::check_phone))
                    .route("", web::get().to(leads::list))
                    .route("", web::post().to(leads::create))
                    .route("/{id}", web::get().to(leads::get))
                    .route("/{id}", web::put().to(leads::update))
                    .route("/{id}", web::delete().to(leads::delete))
                    .route("/{id}/status", web::patch().to(leads::set_status))
                    .route("/{id}/convert", web::post().to(leads::convert)),
            )
            .service(
                web::scope("/waiting-list")
                    .route("/stats", web::get().to(waiting_list::stats))
                    .route("", web::get().to(waiting_list::list))
                    .route("", web::post().to(waiting_list::create))
                    .route("/{id}", web::put().to(waiting_list::update))
                    .route("/{id}", web::delete().to(waiting_list::delete))
                    .route("/{id}/contact", web::post().to(waiting_list::contact))
                    .route("/{id}/schedule", web::post().to(waiting_list::schedule)),
            )
            .service(
                web::scope("/patient-subscriptions")
                    .route("", web::get().to(patient_subscriptions::list))
                    .route("", web::post().to(patient_subscriptions::create))
                    .route("/{id}", web::get().to(patient_subscriptions::get))
                    .route("/{id}/cancel", web::post().to(patient_subscriptions::cancel)),
            )
            .service(
                web::scope("/reports")
                    .route("/dashboard", web::get().to(reports::dashboard))
                    .route("/revenue", web::get().to(reports::revenue))
                    .route("/overdue", web::get().to(reports::overdue)),
            )
            .service(
                web::scope("/certificates")
                    .route("", web::get().to(certificates::list))
                    .route("", web::post().to(certificates::upload))
                    .route("/{id}", web::delete().to(certificates::delete))
                    .route("/{id}/activate", web::post().to(certificates::activate))
                    .route(
                        "/{id}/validate-password",
                        web::post().to(certificates::validate_password),
                    ),
            )
            .route(
                "/documents/{doc_type}/{id}/verify",
                web::get().to(certificates::verify_document),
            )
            .service(
                web::scope("/subscription")
                    .route("/plans", web::get().to(subscriptions::plans))
                    .route("/status", web::get().to(subscriptions::status))
                    .route("/checkout", web::post().to(subscriptions::checkout))
                    .route("/portal", web::post().to(subscriptions::portal))
                    .route("/cancel", web::post().to(subscriptions::cancel)),
            )
            .service(
                web::scope("/webhooks")
                    .route("/stripe/{tenant_id}", web::post().to(webhooks::stripe_webhook))
                    .route("/whatsapp", web::get().to(webhooks::whatsapp_verify))
                    .route(
                        "/whatsapp/{tenant_id}",
                        web::post().to(webhooks::whatsapp_inbound),
                    ),
            )
            .service(
                web::scope("/whatsapp")
                    .route("/templates", web::get().to(whatsapp::templates))
                    .route("/send", web::post().to(whatsapp::send_template))
                    .route(
                        "/appointments/{id}/confirmation",
                        web::post().to(whatsapp::send_appointment_confirmation),
                    ),
            )
            .service(
                web::scope("/external")
                    .route("/leads", web::post().to(external::create_lead))
                    .route("/leads/check/{phone}", web::get().to(external::check_phone)),
            )
            .route("/audit-logs", web::get().to(audit_logs::list)),
    );
}
