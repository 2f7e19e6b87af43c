//! PDF rendering for printable documents.
//!
//! Everything uses the builtin Helvetica fonts so rendering needs no font
//! files at runtime. Layout is a simple top-down cursor over A4 pages.

use chrono::{DateTime, Utc};
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference};
use rust_decimal::Decimal;

use crate::error::ApiError;
use crate::models::billing::{Budget, BudgetItem, Payment};
use crate::models::clinical::Prescription;
use crate::models::patient::Patient;

use super::RevenueRow;

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 20.0;
const BODY_WRAP: usize = 92;

struct PageWriter {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    cursor: f32,
}

impl PageWriter {
    fn new(title: &str) -> Result<Self, ApiError> {
        let (doc, page, layer) =
            PdfDocument::new(title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "content");
        let regular = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| ApiError::internal(format!("pdf font: {e}")))?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| ApiError::internal(format!("pdf font: {e}")))?;
        let layer = doc.get_page(page).get_layer(layer);
        Ok(Self { doc, layer, regular, bold, cursor: PAGE_HEIGHT - MARGIN })
    }

    fn ensure_room(&mut self, needed: f32) {
        if self.cursor - needed < MARGIN {
            let (page, layer) = self.doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "content");
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.cursor = PAGE_HEIGHT - MARGIN;
        }
    }

    fn line(&mut self, text: &str, size: f32, bold: bool) {
        let leading = size * 0.55;
        self.ensure_room(leading);
        let font = if bold { &self.bold } else { &self.regular };
        self.layer
            .use_text(text, size, Mm(MARGIN), Mm(self.cursor), font);
        self.cursor -= leading;
    }

    fn heading(&mut self, text: &str) {
        self.line(text, 16.0, true);
        self.gap(2.0);
    }

    fn label_value(&mut self, label: &str, value: &str) {
        self.line(&format!("{label}: {value}"), 10.0, false);
    }

    fn paragraph(&mut self, text: &str) {
        for raw_line in text.lines() {
            if raw_line.is_empty() {
                self.gap(2.0);
                continue;
            }
            for chunk in wrap_text(raw_line, BODY_WRAP) {
                self.line(&chunk, 10.0, false);
            }
        }
    }

    fn gap(&mut self, mm: f32) {
        self.cursor -= mm;
    }

    fn finish(self) -> Result<Vec<u8>, ApiError> {
        self.doc
            .save_to_bytes()
            .map_err(|e| ApiError::internal(format!("pdf render: {e}")))
    }
}

/// Greedy word wrap on a character budget. Helvetica is proportional, so the
/// budget is conservative rather than exact.
fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > max_chars {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

fn format_money(value: Decimal) -> String {
    format!("R$ {:.2}", value)
}

fn format_date(value: DateTime<Utc>) -> String {
    value.format("%d/%m/%Y").to_string()
}

/// Budget/quote for the patient to take home.
pub fn budget_pdf(
    clinic_name: &str,
    budget: &Budget,
    items: &[BudgetItem],
    patient: &Patient,
    dentist_name: &str,
) -> Result<Vec<u8>, ApiError> {
    let mut page = PageWriter::new("Orçamento")?;

    page.line(clinic_name, 12.0, true);
    page.gap(4.0);
    page.heading(&format!("Orçamento nº {}", budget.id));
    page.label_value("Paciente", &patient.name);
    if let Some(cpf) = &patient.cpf {
        page.label_value("CPF", cpf);
    }
    page.label_value("Dentista", dentist_name);
    page.label_value("Data", &format_date(budget.created_at));
    if let Some(valid_until) = budget.valid_until {
        page.label_value("Válido até", &format_date(valid_until));
    }
    if let Some(description) = &budget.description {
        page.gap(3.0);
        page.paragraph(description);
    }

    page.gap(5.0);
    page.line("Procedimentos", 11.0, true);
    page.gap(1.0);
    for item in items {
        let tooth = item
            .tooth
            .as_deref()
            .map(|t| format!(" (dente {t})"))
            .unwrap_or_default();
        page.line(
            &format!(
                "{}{}  x{}  {}  =  {}",
                item.procedure,
                tooth,
                item.quantity,
                format_money(item.unit_value),
                format_money(item.line_total()),
            ),
            10.0,
            false,
        );
    }

    page.gap(4.0);
    page.line(&format!("Total: {}", format_money(budget.total_value)), 12.0, true);

    if let Some(notes) = &budget.notes {
        page.gap(5.0);
        page.paragraph(notes);
    }

    page.finish()
}

/// Prescription, report, certificate or referral. Uses the snapshot fields
/// captured at issue time so reprints do not drift.
pub fn prescription_pdf(prescription: &Prescription, patient: &Patient) -> Result<Vec<u8>, ApiError> {
    let title = prescription.title.as_deref().unwrap_or(match prescription.kind.as_str() {
        "medical_report" => "Relatório",
        "certificate" => "Atestado",
        "referral" => "Encaminhamento",
        _ => "Receituário",
    });

    let mut page = PageWriter::new(title)?;

    if let Some(clinic) = &prescription.clinic_name {
        page.line(clinic, 12.0, true);
        page.gap(4.0);
    }
    page.heading(title);
    page.label_value("Paciente", &patient.name);
    if let Some(date) = prescription.prescription_date.or(Some(prescription.created_at)) {
        page.label_value("Data", &format_date(date));
    }
    if let Some(valid_until) = prescription.valid_until {
        page.label_value("Válido até", &format_date(valid_until));
    }

    if let Some(medications) = &prescription.medications {
        page.gap(5.0);
        page.line("Medicações", 11.0, true);
        page.gap(1.0);
        page.paragraph(medications);
    }

    page.gap(5.0);
    page.paragraph(&prescription.content);

    if let Some(diagnosis) = &prescription.diagnosis {
        page.gap(4.0);
        page.label_value("Diagnóstico", diagnosis);
    }

    page.gap(12.0);
    if let Some(dentist) = &prescription.dentist_name {
        page.line(dentist, 10.0, true);
    }
    if let Some(cro) = &prescription.dentist_cro {
        page.line(&format!("CRO {cro}"), 10.0, false);
    }

    if prescription.is_signed {
        page.gap(6.0);
        page.line("Documento assinado digitalmente", 8.0, false);
        if let (Some(signed_at), Some(thumbprint)) =
            (prescription.signed_at, &prescription.certificate_thumbprint)
        {
            page.line(
                &format!(
                    "Assinado em {} - certificado {}",
                    signed_at.format("%d/%m/%Y %H:%M"),
                    &thumbprint[..thumbprint.len().min(16)]
                ),
                8.0,
                false,
            );
        }
        if let Some(hash) = &prescription.signature_hash {
            page.line(&format!("SHA-256 {hash}"), 8.0, false);
        }
    }

    page.finish()
}

/// Receipt for a paid transaction.
pub fn payment_receipt_pdf(
    clinic_name: &str,
    payment: &Payment,
    patient: &Patient,
) -> Result<Vec<u8>, ApiError> {
    let mut page = PageWriter::new("Recibo")?;

    page.line(clinic_name, 12.0, true);
    page.gap(4.0);
    page.heading(&format!("Recibo nº {}", payment.id));
    page.label_value("Paciente", &patient.name);
    if let Some(cpf) = &patient.cpf {
        page.label_value("CPF", cpf);
    }
    if let Some(description) = &payment.description {
        page.label_value("Referente a", description);
    }
    if let (Some(n), Some(total)) = (payment.installment_number, payment.total_installments) {
        page.label_value("Parcela", &format!("{n}/{total}"));
    }
    if let Some(method) = &payment.payment_method {
        page.label_value("Forma de pagamento", method);
    }
    if let Some(paid_date) = payment.paid_date {
        page.label_value("Pago em", &format_date(paid_date));
    }

    page.gap(6.0);
    page.line(&format!("Valor: {}", format_money(payment.amount)), 14.0, true);

    page.finish()
}

/// Income versus expense per period, for the reports screen.
pub fn revenue_report_pdf(
    clinic_name: &str,
    period_label: &str,
    rows: &[RevenueRow],
) -> Result<Vec<u8>, ApiError> {
    let mut page = PageWriter::new("Relatório financeiro")?;

    page.line(clinic_name, 12.0, true);
    page.gap(4.0);
    page.heading("Relatório financeiro");
    page.label_value("Período", period_label);
    page.gap(5.0);

    page.line("Período | Receitas | Despesas | Resultado", 10.0, true);
    page.gap(1.0);

    let mut total_income = Decimal::ZERO;
    let mut total_expense = Decimal::ZERO;
    for row in rows {
        total_income += row.income;
        total_expense += row.expense;
        page.line(
            &format!(
                "{} | {} | {} | {}",
                row.label,
                format_money(row.income),
                format_money(row.expense),
                format_money(row.net()),
            ),
            10.0,
            false,
        );
    }

    page.gap(4.0);
    page.line(
        &format!(
            "Total | {} | {} | {}",
            format_money(total_income),
            format_money(total_expense),
            format_money(total_income - total_expense),
        ),
        11.0,
        true,
    );

    page.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_patient() -> Patient {
        Patient {
            id: 1,
            name: "Maria Souza".into(),
            cpf: Some("123.456.789-00".into()),
            rg: None,
            birth_date: None,
            gender: None,
            email: None,
            phone: None,
            cell_phone: None,
            address: None,
            number: None,
            complement: None,
            district: None,
            city: None,
            state: None,
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
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn wrap_text_respects_max_width() {
        let lines = wrap_text("uma linha bastante longa que precisa quebrar", 20);
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| l.len() <= 20));
    }

    #[test]
    fn wrap_text_keeps_short_lines_whole() {
        assert_eq!(wrap_text("curta", 80), vec!["curta".to_string()]);
    }

    #[test]
    fn budget_pdf_renders() {
        let budget = Budget {
            id: 42,
            patient_id: 1,
            dentist_id: 2,
            description: Some("Plano de tratamento".into()),
            total_value: "620.50".parse().unwrap(),
            items: serde_json::json!([]),
            status: "pending".into(),
            valid_until: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        };
        let items = vec![BudgetItem {
            procedure: "Restauração".into(),
            tooth: Some("16".into()),
            quantity: 1,
            unit_value: "320.50".parse().unwrap(),
        }];

        let bytes = budget_pdf("Clínica Sorriso", &budget, &items, &sample_patient(), "Dr. Silva")
            .unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn prescription_pdf_renders_long_content_across_pages() {
        let prescription = Prescription {
            id: 7,
            patient_id: 1,
            dentist_id: 2,
            kind: "prescription".into(),
            title: None,
            medications: Some("Amoxicilina 500mg - 1 cápsula de 8/8h por 7 dias".into()),
            content: "Tomar com alimentos.\n".repeat(120),
            diagnosis: None,
            valid_until: None,
            prescription_date: None,
            notes: None,
            clinic_name: Some("Clínica Sorriso".into()),
            dentist_name: Some("Dr. Silva".into()),
            dentist_cro: Some("SP-12345".into()),
            status: "issued".into(),
            issued_at: Some(Utc::now()),
            printed_at: None,
            print_count: 0,
            is_signed: false,
            signed_at: None,
            signed_by_id: None,
            certificate_thumbprint: None,
            signature_hash: None,
            signature: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        };

        let bytes = prescription_pdf(&prescription, &sample_patient()).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn revenue_report_pdf_renders() {
        let rows = vec![
            RevenueRow {
                label: "2024-05".into(),
                income: "1500.00".parse().unwrap(),
                expense: "400.00".parse().unwrap(),
            },
            RevenueRow {
                label: "2024-06".into(),
                income: "1800.00".parse().unwrap(),
                expense: "350.00".parse().unwrap(),
            },
        ];
        let bytes = revenue_report_pdf("Clínica Sorriso", "maio a junho de 2024", &rows).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }
}
