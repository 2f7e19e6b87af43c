//! Row structs shared by handlers and documents.
//!
//! Shared tables (`tenants`, `users`, `user_certificates`, `audit_logs`)
//! live in the `public` schema; everything else lives in the per-tenant
//! schema selected through `db::tenancy`.

pub mod appointment;
pub mod audit;
pub mod billing;
pub mod certificate;
pub mod clinical;
pub mod crm;
pub mod exam;
pub mod inventory;
pub mod patient;
pub mod tenant;
pub mod user;

pub use appointment::Appointment;
pub use audit::AuditLog;
pub use billing::{Budget, Payment, PatientSubscription, PatientSubscriptionPayment};
pub use certificate::UserCertificate;
pub use clinical::{MedicalRecord, Prescription};
pub use crm::{Lead, Task, WaitingListEntry};
pub use exam::Exam;
pub use inventory::{Product, StockMovement, Supplier};
pub use patient::Patient;
pub use tenant::Tenant;
pub use user::User;
