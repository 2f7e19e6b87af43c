//! Shared application state handed to every handler.

use crate::auth::JwtKeys;
use crate::config::AppConfig;
use crate::db::Database;
use crate::integrations::s3::ExamStorage;
use crate::integrations::stripe::StripeClient;
use crate::integrations::whatsapp::WhatsAppClient;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: AppConfig,
    pub jwt: JwtKeys,
    pub stripe: StripeClient,
    pub whatsapp: WhatsAppClient,
    pub storage: ExamStorage,
}
