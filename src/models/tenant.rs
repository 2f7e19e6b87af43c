use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A dental clinic. One row per tenant, stored in `public.tenants`; the
/// tenant's own data lives in schema `tenant_<id>`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: i64,
    pub name: String,
    pub subdomain: String,

    pub email: String,
    pub phone: Option<String>,

    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,

    pub active: bool,

    // Subscription
    pub plan_type: String, // basic, professional, premium
    pub subscription_status: String, // trialing, active, past_due, cancelled, expired
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub patient_limit: i32,

    // Machine access (WhatsApp bots, external integrations)
    #[serde(skip_serializing)]
    pub api_key_hash: Option<String>,
    pub api_key_active: bool,
    pub api_key_created_at: Option<DateTime<Utc>>,
    pub api_key_expires_at: Option<DateTime<Utc>>,
    pub api_key_last_used_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Tenant {
    /// Active subscription means paid-up or still inside the trial window.
    pub fn subscription_is_active(&self, now: DateTime<Utc>) -> bool {
        match self.subscription_status.as_str() {
            "active" => true,
            "trialing" => self.trial_ends_at.map(|t| now < t).unwrap_or(false),
            _ => false,
        }
    }

    pub fn api_key_is_expired(&self, now: DateTime<Utc>) -> bool {
        self.api_key_expires_at.map(|t| now > t).unwrap_or(false)
    }
}

pub mod plan {
    pub const ALL: &[&str] = &["basic", "professional", "premium"];
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tenant(status: &str, trial_ends_at: Option<DateTime<Utc>>) -> Tenant {
        Tenant {
            id: 1,
            name: "Clinic".into(),
            subdomain: "clinic".into(),
            email: "clinic@example.com".into(),
            phone: None,
            address: None,
            city: None,
            state: None,
            zip_code: None,
            active: true,
            plan_type: "basic".into(),
            subscription_status: status.into(),
            stripe_customer_id: None,
            stripe_subscription_id: None,
            trial_ends_at,
            patient_limit: 1000,
            api_key_hash: None,
            api_key_active: false,
            api_key_created_at: None,
            api_key_expires_at: None,
            api_key_last_used_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn trialing_tenant_is_active_until_trial_end() {
        let now = Utc::now();
        let t = tenant("trialing", Some(now + Duration::days(3)));
        assert!(t.subscription_is_active(now));
        assert!(!t.subscription_is_active(now + Duration::days(4)));
    }

    #[test]
    fn cancelled_tenant_is_never_active() {
        let now = Utc::now();
        let t = tenant("cancelled", Some(now + Duration::days(30)));
        assert!(!t.subscription_is_active(now));
    }
}
