//! Outbound third-party clients: Stripe billing, Meta WhatsApp Business,
//! S3 object storage.

pub mod s3;
pub mod stripe;
pub mod whatsapp;
