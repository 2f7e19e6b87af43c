//! Digital signing of clinical documents.
//!
//! Dentists upload a PKCS#12 (A1) certificate; the bundle is stored
//! AES-256-GCM encrypted under a key derived from the certificate password
//! and a per-certificate random salt, so a database dump alone cannot
//! recover the private key. Signing hashes a canonical text rendering of the
//! document with SHA-256 and signs it with RSA PKCS#1 v1.5.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

use crate::error::ApiError;
use crate::models::clinical::{MedicalRecord, Prescription};

const NONCE_LEN: usize = 12;
pub const SALT_LEN: usize = 16;

/// Certificate facts extracted at upload time and kept in clear columns so
/// listings never need the password.
#[derive(Debug, Clone)]
pub struct CertificateMetadata {
    pub subject_cn: Option<String>,
    pub issuer_cn: Option<String>,
    pub serial_number: String,
    /// SHA-256 of the certificate DER, hex.
    pub thumbprint: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

/// A PKCS#12 bundle opened with its password.
pub struct ParsedCertificate {
    pub private_key_der: Vec<u8>,
    pub certificate_der: Vec<u8>,
    pub metadata: CertificateMetadata,
}

/// Output of a signing operation.
#[derive(Debug, Clone)]
pub struct SignatureBundle {
    /// SHA-256 of the canonical content, hex.
    pub content_hash: String,
    /// RSA PKCS#1 v1.5 signature, base64.
    pub signature: String,
}

/// Derive the AES-256 key for a stored bundle: SHA-256(password || salt).
pub fn derive_key(password: &str, salt: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt);
    hasher.finalize().into()
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    use rand::RngCore;
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// AES-256-GCM encrypt, random nonce prepended to the ciphertext.
pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, ApiError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| ApiError::internal("encryption failed"))?;
    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Inverse of [`encrypt`]. A wrong key surfaces as `Unauthorized` because it
/// means the caller supplied the wrong certificate password.
pub fn decrypt(key: &[u8; 32], blob: &[u8]) -> Result<Vec<u8>, ApiError> {
    if blob.len() <= NONCE_LEN {
        return Err(ApiError::validation("encrypted payload too short"));
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| ApiError::Unauthorized("invalid certificate password".into()))
}

/// Open a PKCS#12 bundle and pull out the key, the leaf certificate and its
/// metadata.
pub fn parse_pfx(bytes: &[u8], password: &str) -> Result<ParsedCertificate, ApiError> {
    let pfx = p12::PFX::parse(bytes)
        .map_err(|_| ApiError::validation("file is not a valid PKCS#12 bundle"))?;
    if !pfx.verify_mac(password) {
        return Err(ApiError::Unauthorized("invalid certificate password".into()));
    }

    let keys = pfx
        .key_bags(password)
        .map_err(|_| ApiError::validation("could not read private key from bundle"))?;
    let certs = pfx
        .cert_x509_bags(password)
        .map_err(|_| ApiError::validation("could not read certificate from bundle"))?;

    let private_key_der = keys
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::validation("bundle contains no private key"))?;
    let certificate_der = certs
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::validation("bundle contains no certificate"))?;

    // Reject bundles whose key material we cannot sign with later.
    RsaPrivateKey::from_pkcs8_der(&private_key_der)
        .map_err(|_| ApiError::validation("bundle private key is not RSA"))?;

    let metadata = certificate_metadata(&certificate_der)?;
    Ok(ParsedCertificate { private_key_der, certificate_der, metadata })
}

pub fn certificate_metadata(der: &[u8]) -> Result<CertificateMetadata, ApiError> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|_| ApiError::validation("malformed X.509 certificate"))?;

    let subject_cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);
    let issuer_cn = cert
        .issuer()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);

    let not_before = DateTime::from_timestamp(cert.validity().not_before.timestamp(), 0)
        .ok_or_else(|| ApiError::validation("certificate validity out of range"))?;
    let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
        .ok_or_else(|| ApiError::validation("certificate validity out of range"))?;

    Ok(CertificateMetadata {
        subject_cn,
        issuer_cn,
        serial_number: cert.raw_serial_as_string(),
        thumbprint: hex::encode(Sha256::digest(der)),
        not_before,
        not_after,
    })
}

/// Hash the canonical content and sign the digest input with RSA PKCS#1 v1.5
/// over SHA-256.
pub fn sign_content(private_key_der: &[u8], content: &str) -> Result<SignatureBundle, ApiError> {
    let key = RsaPrivateKey::from_pkcs8_der(private_key_der)
        .map_err(|_| ApiError::validation("stored private key is not RSA"))?;
    let signing_key = SigningKey::<Sha256>::new(key);
    let signature = signing_key.sign(content.as_bytes());
    Ok(SignatureBundle {
        content_hash: content_hash(content),
        signature: BASE64.encode(signature.to_vec()),
    })
}

/// SHA-256 of the canonical content, hex.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Check a stored signature against a certificate DER and the canonical
/// content it claims to cover.
pub fn verify_signature(
    certificate_der: &[u8],
    content: &str,
    signature_b64: &str,
) -> Result<bool, ApiError> {
    let (_, cert) = X509Certificate::from_der(certificate_der)
        .map_err(|_| ApiError::validation("malformed X.509 certificate"))?;
    let public_key = RsaPublicKey::from_public_key_der(cert.public_key().raw)
        .map_err(|_| ApiError::validation("certificate public key is not RSA"))?;

    let signature_bytes = BASE64
        .decode(signature_b64)
        .map_err(|_| ApiError::validation("signature is not valid base64"))?;
    let signature = match Signature::try_from(signature_bytes.as_slice()) {
        Ok(sig) => sig,
        Err(_) => return Ok(false),
    };

    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    Ok(verifying_key.verify(content.as_bytes(), &signature).is_ok())
}

fn push_field(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push(':');
    out.push_str(value);
    out.push('\n');
}

fn opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

/// Canonical text for a medical record. Field order is part of the signature
/// contract; changing it invalidates existing signatures.
pub fn medical_record_content(record: &MedicalRecord) -> String {
    let mut out = String::new();
    push_field(&mut out, "medical_record", &record.id.to_string());
    push_field(&mut out, "patient_id", &record.patient_id.to_string());
    push_field(&mut out, "dentist_id", &record.dentist_id.to_string());
    push_field(&mut out, "kind", opt(&record.kind));
    push_field(
        &mut out,
        "odontogram",
        &record
            .odontogram
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_default(),
    );
    push_field(&mut out, "diagnosis", opt(&record.diagnosis));
    push_field(&mut out, "treatment_plan", opt(&record.treatment_plan));
    push_field(&mut out, "procedure_done", opt(&record.procedure_done));
    push_field(&mut out, "materials", opt(&record.materials));
    push_field(&mut out, "evolution", opt(&record.evolution));
    push_field(&mut out, "notes", opt(&record.notes));
    push_field(&mut out, "created_at", &record.created_at.to_rfc3339());
    out
}

/// Canonical text for a prescription.
pub fn prescription_content(prescription: &Prescription) -> String {
    let mut out = String::new();
    push_field(&mut out, "prescription", &prescription.id.to_string());
    push_field(&mut out, "patient_id", &prescription.patient_id.to_string());
    push_field(&mut out, "dentist_id", &prescription.dentist_id.to_string());
    push_field(&mut out, "kind", &prescription.kind);
    push_field(&mut out, "title", opt(&prescription.title));
    push_field(&mut out, "medications", opt(&prescription.medications));
    push_field(&mut out, "content", &prescription.content);
    push_field(&mut out, "diagnosis", opt(&prescription.diagnosis));
    push_field(
        &mut out,
        "valid_until",
        &prescription
            .valid_until
            .map(|d| d.to_rfc3339())
            .unwrap_or_default(),
    );
    push_field(&mut out, "created_at", &prescription.created_at.to_rfc3339());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::EncodePrivateKey;

    fn test_key() -> RsaPrivateKey {
        // Small key keeps the test fast; production bundles carry 2048+.
        RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap()
    }

    #[test]
    fn derive_key_is_deterministic_and_salt_sensitive() {
        let a = derive_key("senha123", b"salt-one--------");
        let b = derive_key("senha123", b"salt-one--------");
        let c = derive_key("senha123", b"salt-two--------");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = derive_key("senha123", b"0123456789abcdef");
        let blob = encrypt(&key, b"pfx bytes").unwrap();
        assert_ne!(&blob[NONCE_LEN..], b"pfx bytes");
        assert_eq!(decrypt(&key, &blob).unwrap(), b"pfx bytes");
    }

    #[test]
    fn decrypt_with_wrong_password_fails() {
        let key = derive_key("senha123", b"0123456789abcdef");
        let wrong = derive_key("senha124", b"0123456789abcdef");
        let blob = encrypt(&key, b"pfx bytes").unwrap();
        let err = decrypt(&wrong, &blob).unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[test]
    fn encrypt_uses_fresh_nonces() {
        let key = [7u8; 32];
        let a = encrypt(&key, b"same input").unwrap();
        let b = encrypt(&key, b"same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn sign_content_produces_verifiable_signature() {
        let key = test_key();
        let der = key.to_pkcs8_der().unwrap();
        let bundle = sign_content(der.as_bytes(), "diagnosis:pulpitis\n").unwrap();

        assert_eq!(
            bundle.content_hash,
            hex::encode(Sha256::digest(b"diagnosis:pulpitis\n"))
        );

        let verifying_key = VerifyingKey::<Sha256>::new(key.to_public_key());
        let sig_bytes = BASE64.decode(&bundle.signature).unwrap();
        let signature = Signature::try_from(sig_bytes.as_slice()).unwrap();
        assert!(verifying_key.verify(b"diagnosis:pulpitis\n", &signature).is_ok());
        assert!(verifying_key.verify(b"diagnosis:caries\n", &signature).is_err());
    }

    #[test]
    fn parse_pfx_rejects_garbage() {
        assert!(parse_pfx(b"not a pfx", "pass").is_err());
    }

    #[test]
    fn canonical_content_tracks_field_changes() {
        let record = MedicalRecord {
            id: 1,
            patient_id: 2,
            dentist_id: 3,
            appointment_id: None,
            kind: Some("procedure".into()),
            odontogram: None,
            diagnosis: Some("pulpitis".into()),
            treatment_plan: None,
            procedure_done: Some("root canal".into()),
            materials: None,
            evolution: None,
            notes: None,
            is_signed: false,
            signed_at: None,
            signed_by_id: None,
            signed_by_name: None,
            signed_by_cro: None,
            certificate_thumbprint: None,
            signature_hash: None,
            signature: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        };
        let original = medical_record_content(&record);

        let mut edited = record.clone();
        edited.diagnosis = Some("caries".into());
        assert_ne!(original, medical_record_content(&edited));
        assert_eq!(original, medical_record_content(&record));
    }
}
