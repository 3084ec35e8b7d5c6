//! Value objects: equality by value, validated on construction.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Marker trait for value objects.
///
/// Value objects have no identity; two instances with the same attributes are
/// the same value. Constructors validate, so a value that exists is valid.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// Minimum account holder name length, in characters.
pub const MIN_NAME_CHARS: usize = 5;
/// Maximum account holder name length, in characters.
pub const MAX_NAME_CHARS: usize = 120;
/// Individual taxpayer document length (CPF).
pub const CPF_CHARS: usize = 11;
/// Company taxpayer document length (CNPJ).
pub const CNPJ_CHARS: usize = 14;

/// Maximum length accepted for a client-supplied idempotency key.
pub const MAX_IDEMPOTENCY_KEY_CHARS: usize = 255;

/// Taxpayer document of an account holder (11 or 14 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(String);

impl Document {
    pub fn parse(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        let len = raw.chars().count();
        if len != CPF_CHARS && len != CNPJ_CHARS {
            return Err(DomainError::invalid_account(format!(
                "invalid document, should be CPF with {CPF_CHARS} or CNPJ with {CNPJ_CHARS} characters"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for Document {}

impl core::fmt::Display for Document {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Account holder name (5 to 120 characters, counted as Unicode scalar values).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountName(String);

impl AccountName {
    pub fn parse(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        let len = raw.chars().count();
        if !(MIN_NAME_CHARS..=MAX_NAME_CHARS).contains(&len) {
            return Err(DomainError::invalid_account(format!(
                "invalid name, should be between {MIN_NAME_CHARS} and {MAX_NAME_CHARS} characters"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for AccountName {}

impl core::fmt::Display for AccountName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque client token that makes a mutating request apply at most once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn parse(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(DomainError::invalid_id("idempotency key cannot be empty"));
        }
        if raw.chars().count() > MAX_IDEMPOTENCY_KEY_CHARS {
            return Err(DomainError::invalid_id(format!(
                "idempotency key longer than {MAX_IDEMPOTENCY_KEY_CHARS} characters"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for IdempotencyKey {}

impl core::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
