use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use validator::{Validate, ValidationError};

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

static MOBILE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^3\d{9}$").unwrap());

/// Input fields of the shipping form.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ShippingField {
    FullName,
    Email,
    Phone,
    FullAddress,
    Region,
    City,
    PostalCode,
}

/// Raw values as typed by the customer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ShippingForm {
    #[validate(length(min = 1, message = "Full name is required"))]
    pub full_name: String,
    #[validate(custom = "validate_email")]
    pub email: String,
    #[validate(custom = "validate_phone")]
    pub phone: String,
    #[validate(length(min = 1, message = "Address is required"))]
    pub full_address: String,
    #[validate(length(min = 1, message = "Department is required"))]
    pub region: String,
    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,
    #[serde(default)]
    pub postal_code: String,
}

impl ShippingForm {
    pub fn get(&self, field: ShippingField) -> &str {
        match field {
            ShippingField::FullName => &self.full_name,
            ShippingField::Email => &self.email,
            ShippingField::Phone => &self.phone,
            ShippingField::FullAddress => &self.full_address,
            ShippingField::Region => &self.region,
            ShippingField::City => &self.city,
            ShippingField::PostalCode => &self.postal_code,
        }
    }

    pub fn slot(&mut self, field: ShippingField) -> &mut String {
        match field {
            ShippingField::FullName => &mut self.full_name,
            ShippingField::Email => &mut self.email,
            ShippingField::Phone => &mut self.phone,
            ShippingField::FullAddress => &mut self.full_address,
            ShippingField::Region => &mut self.region,
            ShippingField::City => &mut self.city,
            ShippingField::PostalCode => &mut self.postal_code,
        }
    }

    /// Copy with surrounding whitespace removed from every field.
    pub fn trimmed(&self) -> Self {
        Self {
            full_name: self.full_name.trim().to_string(),
            email: self.email.trim().to_string(),
            phone: self.phone.trim().to_string(),
            full_address: self.full_address.trim().to_string(),
            region: self.region.trim().to_string(),
            city: self.city.trim().to_string(),
            postal_code: self.postal_code.trim().to_string(),
        }
    }
}

/// A validated destination. Immutable once an order has been persisted from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub full_address: String,
    pub region: String,
    pub city: String,
    pub postal_code: Option<String>,
}

impl ShippingAddress {
    /// Builds an address from a form that already passed validation.
    pub fn from_form(form: &ShippingForm) -> Self {
        let form = form.trimmed();
        Self {
            phone: normalize_phone(&form.phone),
            postal_code: Some(form.postal_code).filter(|code| !code.is_empty()),
            full_name: form.full_name,
            email: form.email,
            full_address: form.full_address,
            region: form.region,
            city: form.city,
        }
    }
}

/// Strips spaces, dashes, parentheses and the `+57` country prefix.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    digits
        .strip_prefix("+57")
        .map(str::to_string)
        .unwrap_or(digits)
}

fn validation_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(message.into());
    error
}

fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.is_empty() {
        return Err(validation_error("required", "Email is required"));
    }
    if !EMAIL_PATTERN.is_match(email) {
        return Err(validation_error("email", "Enter a valid email address"));
    }
    Ok(())
}

fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    if phone.is_empty() {
        return Err(validation_error("required", "Phone is required"));
    }
    if !MOBILE_PATTERN.is_match(&normalize_phone(phone)) {
        return Err(validation_error(
            "phone",
            "Enter a 10-digit mobile number starting with 3",
        ));
    }
    Ok(())
}
