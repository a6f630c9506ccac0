//! Billing Details

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A checkout field that can fail validation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// The cart itself (must not be empty)
    Cart,
    /// Billing first name
    FirstName,
    /// Billing last name
    LastName,
    /// Billing email address
    Email,
    /// Billing street address
    Address,
    /// Billing city
    City,
    /// Billing postal or zip code
    PostalCode,
    /// Billing country
    Country,
    /// Selected payment method
    PaymentMethod,
}

impl Field {
    /// Snake-case field name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Field::Cart => "cart",
            Field::FirstName => "first_name",
            Field::LastName => "last_name",
            Field::Email => "email",
            Field::Address => "address",
            Field::City => "city",
            Field::PostalCode => "postal_code",
            Field::Country => "country",
            Field::PaymentMethod => "payment_method",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Missing and malformed fields for one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    missing: SmallVec<[Field; 8]>,
    malformed: SmallVec<[Field; 2]>,
}

impl ValidationErrors {
    /// A single missing field.
    pub fn missing(field: Field) -> Self {
        let mut errors = Self::default();
        errors.push_missing(field);
        errors
    }

    /// Record a missing field.
    pub fn push_missing(&mut self, field: Field) {
        if !self.missing.contains(&field) {
            self.missing.push(field);
        }
    }

    /// Record a malformed field.
    pub fn push_malformed(&mut self, field: Field) {
        if !self.malformed.contains(&field) {
            self.malformed.push(field);
        }
    }

    /// Fields that were empty.
    pub fn missing_fields(&self) -> &[Field] {
        &self.missing
    }

    /// Fields that were present but invalid.
    pub fn malformed_fields(&self) -> &[Field] {
        &self.malformed
    }

    /// Whether `field` failed validation for any reason.
    pub fn contains(&self, field: Field) -> bool {
        self.missing.contains(&field) || self.malformed.contains(&field)
    }

    /// Whether nothing failed.
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.malformed.is_empty()
    }

    /// `Ok(())` when empty, otherwise `Err(self)`.
    ///
    /// # Errors
    ///
    /// Returns `self` when any field failed.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |fields: &[Field]| {
            fields
                .iter()
                .map(|field| field.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };

        match (self.missing.is_empty(), self.malformed.is_empty()) {
            (true, true) => f.write_str("no validation errors"),
            (false, true) => write!(f, "missing required fields: {}", join(&self.missing)),
            (true, false) => write!(f, "invalid fields: {}", join(&self.malformed)),
            (false, false) => write!(
                f,
                "missing required fields: {}; invalid fields: {}",
                join(&self.missing),
                join(&self.malformed)
            ),
        }
    }
}

impl std::error::Error for ValidationErrors {}

/// Billing details collected on the billing step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingDetails {
    /// First name
    pub first_name: String,

    /// Last name
    pub last_name: String,

    /// Email address receipts are sent to
    pub email: String,

    /// Street address
    pub address: String,

    /// City
    pub city: String,

    /// Postal or zip code
    pub postal_code: String,

    /// ISO country code, also used as the tax region
    pub country: String,

    /// Company name
    pub company: Option<String>,

    /// Phone number
    pub phone: Option<String>,
}

impl BillingDetails {
    /// Check every required field, collecting all failures.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationErrors`] listing each missing or malformed field.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();

        let required = [
            (Field::FirstName, &self.first_name),
            (Field::LastName, &self.last_name),
            (Field::Email, &self.email),
            (Field::Address, &self.address),
            (Field::City, &self.city),
            (Field::PostalCode, &self.postal_code),
            (Field::Country, &self.country),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                errors.push_missing(field);
            }
        }

        if !errors.contains(Field::Email) && !is_plausible_email(self.email.trim()) {
            errors.push_malformed(Field::Email);
        }

        errors.into_result()
    }

    /// Tax region for these details, if a country was entered.
    pub fn region(&self) -> Option<String> {
        let country = self.country.trim();

        (!country.is_empty()).then(|| country.to_uppercase())
    }

    /// "First Last" for display.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
    }
}

/// One `@`, a non-empty local part and a dotted domain.
fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.contains('@')
        && !email.contains(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> BillingDetails {
        BillingDetails {
            first_name: "Ada".to_string(),
            last_name: "Byron".to_string(),
            email: "ada@example.com".to_string(),
            address: "12 St James's Square".to_string(),
            city: "London".to_string(),
            postal_code: "SW1Y 4JH".to_string(),
            country: "gb".to_string(),
            company: None,
            phone: None,
        }
    }

    #[test]
    fn complete_details_validate() {
        assert_eq!(complete().validate(), Ok(()));
    }

    #[test]
    fn empty_details_list_every_required_field() {
        let Err(errors) = BillingDetails::default().validate() else {
            unreachable!("empty billing details must not validate");
        };

        assert_eq!(
            errors.missing_fields(),
            [
                Field::FirstName,
                Field::LastName,
                Field::Email,
                Field::Address,
                Field::City,
                Field::PostalCode,
                Field::Country,
            ]
        );
        assert!(errors.malformed_fields().is_empty());
    }

    #[test]
    fn whitespace_counts_as_missing() {
        let details = BillingDetails {
            city: "   ".to_string(),
            ..complete()
        };

        let result = details.validate();

        assert_eq!(result, Err(ValidationErrors::missing(Field::City)));
    }

    #[test]
    fn malformed_email_is_reported_separately() {
        for email in ["ada", "ada@", "@example.com", "ada@example", "a@b@c.com", "a da@x.io"] {
            let details = BillingDetails {
                email: email.to_string(),
                ..complete()
            };

            let Err(errors) = details.validate() else {
                unreachable!("{email} should not validate");
            };

            assert_eq!(errors.malformed_fields(), [Field::Email], "email: {email}");
            assert!(errors.missing_fields().is_empty(), "email: {email}");
        }
    }

    #[test]
    fn display_lists_fields() {
        let mut errors = ValidationErrors::missing(Field::Email);
        errors.push_missing(Field::City);
        errors.push_malformed(Field::PostalCode);

        assert_eq!(
            errors.to_string(),
            "missing required fields: email, city; invalid fields: postal_code"
        );
    }

    #[test]
    fn region_is_upper_cased_country() {
        assert_eq!(complete().region(), Some("GB".to_string()));
        assert_eq!(BillingDetails::default().region(), None);
    }
}
