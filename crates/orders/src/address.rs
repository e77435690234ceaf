use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockcart_core::{DeliveryAddressId, DomainError};

/// Address as entered by the client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Address {
    pub country: Option<String>,
    pub city: Option<String>,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub details: Option<String>,
}

impl Address {
    pub fn is_empty(&self) -> bool {
        [
            &self.country,
            &self.city,
            &self.street,
            &self.postal_code,
            &self.details,
        ]
        .iter()
        .all(|f| f.as_deref().map(str::trim).unwrap_or("").is_empty())
    }

    /// Single-line rendering, used when a delivery provider returns no
    /// normalized form.
    pub fn one_line(&self) -> String {
        [
            &self.postal_code,
            &self.country,
            &self.city,
            &self.street,
            &self.details,
        ]
        .iter()
        .filter_map(|f| f.as_deref().map(str::trim).filter(|v| !v.is_empty()))
        .collect::<Vec<_>>()
        .join(", ")
    }
}

/// Immutable snapshot of where an order goes, taken at order creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub id: DeliveryAddressId,
    pub address: Address,
    pub normalized: String,
    pub created_at: DateTime<Utc>,
}

impl DeliveryAddress {
    pub fn snapshot(
        address: Address,
        normalized: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let normalized = normalized
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| address.one_line());
        Self {
            id: DeliveryAddressId::new(),
            address,
            normalized,
            created_at,
        }
    }
}

/// Who receives the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receiver {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
}

impl Receiver {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("receiver name cannot be empty"));
        }
        if self.phone.trim().is_empty() {
            return Err(DomainError::validation("receiver phone cannot be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_falls_back_to_one_line_rendering() {
        let address = Address {
            city: Some("Riga".into()),
            street: Some(" Brivibas 1 ".into()),
            postal_code: Some("LV-1010".into()),
            ..Default::default()
        };
        let snap = DeliveryAddress::snapshot(address.clone(), Some("  ".into()), Utc::now());
        assert_eq!(snap.normalized, "LV-1010, Riga, Brivibas 1");

        let snap = DeliveryAddress::snapshot(address, Some("Brivibas iela 1".into()), Utc::now());
        assert_eq!(snap.normalized, "Brivibas iela 1");
        assert!(Address::default().is_empty());
    }

    #[test]
    fn receiver_requires_name_and_phone() {
        let receiver = Receiver {
            name: "Ann".into(),
            phone: "".into(),
            email: None,
        };
        assert!(receiver.validate().is_err());
    }
}
