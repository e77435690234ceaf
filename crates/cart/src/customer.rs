use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockcart_core::CustomerId;

use crate::cart::ContactDetails;

/// Best-effort identifiers attached to a customer.
///
/// Nothing here participates in cart or order correctness.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub remote_addr: Option<String>,
    /// External analytics/tracking ids, keyed by source.
    #[serde(default)]
    pub tracking_ids: BTreeMap<String, String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl ClientIdentity {
    pub fn is_empty(&self) -> bool {
        self.remote_addr.is_none()
            && self.tracking_ids.is_empty()
            && self.name.is_none()
            && self.phone.is_none()
            && self.email.is_none()
    }

    /// Merge `other` into `self`. Present fields in `other` win; blank
    /// strings are ignored.
    pub fn merge(&mut self, other: &ClientIdentity) {
        fn take(slot: &mut Option<String>, value: &Option<String>) {
            if let Some(v) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                *slot = Some(v.to_string());
            }
        }

        take(&mut self.remote_addr, &other.remote_addr);
        take(&mut self.name, &other.name);
        take(&mut self.phone, &other.phone);
        take(&mut self.email, &other.email);

        for (source, id) in &other.tracking_ids {
            if !id.trim().is_empty() {
                self.tracking_ids.insert(source.clone(), id.trim().to_string());
            }
        }
    }

    pub fn with_contact(mut self, contact: &ContactDetails) -> Self {
        self.merge(&ClientIdentity {
            name: contact.name.clone(),
            phone: contact.phone.clone(),
            email: contact.email.clone(),
            ..Default::default()
        });
        self
    }
}

/// Customer created when an anonymous cart is first persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub created_at: DateTime<Utc>,
    pub identity: ClientIdentity,
}

impl Customer {
    pub fn new(id: CustomerId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at,
            identity: ClientIdentity::default(),
        }
    }

    /// Returns whether anything changed.
    pub fn enrich(&mut self, identity: &ClientIdentity) -> bool {
        let before = self.identity.clone();
        self.identity.merge(identity);
        before != self.identity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_existing_values_when_incoming_is_blank() {
        let mut identity = ClientIdentity {
            email: Some("a@example.com".into()),
            ..Default::default()
        };
        identity.merge(&ClientIdentity {
            email: Some("   ".into()),
            phone: Some(" 555-0101 ".into()),
            ..Default::default()
        });

        assert_eq!(identity.email.as_deref(), Some("a@example.com"));
        assert_eq!(identity.phone.as_deref(), Some("555-0101"));
    }

    #[test]
    fn enrich_reports_changes() {
        let mut customer = Customer::new(CustomerId::new(), Utc::now());
        let mut incoming = ClientIdentity::default();
        incoming.tracking_ids.insert("ga".into(), "GA1.2.3".into());

        assert!(customer.enrich(&incoming));
        assert!(!customer.enrich(&incoming));
        assert_eq!(customer.identity.tracking_ids["ga"], "GA1.2.3");
    }
}
