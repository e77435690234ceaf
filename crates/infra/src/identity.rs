//! Best-effort identity enrichment of customer records.

use tracing::{debug, warn};

use stockcart_cart::{ClientIdentity, ClientToken};

use crate::context::EngineContext;
use crate::error::EngineError;

pub struct IdentityEnricher {
    ctx: EngineContext,
}

impl IdentityEnricher {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Merge `identity` into the customer behind `token`.
    ///
    /// Anonymous clients have no customer yet and are skipped. Errors are
    /// logged and never reach the caller.
    pub async fn enrich(&self, token: &ClientToken, identity: &ClientIdentity) {
        if identity.is_empty() {
            return;
        }
        match self.try_enrich(token, identity).await {
            Ok(true) => debug!(token = %token, "customer identity enriched"),
            Ok(false) => {}
            Err(error) => warn!(token = %token, %error, "identity enrichment failed"),
        }
    }

    async fn try_enrich(
        &self,
        token: &ClientToken,
        identity: &ClientIdentity,
    ) -> Result<bool, EngineError> {
        let Some(association) = self.ctx.sessions.association(token) else {
            return Ok(false);
        };

        let mut tx = self.ctx.store.begin().await?;
        let mut customer = tx
            .load_customer(association.customer_id)
            .await?
            .ok_or_else(|| {
                EngineError::not_found(format!("customer {}", association.customer_id))
            })?;

        if !customer.enrich(identity) {
            return Ok(false);
        }
        tx.update_customer(&customer).await?;
        tx.commit().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use chrono::Utc;
    use stockcart_cart::{ClientAssociation, Customer};
    use stockcart_core::CustomerId;

    async fn known_customer(ctx: &EngineContext, token: &ClientToken) -> CustomerId {
        let customer = Customer::new(CustomerId::new(), Utc::now());
        let mut tx = ctx.store.begin().await.unwrap();
        tx.insert_customer(&customer).await.unwrap();
        tx.commit().await.unwrap();
        ctx.sessions.compare_and_set_association(
            token,
            None,
            Some(ClientAssociation {
                customer_id: customer.id,
                cart_id: None,
            }),
        );
        customer.id
    }

    #[tokio::test]
    async fn tracking_ids_are_merged_into_the_customer() {
        let ctx = EngineContext::in_memory();
        let token = ClientToken::new("t-1").unwrap();
        let id = known_customer(&ctx, &token).await;

        let identity = ClientIdentity {
            remote_addr: Some("203.0.113.7".into()),
            tracking_ids: BTreeMap::from([("ga".to_string(), "GA1.2.3".to_string())]),
            ..Default::default()
        };
        IdentityEnricher::new(ctx.clone()).enrich(&token, &identity).await;

        let mut tx = ctx.store.begin().await.unwrap();
        let stored = tx.load_customer(id).await.unwrap().unwrap();
        assert_eq!(stored.identity.remote_addr.as_deref(), Some("203.0.113.7"));
        assert_eq!(stored.identity.tracking_ids["ga"], "GA1.2.3");
    }

    #[tokio::test]
    async fn anonymous_and_broken_associations_are_ignored() {
        let ctx = EngineContext::in_memory();
        let anonymous = ClientToken::new("t-2").unwrap();
        let identity = ClientIdentity {
            email: Some("ann@example.com".into()),
            ..Default::default()
        };
        let enricher = IdentityEnricher::new(ctx.clone());
        enricher.enrich(&anonymous, &identity).await;

        let dangling = ClientToken::new("t-3").unwrap();
        ctx.sessions.compare_and_set_association(
            &dangling,
            None,
            Some(ClientAssociation {
                customer_id: CustomerId::new(),
                cart_id: None,
            }),
        );
        enricher.enrich(&dangling, &identity).await;
        assert!(
            enricher
                .try_enrich(&dangling, &identity)
                .await
                .unwrap_err()
                .to_string()
                .contains("customer")
        );
    }
}
