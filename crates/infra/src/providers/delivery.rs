use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use stockcart_catalog::Dimensions;
use stockcart_orders::Address;

use crate::error::CollaboratorError;

/// Input to a delivery price computation.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryRequest<'a> {
    /// Configured delivery method key.
    pub method: &'a str,
    /// Provider options from the method configuration.
    pub options: &'a JsonValue,
    pub address: &'a Address,
    pub order_price: Decimal,
    pub weight: Decimal,
    pub package: Dimensions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryQuote {
    pub price: Decimal,
    /// Provider-normalized address, if the provider produces one.
    pub normalized_address: Option<String>,
}

#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    async fn compute_delivery(
        &self,
        request: &DeliveryRequest<'_>,
    ) -> Result<DeliveryQuote, CollaboratorError>;
}

/// Flat delivery price taken from the method options (`{"price": "4.90"}`).
/// A missing price means free delivery.
#[derive(Debug, Copy, Clone, Default)]
pub struct ConstantPriceDelivery;

impl ConstantPriceDelivery {
    pub const KEY: &'static str = "constant_price";

    fn price(options: &JsonValue) -> Result<Decimal, String> {
        let price = match options.get("price") {
            None | Some(JsonValue::Null) => return Ok(Decimal::ZERO),
            Some(JsonValue::String(s)) => s.trim().parse::<Decimal>().map_err(|e| e.to_string())?,
            Some(JsonValue::Number(n)) => n
                .to_string()
                .parse::<Decimal>()
                .map_err(|e| e.to_string())?,
            Some(other) => return Err(format!("price must be a number, got {other}")),
        };
        if price.is_sign_negative() {
            return Err(format!("price cannot be negative, got {price}"));
        }
        Ok(price)
    }
}

#[async_trait]
impl DeliveryProvider for ConstantPriceDelivery {
    async fn compute_delivery(
        &self,
        request: &DeliveryRequest<'_>,
    ) -> Result<DeliveryQuote, CollaboratorError> {
        let price = Self::price(request.options).map_err(|message| CollaboratorError::Delivery {
            provider: Self::KEY.to_string(),
            message: format!("method '{}': {message}", request.method),
        })?;
        Ok(DeliveryQuote {
            price,
            normalized_address: None,
        })
    }
}
