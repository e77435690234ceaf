//! Configuration loading and representation.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use stockcart_observability::{LogConfig, LogFormat};
use stockcart_orders::PaymentKind;

use crate::providers::{CashOnDelivery, ConstantPriceDelivery};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethodConfig {
    pub key: String,
    pub name: String,
    pub kind: PaymentKind,
    /// Key of the registered payment provider.
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryMethodConfig {
    pub key: String,
    pub name: String,
    /// Key of the registered delivery provider.
    pub provider: String,
    /// Passed verbatim to the provider.
    #[serde(default)]
    pub options: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub database_url: Option<String>,
    #[serde(default)]
    pub use_persistent_stores: bool,
}

/// Method catalogue as stored in the methods file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct MethodCatalogue {
    #[serde(default)]
    payment_methods: Vec<PaymentMethodConfig>,
    #[serde(default)]
    delivery_methods: Vec<DeliveryMethodConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommerceConfig {
    pub payment_methods: Vec<PaymentMethodConfig>,
    pub delivery_methods: Vec<DeliveryMethodConfig>,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for CommerceConfig {
    /// Offline cash payment and free pickup.
    fn default() -> Self {
        Self {
            payment_methods: vec![PaymentMethodConfig {
                key: "cash".into(),
                name: "Cash on delivery".into(),
                kind: PaymentKind::OnDelivery,
                provider: CashOnDelivery::KEY.into(),
            }],
            delivery_methods: vec![DeliveryMethodConfig {
                key: "pickup".into(),
                name: "Pickup".into(),
                provider: ConstantPriceDelivery::KEY.into(),
                options: serde_json::json!({ "price": "0" }),
            }],
            persistence: PersistenceConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl CommerceConfig {
    /// Parse a full configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the process environment.
    ///
    /// - `DATABASE_URL`
    /// - `USE_PERSISTENT_STORES` (`true`/`false`, default `false`)
    /// - `STOCKCART_LOG_FORMAT` (`json`/`pretty`)
    /// - `STOCKCART_METHODS_FILE`: JSON file with `payment_methods` and
    ///   `delivery_methods`; defaults apply when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.persistence.database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());
        config.persistence.use_persistent_stores = lookup("USE_PERSISTENT_STORES")
            .and_then(|v| v.trim().parse::<bool>().ok())
            .unwrap_or(false);
        if let Some(format) = lookup("STOCKCART_LOG_FORMAT") {
            config.log.format = LogFormat::from_name(&format);
        }

        if let Some(path) = lookup("STOCKCART_METHODS_FILE") {
            let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            let catalogue: MethodCatalogue = serde_json::from_str(&raw)?;
            config.payment_methods = catalogue.payment_methods;
            config.delivery_methods = catalogue.delivery_methods;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.payment_methods.is_empty() {
            return Err(ConfigError::Invalid("no payment methods configured".into()));
        }
        if self.delivery_methods.is_empty() {
            return Err(ConfigError::Invalid("no delivery methods configured".into()));
        }
        for (i, m) in self.payment_methods.iter().enumerate() {
            if self.payment_methods[..i].iter().any(|o| o.key == m.key) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate payment method '{}'",
                    m.key
                )));
            }
        }
        for (i, m) in self.delivery_methods.iter().enumerate() {
            if self.delivery_methods[..i].iter().any(|o| o.key == m.key) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate delivery method '{}'",
                    m.key
                )));
            }
        }
        if self.persistence.use_persistent_stores && self.persistence.database_url.is_none() {
            return Err(ConfigError::Invalid(
                "DATABASE_URL must be set when USE_PERSISTENT_STORES=true".into(),
            ));
        }
        Ok(())
    }

    pub fn payment_method(&self, key: &str) -> Option<&PaymentMethodConfig> {
        self.payment_methods.iter().find(|m| m.key == key)
    }

    pub fn delivery_method(&self, key: &str) -> Option<&DeliveryMethodConfig> {
        self.delivery_methods.iter().find(|m| m.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = CommerceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.payment_method("cash").unwrap().kind, PaymentKind::OnDelivery);
        assert!(config.delivery_method("pickup").is_some());
        assert!(!config.persistence.use_persistent_stores);
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn persistent_stores_need_a_database_url() {
        let err = CommerceConfig::from_lookup(lookup(&[("USE_PERSISTENT_STORES", "true")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = CommerceConfig::from_lookup(lookup(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/stockcart"),
            ("STOCKCART_LOG_FORMAT", "pretty"),
        ]))
        .unwrap();
        assert!(config.persistence.use_persistent_stores);
        assert_eq!(config.log.format, LogFormat::Pretty);
    }

    #[test]
    fn parses_full_document() {
        let config = CommerceConfig::from_json_str(
            r#"{
                "payment_methods": [
                    {"key": "card", "name": "Card", "kind": "online", "provider": "acme"}
                ],
                "delivery_methods": [
                    {"key": "courier", "name": "Courier", "provider": "constant_price",
                     "options": {"price": "4.90"}}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.payment_method("card").unwrap().kind, PaymentKind::Online);
        assert_eq!(config.delivery_method("courier").unwrap().options["price"], "4.90");
    }

    #[test]
    fn duplicate_keys_rejected() {
        let mut config = CommerceConfig::default();
        config.payment_methods.push(config.payment_methods[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_methods_file_is_an_io_error() {
        let err = CommerceConfig::from_lookup(lookup(&[(
            "STOCKCART_METHODS_FILE",
            "/nonexistent/stockcart-methods.json",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
