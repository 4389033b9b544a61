//! Provider factory registry: maps a provider identifier to its adapter
//! triple. Factories are registered once at startup; after the registry is
//! wrapped in an `Arc` and handed to the engine, every access is read-only
//! and safe to share across in-flight requests.

use crate::domain::payment::Provider;
use crate::domain::ports::{ProviderFactory, ProviderFactoryRef};
use crate::error::{PaymentError, Result};
use std::collections::HashMap;

#[derive(Default)]
pub struct ProviderRegistry {
    factories: HashMap<Provider, ProviderFactoryRef>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory, replacing any previous one for the same provider.
    pub fn register(&mut self, factory: ProviderFactoryRef) {
        self.factories.insert(factory.provider(), factory);
    }

    pub fn get(&self, provider: Provider) -> Result<&ProviderFactoryRef> {
        self.factories
            .get(&provider)
            .ok_or(PaymentError::UnsupportedProvider(provider))
    }

    pub fn contains(&self, provider: Provider) -> bool {
        self.factories.contains_key(&provider)
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.factories.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::currency::AmountStyle;
    use crate::domain::ports::{NotifierRef, ProcessorRef, RequestValidatorRef};
    use crate::infrastructure::providers::stripe::StripeFactory;
    use std::sync::Arc;

    struct NoopFactory(Provider);

    impl ProviderFactory for NoopFactory {
        fn provider(&self) -> Provider {
            self.0
        }
        fn amount_style(&self) -> AmountStyle {
            AmountStyle::MinorUnits
        }
        fn requires_card_capture(&self) -> bool {
            false
        }
        fn create_processor(&self) -> ProcessorRef {
            unimplemented!("not needed by registry tests")
        }
        fn create_validator(&self) -> RequestValidatorRef {
            unimplemented!("not needed by registry tests")
        }
        fn create_notifier(&self) -> NotifierRef {
            unimplemented!("not needed by registry tests")
        }
    }

    #[test]
    fn test_lookup_after_registration() {
        let mut registry = ProviderRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(StripeFactory::sandbox()));
        let factory = registry.get(Provider::Stripe).unwrap();
        assert_eq!(factory.provider(), Provider::Stripe);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregistered_provider_is_unsupported() {
        let registry = ProviderRegistry::new();
        let err = match registry.get(Provider::MercadoPago) {
            Ok(_) => panic!("MercadoPago is not registered"),
            Err(e) => e,
        };
        assert!(matches!(
            err,
            PaymentError::UnsupportedProvider(Provider::MercadoPago)
        ));
        assert_eq!(err.code(), "UNSUPPORTED_PROVIDER");
    }

    #[test]
    fn test_reregistration_replaces() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(NoopFactory(Provider::Webpay)));
        registry.register(Arc::new(NoopFactory(Provider::Webpay)));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(Provider::Webpay));
    }
}
