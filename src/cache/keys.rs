//! Type-safe cache key builders

use std::fmt;

pub const VERSION: &str = "v1";

pub mod order {
    use super::*;
    use uuid::Uuid;

    pub const NAMESPACE: &str = "order";

    /// Short-lived snapshot of an order, invalidated on every write to it.
    #[derive(Debug, Clone, Copy)]
    pub struct StatusKey {
        pub order_id: Uuid,
    }

    impl StatusKey {
        pub fn new(order_id: Uuid) -> Self {
            Self { order_id }
        }
    }

    impl fmt::Display for StatusKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:status:{}", VERSION, NAMESPACE, self.order_id)
        }
    }
}

pub mod catalog {
    use super::*;

    pub const NAMESPACE: &str = "catalog";

    /// Upstream service listing for one number provider.
    #[derive(Debug, Clone)]
    pub struct ServicesKey {
        pub provider_id: String,
    }

    impl ServicesKey {
        pub fn new(provider_id: impl Into<String>) -> Self {
            Self {
                provider_id: provider_id.into(),
            }
        }
    }

    impl fmt::Display for ServicesKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:{}:services:{}", VERSION, NAMESPACE, self.provider_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_order_status_key() {
        let id = Uuid::nil();
        let key = order::StatusKey::new(id);
        assert_eq!(
            key.to_string(),
            "v1:order:status:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_catalog_services_key() {
        let key = catalog::ServicesKey::new("sms-activate");
        assert_eq!(key.to_string(), "v1:catalog:services:sms-activate");
    }
}
