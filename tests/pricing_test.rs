mod common;

use rust_decimal_macros::dec;

use common::{Harness, PROVIDER};
use numbr_backend::database::models::{ProfitType, Provider, ProviderPrice};
use numbr_backend::database::store::{LedgerStore, NewPricingRule};
use numbr_backend::error::ErrorCode;
use numbr_backend::services::{CatalogService, CreateOrderRequest, PricingService};

fn rule(
    service: Option<&str>,
    country: Option<&str>,
    profit_type: ProfitType,
    value: rust_decimal::Decimal,
) -> NewPricingRule {
    NewPricingRule {
        service_code: service.map(str::to_string),
        country: country.map(str::to_string),
        profit_type,
        profit_value: value,
        priority: 0,
    }
}

#[tokio::test]
async fn most_specific_rule_sets_the_order_price() {
    let h = Harness::new().await;
    h.store
        .create_pricing_rule(rule(None, None, ProfitType::Fixed, dec!(10)))
        .await
        .unwrap();
    h.store
        .create_pricing_rule(rule(Some("wa"), None, ProfitType::Percentage, dec!(50)))
        .await
        .unwrap();
    h.store
        .create_pricing_rule(rule(Some("wa"), Some("ng"), ProfitType::Percentage, dec!(20)))
        .await
        .unwrap();

    let pricing = PricingService::new(h.store.clone());
    assert_eq!(pricing.resolve_price("wa", "ng", dec!(300)).await.unwrap(), dec!(360));
    assert_eq!(pricing.resolve_price("wa", "gh", dec!(300)).await.unwrap(), dec!(450));
    assert_eq!(pricing.resolve_price("tg", "gh", dec!(300)).await.unwrap(), dec!(310));

    let user = h.user(dec!(1000)).await;
    let order = h
        .orders
        .create_order(
            user,
            CreateOrderRequest {
                service_code: "wa".to_string(),
                country: "ng".to_string(),
                preferred_provider: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(order.base_price, dec!(300));
    assert_eq!(order.final_price, dec!(360));
    assert_eq!(h.balance(user).await, dec!(640));
}

#[tokio::test]
async fn unhealthy_provider_is_skipped() {
    let h = Harness::new().await;
    h.store
        .upsert_provider(Provider {
            id: "backup".to_string(),
            name: "Backup".to_string(),
            is_active: true,
            is_healthy: true,
            priority: 1,
        })
        .await
        .unwrap();
    h.store
        .upsert_provider_price(ProviderPrice {
            provider_id: "backup".to_string(),
            service_code: "wa".to_string(),
            country: "ng".to_string(),
            base_cost: dec!(200),
        })
        .await
        .unwrap();

    let pricing = PricingService::new(h.store.clone());
    let quote = pricing.quote("wa", "ng", None).await.unwrap();
    assert_eq!(quote.offer.provider_id, PROVIDER);

    h.store
        .upsert_provider(Provider {
            id: PROVIDER.to_string(),
            name: "Scripted".to_string(),
            is_active: true,
            is_healthy: false,
            priority: 5,
        })
        .await
        .unwrap();
    let quote = pricing.quote("wa", "ng", None).await.unwrap();
    assert_eq!(quote.offer.provider_id, "backup");

    let err = pricing.quote("tg", "ng", None).await.unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::NoProviderAvailable);
}

#[tokio::test]
async fn catalog_sync_feeds_pricing() {
    let h = Harness::new().await;
    let catalog = CatalogService::new(h.store.clone(), h.gateway.clone());
    assert_eq!(catalog.sync_prices(PROVIDER).await.unwrap(), 1);

    let pricing = PricingService::new(h.store.clone());
    let quote = pricing.quote("wa", "ng", None).await.unwrap();
    assert_eq!(quote.offer.base_cost, dec!(250));
}

#[tokio::test]
async fn discount_down_to_zero_is_not_sold() {
    let h = Harness::new().await;
    h.store
        .create_pricing_rule(rule(Some("wa"), Some("ng"), ProfitType::Fixed, dec!(-300)))
        .await
        .unwrap();
    let user = h.user(dec!(1000)).await;

    let err = h
        .orders
        .create_order(
            user,
            CreateOrderRequest {
                service_code: "wa".to_string(),
                country: "ng".to_string(),
                preferred_provider: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::NoProviderAvailable);
    assert_eq!(h.balance(user).await, dec!(1000));
    assert!(h
        .store
        .list_transactions(user, numbr_backend::database::store::Page::default())
        .await
        .unwrap()
        .is_empty());
}
