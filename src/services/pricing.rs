//! Sell-price resolution and provider choice.
//!
//! Rules are ranked by specificity first: `(service, country)` beats
//! `(service, *)`, which beats `(*, country)`, which beats `(*, *)`. Inside a
//! tier the highest `priority` wins, then the most recently created rule, then
//! the greatest id, so the outcome never depends on storage order.

use rust_decimal::{Decimal, RoundingStrategy};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

use crate::database::models::{PricingRule, ProfitType, ProviderOffer};
use crate::database::store::LedgerStore;
use crate::error::{AppError, AppErrorKind, AppResult, DomainError};

/// Specificity tier of `rule` for the request, or `None` when it does not apply.
fn tier(rule: &PricingRule, service_code: &str, country: &str) -> Option<u8> {
    let service = match rule.service_code.as_deref() {
        Some(s) if s == service_code => true,
        Some(_) => return None,
        None => false,
    };
    let country_match = match rule.country.as_deref() {
        Some(c) if c == country => true,
        Some(_) => return None,
        None => false,
    };
    Some(match (service, country_match) {
        (true, true) => 3,
        (true, false) => 2,
        (false, true) => 1,
        (false, false) => 0,
    })
}

fn rank(a: &(u8, &PricingRule), b: &(u8, &PricingRule)) -> Ordering {
    a.0.cmp(&b.0)
        .then(a.1.priority.cmp(&b.1.priority))
        .then(a.1.created_at.cmp(&b.1.created_at))
        .then(a.1.id.cmp(&b.1.id))
}

/// The rule that governs `(service_code, country)`, if any.
pub fn matching_rule<'a>(
    rules: &'a [PricingRule],
    service_code: &str,
    country: &str,
) -> Option<&'a PricingRule> {
    rules
        .iter()
        .filter(|r| r.is_active)
        .filter_map(|r| tier(r, service_code, country).map(|t| (t, r)))
        .max_by(rank)
        .map(|(_, r)| r)
}

pub fn apply_rule(rule: Option<&PricingRule>, base_cost: Decimal) -> Decimal {
    let profit = match rule {
        Some(rule) => match rule.profit_type {
            ProfitType::Percentage => base_cost * rule.profit_value / Decimal::ONE_HUNDRED,
            ProfitType::Fixed => rule.profit_value,
        },
        None => Decimal::ZERO,
    };
    (base_cost + profit).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn resolve_price(
    rules: &[PricingRule],
    service_code: &str,
    country: &str,
    base_cost: Decimal,
) -> Decimal {
    apply_rule(matching_rule(rules, service_code, country), base_cost)
}

/// A provider offer together with what the user would pay for it.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedOffer {
    pub offer: ProviderOffer,
    pub final_price: Decimal,
}

/// The preferred provider when it is viable, otherwise the highest-priority
/// provider, cheapest first among equals, provider id as the last tie-break.
/// Offers without a positive cost or sell price are not viable.
pub fn select_offer(
    offers: &[ProviderOffer],
    rules: &[PricingRule],
    service_code: &str,
    country: &str,
    preferred_provider: Option<&str>,
) -> Option<PricedOffer> {
    // an offer that would charge nothing (or pay the user) is never sold
    let priced = offers
        .iter()
        .filter(|offer| offer.base_cost > Decimal::ZERO)
        .map(|offer| PricedOffer {
            offer: offer.clone(),
            final_price: resolve_price(rules, service_code, country, offer.base_cost),
        })
        .filter(|p| p.final_price > Decimal::ZERO);

    if let Some(preferred) = preferred_provider {
        if let Some(hit) = priced
            .clone()
            .find(|p| p.offer.provider_id == preferred)
        {
            return Some(hit);
        }
        debug!(preferred, service_code, country, "preferred provider not viable, falling back");
    }

    priced.min_by(|a, b| {
        b.offer
            .provider_priority
            .cmp(&a.offer.provider_priority)
            .then(a.final_price.cmp(&b.final_price))
            .then(a.offer.provider_id.cmp(&b.offer.provider_id))
    })
}

#[derive(Clone)]
pub struct PricingService {
    store: Arc<dyn LedgerStore>,
}

impl PricingService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn resolve_price(
        &self,
        service_code: &str,
        country: &str,
        base_cost: Decimal,
    ) -> AppResult<Decimal> {
        let rules = self.store.pricing_rules(service_code, country).await?;
        Ok(resolve_price(&rules, service_code, country, base_cost))
    }

    /// Picks the provider and price for a new order.
    pub async fn quote(
        &self,
        service_code: &str,
        country: &str,
        preferred_provider: Option<&str>,
    ) -> AppResult<PricedOffer> {
        let offers = self.store.viable_offers(service_code, country).await?;
        let rules = self.store.pricing_rules(service_code, country).await?;
        select_offer(&offers, &rules, service_code, country, preferred_provider).ok_or_else(|| {
            AppError::new(AppErrorKind::Domain(DomainError::NoProviderAvailable {
                service_code: service_code.to_string(),
                country: country.to_string(),
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn rule(
        service: Option<&str>,
        country: Option<&str>,
        profit_type: ProfitType,
        value: Decimal,
        priority: i32,
    ) -> PricingRule {
        PricingRule {
            id: Uuid::new_v4(),
            service_code: service.map(str::to_string),
            country: country.map(str::to_string),
            profit_type,
            profit_value: value,
            priority,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn offer(id: &str, priority: i32, cost: Decimal) -> ProviderOffer {
        ProviderOffer {
            provider_id: id.to_string(),
            provider_priority: priority,
            base_cost: cost,
        }
    }

    #[test]
    fn no_rule_sells_at_cost() {
        assert_eq!(resolve_price(&[], "wa", "ng", dec!(250)), dec!(250));
    }

    #[test]
    fn service_and_country_outrank_service_only() {
        let rules = vec![
            rule(Some("wa"), None, ProfitType::Fixed, dec!(100), 50),
            rule(Some("wa"), Some("ng"), ProfitType::Percentage, dec!(20), 0),
        ];
        assert_eq!(resolve_price(&rules, "wa", "ng", dec!(250)), dec!(300));
        assert_eq!(resolve_price(&rules, "wa", "gh", dec!(250)), dec!(350));
    }

    #[test]
    fn country_only_outranks_wildcard() {
        let rules = vec![
            rule(None, None, ProfitType::Fixed, dec!(1), 99),
            rule(None, Some("ng"), ProfitType::Fixed, dec!(5), 0),
        ];
        assert_eq!(resolve_price(&rules, "tg", "ng", dec!(10)), dec!(15));
        assert_eq!(resolve_price(&rules, "tg", "us", dec!(10)), dec!(11));
    }

    #[test]
    fn priority_then_recency_breaks_ties_within_tier() {
        let mut older = rule(Some("wa"), None, ProfitType::Fixed, dec!(10), 5);
        older.created_at = Utc::now() - Duration::hours(1);
        let newer = rule(Some("wa"), None, ProfitType::Fixed, dec!(20), 5);
        let low = rule(Some("wa"), None, ProfitType::Fixed, dec!(99), 1);
        let rules = vec![newer, older, low];
        assert_eq!(resolve_price(&rules, "wa", "ng", dec!(100)), dec!(120));
    }

    #[test]
    fn inactive_and_foreign_rules_are_ignored() {
        let mut inactive = rule(Some("wa"), Some("ng"), ProfitType::Fixed, dec!(500), 0);
        inactive.is_active = false;
        let other_service = rule(Some("tg"), Some("ng"), ProfitType::Fixed, dec!(700), 0);
        assert_eq!(
            resolve_price(&[inactive, other_service], "wa", "ng", dec!(100)),
            dec!(100)
        );
    }

    #[test]
    fn percentage_profit_is_rounded_to_cents() {
        let rules = vec![rule(None, None, ProfitType::Percentage, dec!(12.5), 0)];
        assert_eq!(resolve_price(&rules, "wa", "ng", dec!(0.99)), dec!(1.11));
    }

    #[test]
    fn preferred_provider_wins_when_viable() {
        let offers = vec![offer("a", 10, dec!(100)), offer("b", 1, dec!(500))];
        let chosen = select_offer(&offers, &[], "wa", "ng", Some("b")).unwrap();
        assert_eq!(chosen.offer.provider_id, "b");
        assert_eq!(chosen.final_price, dec!(500));

        let fallback = select_offer(&offers, &[], "wa", "ng", Some("missing")).unwrap();
        assert_eq!(fallback.offer.provider_id, "a");
    }

    #[test]
    fn priority_then_price_orders_providers() {
        let offers = vec![
            offer("cheap-low", 1, dec!(50)),
            offer("dear-high", 5, dec!(300)),
            offer("cheap-high", 5, dec!(200)),
        ];
        let chosen = select_offer(&offers, &[], "wa", "ng", None).unwrap();
        assert_eq!(chosen.offer.provider_id, "cheap-high");
        assert!(select_offer(&[], &[], "wa", "ng", None).is_none());
    }

    #[test]
    fn offers_that_would_sell_at_or_below_zero_are_skipped() {
        let offers = vec![offer("free", 9, dec!(0)), offer("cheap", 5, dec!(100))];
        let picked = select_offer(&offers, &[], "wa", "ng", Some("free")).unwrap();
        assert_eq!(picked.offer.provider_id, "cheap");

        let discount = vec![rule(None, None, ProfitType::Fixed, dec!(-100), 0)];
        assert!(select_offer(&offers[1..], &discount, "wa", "ng", None).is_none());
    }
}
