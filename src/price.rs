use log::debug;
use rand::Rng;

use crate::config::PriceConfig;

/// Outcome of applying one trade to the market price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TradeImpact {
    /// Price moved; noise and the floor clamp already applied.
    Committed { new_price: f64 },
    /// Sell-side circuit breaker tripped; the price is unchanged.
    Rejected { impact: f64 },
}

impl TradeImpact {
    pub fn is_rejected(&self) -> bool {
        matches!(self, TradeImpact::Rejected { .. })
    }
}

/// Stateful synthetic market price with linear impact, background noise
/// and a single-trade crash circuit breaker. Mutated only under the trade
/// settlement lock; trade execution and block append are logically one
/// operation.
#[derive(Debug)]
pub struct PriceModel {
    current: f64,
    config: PriceConfig,
}

impl PriceModel {
    pub fn new(initial_price: f64, config: PriceConfig) -> Self {
        let floor = config.price_floor;
        Self {
            current: initial_price.max(floor),
            config,
        }
    }

    pub fn current_price(&self) -> f64 {
        self.current
    }

    /// Apply the impact of one trade.
    ///
    /// A sell whose impact magnitude exceeds `max_drop_fraction` of the
    /// current price is rejected without touching the price. Committed
    /// trades additionally receive a bounded symmetric random perturbation
    /// and are clamped to the configured floor.
    pub fn execute_trade(&mut self, amount: f64, is_buy: bool) -> TradeImpact {
        let mut impact = amount * self.config.impact_factor * self.current;
        if !is_buy {
            impact = -impact;
        }

        if !is_buy && impact.abs() > self.current * self.config.max_drop_fraction {
            debug!(
                "Circuit breaker: sell impact {:.6} exceeds {:.0}% of price {:.6}",
                impact,
                self.config.max_drop_fraction * 100.0,
                self.current
            );
            return TradeImpact::Rejected { impact };
        }

        self.current += impact;

        let noise = rand::thread_rng()
            .gen_range(-self.config.base_volatility..=self.config.base_volatility);
        self.current *= 1.0 + noise;

        if self.current < self.config.price_floor {
            self.current = self.config.price_floor;
        }

        TradeImpact::Committed { new_price: self.current }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(initial: f64, impact_factor: f64, max_drop: f64) -> PriceModel {
        PriceModel::new(
            initial,
            PriceConfig {
                initial_price: initial,
                impact_factor,
                base_volatility: 0.0,
                max_drop_fraction: max_drop,
                price_floor: 0.01,
            },
        )
    }

    #[test]
    fn test_buy_raises_and_sell_lowers() {
        let mut m = model(1.0, 0.001, 0.9);
        assert!(matches!(m.execute_trade(100.0, true), TradeImpact::Committed { .. }));
        assert!(m.current_price() > 1.0);

        let before = m.current_price();
        m.execute_trade(100.0, false);
        assert!(m.current_price() < before);
    }

    #[test]
    fn test_circuit_breaker_rejects_oversized_sell() {
        // impact = 100 * 0.006 * 1.0 = 0.6 > 1.0 * 0.5 -> rejected
        let mut m = model(1.0, 0.006, 0.5);
        let outcome = m.execute_trade(100.0, false);
        assert!(outcome.is_rejected());
        assert_eq!(m.current_price(), 1.0);
    }

    #[test]
    fn test_circuit_breaker_never_applies_to_buys() {
        let mut m = model(1.0, 0.006, 0.5);
        let outcome = m.execute_trade(100.0, true);
        assert!(!outcome.is_rejected());
        assert!(m.current_price() > 1.0);
    }

    #[test]
    fn test_floor_clamp() {
        let mut m = model(0.02, 0.5, 1.0);
        // Large sell pushes the price below the floor; clamp holds.
        m.execute_trade(1.9, false);
        assert!(m.current_price() >= 0.01);
    }
}
