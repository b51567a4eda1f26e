//! Simulated broker that fills every order at the quoted price.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::domain::error::IntratraderError;
use crate::domain::position::Direction;
use crate::ports::broker_port::{BrokerPort, Fill, OrderIntent, OrderRequest};

#[derive(Debug, Default)]
pub struct PaperBroker {
    /// Points added against the trader on every fill.
    slippage: f64,
    orders: AtomicUsize,
}

impl PaperBroker {
    pub fn new(slippage: f64) -> Self {
        PaperBroker {
            slippage: slippage.max(0.0),
            orders: AtomicUsize::new(0),
        }
    }

    pub fn orders_placed(&self) -> usize {
        self.orders.load(Ordering::Relaxed)
    }
}

impl BrokerPort for PaperBroker {
    fn place_order(&self, order: &OrderRequest) -> Result<Fill, IntratraderError> {
        if !order.reference_price.is_finite() || order.reference_price <= 0.0 {
            return Err(IntratraderError::Broker {
                reason: format!("invalid reference price {}", order.reference_price),
            });
        }
        let buying = matches!(
            (order.intent, order.direction),
            (OrderIntent::Open, Direction::Long) | (OrderIntent::Close, Direction::Short)
        );
        let price = if buying {
            order.reference_price + self.slippage
        } else {
            order.reference_price - self.slippage
        };
        self.orders.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            intent = ?order.intent,
            direction = %order.direction,
            price,
            "paper fill"
        );
        Ok(Fill {
            price,
            timestamp: order.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn order(intent: OrderIntent, direction: Direction, price: f64) -> OrderRequest {
        OrderRequest {
            timestamp: NaiveDate::from_ymd_opt(2025, 7, 14)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            direction,
            intent,
            reference_price: price,
        }
    }

    #[test]
    fn fills_at_reference_without_slippage() {
        let broker = PaperBroker::default();
        let fill = broker
            .place_order(&order(OrderIntent::Open, Direction::Long, 1000.0))
            .unwrap();
        assert_eq!(fill.price, 1000.0);
        assert_eq!(broker.orders_placed(), 1);
    }

    #[test]
    fn slippage_always_goes_against_the_trader() {
        let broker = PaperBroker::new(0.5);
        let cases = [
            (OrderIntent::Open, Direction::Long, 1000.5),
            (OrderIntent::Close, Direction::Long, 999.5),
            (OrderIntent::Open, Direction::Short, 999.5),
            (OrderIntent::Close, Direction::Short, 1000.5),
        ];
        for (intent, direction, expected) in cases {
            let fill = broker.place_order(&order(intent, direction, 1000.0)).unwrap();
            assert_eq!(fill.price, expected, "{intent:?} {direction}");
        }
        assert_eq!(broker.orders_placed(), 4);
    }

    #[test]
    fn rejects_bad_prices() {
        let broker = PaperBroker::default();
        let err = broker
            .place_order(&order(OrderIntent::Open, Direction::Long, f64::NAN))
            .unwrap_err();
        assert!(matches!(err, IntratraderError::Broker { .. }));
        assert_eq!(broker.orders_placed(), 0);
    }
}
