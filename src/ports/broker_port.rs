//! Order placement port trait.

use chrono::NaiveDateTime;

use crate::domain::error::IntratraderError;
use crate::domain::position::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderIntent {
    Open,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderRequest {
    pub timestamp: NaiveDateTime,
    /// Direction of the position being opened or closed.
    pub direction: Direction,
    pub intent: OrderIntent,
    pub reference_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub price: f64,
    pub timestamp: NaiveDateTime,
}

pub trait BrokerPort {
    fn place_order(&self, order: &OrderRequest) -> Result<Fill, IntratraderError>;
}
