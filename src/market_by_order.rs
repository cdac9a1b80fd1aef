//! Market-by-order items: an order-level book per item name.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::defs::ORDERS_PER_BOOK;
use crate::price_generator::{round_price, PriceTick};

/// Side of the book an order rests on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    /// Buy order.
    Bid,
    /// Sell order.
    Ask,
}

/// A resting order in the book.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Order id, unique within the book.
    pub id: String,
    /// Book side.
    pub side: OrderSide,
    /// Limit price.
    pub price: f64,
    /// Order quantity.
    pub size: u64,
}

/// Order-level book of a single item.
#[derive(Clone, Debug, PartialEq)]
pub struct MarketByOrderItem {
    /// Item name, e.g. `"IBM.N"`.
    pub name: String,
    /// Resting orders, bids and asks interleaved.
    pub orders: Vec<Order>,
    /// Time of the last change in milliseconds since the UNIX epoch.
    pub timestamp: u64,
}

impl MarketByOrderItem {
    /// Seeds a book with alternating bid and ask orders around a random mid price.
    pub fn new(name: &str, now_ms: u64) -> Self {
        let mid = 10.0 + rand::random::<f64>() * 990.0;
        let orders = (0..ORDERS_PER_BOOK)
            .map(|i| {
                let step = 0.001 * (i / 2 + 1) as f64;
                let (side, price) = if i % 2 == 0 {
                    (OrderSide::Bid, mid * (1.0 - step))
                } else {
                    (OrderSide::Ask, mid * (1.0 + step))
                };
                Order {
                    id: format!("{}{}", 100 + i, name),
                    side,
                    price: round_price(price),
                    size: 100 * (i as u64 + 1),
                }
            })
            .collect();

        Self {
            name: name.to_string(),
            orders,
            timestamp: now_ms,
        }
    }

    /// Full book, as carried in refresh and update payloads.
    pub fn book(&self) -> Value {
        json!({ "orders": self.orders })
    }
}

impl PriceTick for MarketByOrderItem {
    fn apply_tick(&mut self, multiplier: f64, rng: &mut StdRng, now_ms: u64) {
        for order in &mut self.orders {
            order.price = round_price(order.price * multiplier);
            order.size = rng.gen_range(1..=10) * 100;
        }
        self.timestamp = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_new_book_alternates_sides() {
        let item = MarketByOrderItem::new("TRI.N", 0);

        assert_eq!(item.orders.len(), ORDERS_PER_BOOK);
        assert_eq!(item.orders[0].side, OrderSide::Bid);
        assert_eq!(item.orders[1].side, OrderSide::Ask);
        assert!(item.orders[0].price < item.orders[1].price);
        assert_eq!(item.orders[0].id, "100TRI.N");
    }

    #[test]
    fn test_book_payload() {
        let item = MarketByOrderItem::new("TRI.N", 0);
        let book = item.book();

        let orders = book["orders"].as_array().unwrap();
        assert_eq!(orders.len(), ORDERS_PER_BOOK);
        assert_eq!(orders[0]["side"], "bid");
        assert_eq!(orders[1]["side"], "ask");
    }

    #[test]
    fn test_tick_reprices_every_order() {
        let mut item = MarketByOrderItem::new("TRI.N", 0);
        let before: Vec<f64> = item.orders.iter().map(|o| o.price).collect();
        let mut rng = StdRng::seed_from_u64(1);

        item.apply_tick(0.98, &mut rng, 42);

        for (order, old) in item.orders.iter().zip(before) {
            assert!(order.price < old);
            assert!(order.size >= 100 && order.size <= 1000);
        }
        assert_eq!(item.timestamp, 42);
    }
}
