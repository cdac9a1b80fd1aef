//! Market price items: a level 1 quote keyed by field id.

use rand::rngs::StdRng;
use rand::Rng;
use serde_json::{json, Map, Value};

use crate::price_generator::{round_price, PriceTick};

/// Last trade price.
pub const TRDPRC_1: u16 = 6;
/// Best bid.
pub const BID: u16 = 22;
/// Best ask.
pub const ASK: u16 = 25;
/// Accumulated volume.
pub const ACVOL_1: u16 = 32;
/// Time of the last trade, `HH:MM:SS` UTC.
pub const TRDTIM_1: u16 = 5;

/// Level 1 data of a single market price item.
///
/// One instance is shared by every stream that has the item open; each
/// update tick moves the prices and adds to the accumulated volume.
#[derive(Clone, Debug, PartialEq)]
pub struct MarketPriceItem {
    /// Item name, e.g. `"TRI.N"`.
    pub name: String,

    /// Last trade price.
    pub trade_price: f64,

    /// Best bid.
    pub bid: f64,

    /// Best ask.
    pub ask: f64,

    /// Volume accumulated since the item was created.
    pub volume: u64,

    /// Time of the last trade in **milliseconds** since the UNIX epoch.
    pub trade_time: u64,
}

impl MarketPriceItem {
    /// Creates an item with a random price in `[10, 1000)` and a narrow spread.
    ///
    /// # Examples
    ///
    /// ```
    /// use market_provider::market_price::MarketPriceItem;
    /// let item = MarketPriceItem::new("TRI.N", 0);
    /// assert_eq!(item.name, "TRI.N");
    /// assert!(item.bid < item.ask);
    /// ```
    pub fn new(name: &str, now_ms: u64) -> Self {
        let trade_price = 10.0 + rand::random::<f64>() * 990.0;
        let mut item = MarketPriceItem {
            name: name.to_string(),
            trade_price,
            bid: 0.0,
            ask: 0.0,
            volume: 0,
            trade_time: now_ms,
        };
        item.quote_around_trade();
        item
    }

    fn quote_around_trade(&mut self) {
        self.bid = round_price(self.trade_price * 0.9995);
        self.ask = round_price(self.trade_price * 1.0005);
        self.trade_price = round_price(self.trade_price);
    }

    /// Field list keyed by field id, as carried in refresh and update payloads.
    pub fn fields(&self) -> Value {
        let mut fields = Map::new();
        fields.insert(TRDPRC_1.to_string(), json!(self.trade_price));
        fields.insert(BID.to_string(), json!(self.bid));
        fields.insert(ASK.to_string(), json!(self.ask));
        fields.insert(ACVOL_1.to_string(), json!(self.volume));
        fields.insert(TRDTIM_1.to_string(), json!(trade_time_text(self.trade_time)));
        json!({ "fields": fields })
    }
}

impl PriceTick for MarketPriceItem {
    fn apply_tick(&mut self, multiplier: f64, rng: &mut StdRng, now_ms: u64) {
        self.trade_price *= multiplier;
        self.quote_around_trade();
        self.volume += rng.gen_range(100..1100);
        self.trade_time = now_ms;
    }
}

/// Formats epoch milliseconds as the `HH:MM:SS` time of day (UTC).
pub fn trade_time_text(epoch_ms: u64) -> String {
    let secs_of_day = (epoch_ms / 1000) % 86_400;
    format!(
        "{:02}:{:02}:{:02}",
        secs_of_day / 3600,
        (secs_of_day / 60) % 60,
        secs_of_day % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_fields_keyed_by_fid() {
        let item = MarketPriceItem {
            name: "TRI.N".into(),
            trade_price: 100.0,
            bid: 99.95,
            ask: 100.05,
            volume: 1200,
            trade_time: 3_723_000,
        };

        let fields = item.fields();

        assert_eq!(fields["fields"]["6"], 100.0);
        assert_eq!(fields["fields"]["22"], 99.95);
        assert_eq!(fields["fields"]["25"], 100.05);
        assert_eq!(fields["fields"]["32"], 1200);
        assert_eq!(fields["fields"]["5"], "01:02:03");
    }

    #[test]
    fn test_tick_moves_price_and_accumulates_volume() {
        let mut item = MarketPriceItem::new("IBM.N", 0);
        let before = item.trade_price;
        let mut rng = StdRng::seed_from_u64(7);

        item.apply_tick(1.01, &mut rng, 5_000);

        assert!(item.trade_price > before);
        assert!(item.bid < item.trade_price && item.trade_price < item.ask);
        assert!(item.volume >= 100);
        assert_eq!(item.trade_time, 5_000);
    }

    #[test]
    fn test_trade_time_wraps_at_midnight() {
        assert_eq!(trade_time_text(86_400_000 + 59_000), "00:00:59");
    }
}
