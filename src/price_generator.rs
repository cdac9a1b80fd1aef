//! Random walk that moves item prices on every update tick.

use crate::errors::PriceGeneratorError;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, LogNormal};
use rayon::prelude::*;
use std::time::{SystemTime, UNIX_EPOCH};

/// Item data that moves with each update tick.
pub trait PriceTick {
    /// Scales prices by `multiplier` and refreshes everything else that
    /// changes on a tick. `now_ms` is the tick time since the UNIX epoch.
    fn apply_tick(&mut self, multiplier: f64, rng: &mut StdRng, now_ms: u64);
}

/// A parallel log-normal random walk over item prices.
///
/// Items are updated in parallel on rayon's global pool. The call blocks
/// until every item has moved, so callers on the loop thread never see a
/// half-applied tick. Each worker creates its own RNG (`StdRng`), so no
/// generator state is shared.
#[derive(Debug)]
pub struct PriceGenerator {
    /// Volatility (standard deviation) of the log-normal price distribution.
    volatility: f64,
}

impl PriceGenerator {
    /// Creates a new price generator.
    ///
    /// # Arguments
    /// * `volatility`: price fluctuation factor (must be in `(0, 1]`).
    ///
    /// # Errors
    /// Returns [`PriceGeneratorError::InvalidVolatility`] if `volatility <= 0.0` or `> 1.0`.
    pub fn new(volatility: f64) -> Result<Self, PriceGeneratorError> {
        if volatility <= 0.0 || volatility > 1.0 {
            return Err(PriceGeneratorError::InvalidVolatility(volatility));
        }
        Ok(Self { volatility })
    }

    /// Volatility the generator was built with.
    pub fn volatility(&self) -> f64 {
        self.volatility
    }

    /// Advances every item by one tick.
    ///
    /// Works with slices, `Vec`, `BTreeMap::values_mut`, or any other
    /// container that provides an iterator over `&mut T`.
    pub fn update_items<'a, T, I>(&self, items: I) -> Result<(), PriceGeneratorError>
    where
        T: PriceTick + Send + 'a,
        I: IntoIterator<Item = &'a mut T>,
        I::IntoIter: Send + 'a,
    {
        let log_normal = LogNormal::new(0.0, self.volatility)?;
        let now_ms = now_millis()?;

        items.into_iter().par_bridge().for_each(|item| {
            let mut rng = StdRng::from_entropy();
            let multiplier = log_normal.sample(&mut rng);
            item.apply_tick(multiplier, &mut rng, now_ms);
        });

        Ok(())
    }
}

/// Current time in milliseconds since the UNIX epoch.
pub fn now_millis() -> Result<u64, PriceGeneratorError> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(PriceGeneratorError::TimeError)?
        .as_millis() as u64)
}

/// Rounds a price to four decimals.
pub(crate) fn round_price(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Debug)]
    struct Walker {
        price: f64,
        ticks: u32,
        at: u64,
    }

    impl PriceTick for Walker {
        fn apply_tick(&mut self, multiplier: f64, _rng: &mut StdRng, now_ms: u64) {
            self.price *= multiplier;
            self.ticks += 1;
            self.at = now_ms;
        }
    }

    fn walkers() -> Vec<Walker> {
        [150.0, 300.0, 700.0, 2800.0]
            .iter()
            .map(|&price| Walker {
                price,
                ticks: 0,
                at: 0,
            })
            .collect()
    }

    #[test]
    fn test_update_vec() {
        let mut items = walkers();
        let generator = PriceGenerator::new(0.1).unwrap();

        let original: Vec<f64> = items.iter().map(|p| p.price).collect();
        generator.update_items(items.iter_mut()).unwrap();

        for (i, p) in items.iter().enumerate() {
            assert_ne!(p.price, original[i]);
            assert_eq!(p.ticks, 1);
            assert!(p.at > 0);
        }
    }

    #[test]
    fn test_update_map_values() {
        let mut items: BTreeMap<usize, Walker> = walkers().into_iter().enumerate().collect();
        let generator = PriceGenerator::new(0.2).unwrap();

        generator.update_items(items.values_mut()).unwrap();
        generator.update_items(items.values_mut()).unwrap();

        assert!(items.values().all(|p| p.ticks == 2));
    }

    #[test]
    fn test_update_returns_after_every_item_moved() {
        let mut items: Vec<Walker> = (0..4096)
            .map(|i| Walker {
                price: 1.0 + i as f64,
                ticks: 0,
                at: 0,
            })
            .collect();
        let generator = PriceGenerator::new(0.05).unwrap();

        generator.update_items(items.iter_mut()).unwrap();

        assert!(items.iter().all(|p| p.ticks == 1 && p.at > 0));
    }

    #[test]
    fn test_invalid_volatility() {
        assert!(matches!(
            PriceGenerator::new(0.0),
            Err(PriceGeneratorError::InvalidVolatility(_))
        ));
        assert!(matches!(
            PriceGenerator::new(1.5),
            Err(PriceGeneratorError::InvalidVolatility(_))
        ));
    }

    #[test]
    fn test_round_price() {
        assert_eq!(round_price(1.234_56), 1.2346);
    }
}
