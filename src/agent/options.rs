//! Generation options passed through to the backend.
//!
//! The relay never interprets these beyond serializing them; only the token
//! budget is drawn per call so response lengths vary.

use rand::Rng;
use serde::Serialize;
use std::ops::RangeInclusive;

/// Budget range for the occasional short thought.
pub const SHORT_BUDGET: RangeInclusive<u32> = 30..=79;
/// Budget range for the usual medium or long thought.
pub const LONG_BUDGET: RangeInclusive<u32> = 100..=299;
/// Share of calls that draw from `SHORT_BUDGET`.
pub const SHORT_BUDGET_PROBABILITY: f64 = 0.2;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub num_predict: u32,
    pub top_p: f32,
    pub repeat_penalty: f32,
}

impl GenerationOptions {
    /// Default sampling parameters with a freshly drawn token budget.
    pub fn randomized<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            num_predict: draw_token_budget(rng),
            ..Self::default()
        }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.85,
            num_predict: 200,
            top_p: 0.9,
            repeat_penalty: 1.15,
        }
    }
}

/// 20% of draws land in 30..=79, the rest in 100..=299.
pub fn draw_token_budget<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    if rng.gen_bool(SHORT_BUDGET_PROBABILITY) {
        rng.gen_range(SHORT_BUDGET)
    } else {
        rng.gen_range(LONG_BUDGET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_budget_always_in_one_of_the_ranges() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..2_000 {
            let budget = draw_token_budget(&mut rng);
            assert!(SHORT_BUDGET.contains(&budget) || LONG_BUDGET.contains(&budget));
        }
    }

    #[test]
    fn test_budget_split_is_roughly_eighty_twenty() {
        let mut rng = StdRng::seed_from_u64(42);
        let draws = 10_000;
        let short = (0..draws)
            .filter(|_| SHORT_BUDGET.contains(&draw_token_budget(&mut rng)))
            .count();
        let share = short as f64 / draws as f64;
        assert!((0.17..0.23).contains(&share), "short share was {share}");
    }

    #[test]
    fn test_options_serialize_as_backend_block() {
        let json = serde_json::to_value(GenerationOptions::default()).unwrap();
        assert_eq!(json["num_predict"], 200);
        assert!(json.get("top_p").is_some());
        assert!(json.get("repeat_penalty").is_some());
    }
}
