use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Token counts reported by a vendor for one exchange
///
/// Counts come straight from the vendor's usage block; nothing here estimates
/// tokens locally. Reasoning tokens are folded into `output`, which is how
/// every supported vendor bills them.
///
/// # Examples
///
/// ```
/// use crosstalk_core::TokenUsage;
///
/// let mut total = TokenUsage::new(100, 20);
/// total += TokenUsage::new(50, 5);
/// assert_eq!(total, TokenUsage::new(150, 25));
/// assert_eq!(total.total(), 175);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt side tokens
    pub input: u64,
    /// Completion side tokens, including reasoning
    pub output: u64,
}

impl TokenUsage {
    pub const fn new(input: u64, output: u64) -> Self {
        Self { input, output }
    }

    /// Returns input plus output
    pub fn total(&self) -> u64 {
        self.input + self.output
    }

    pub fn is_zero(&self) -> bool {
        self.input == 0 && self.output == 0
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: Self) -> Self::Output {
        TokenUsage {
            input: self.input.saturating_add(rhs.input),
            output: self.output.saturating_add(rhs.output),
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for TokenUsage {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(TokenUsage::default(), Add::add)
    }
}

impl<'a> Sum<&'a TokenUsage> for TokenUsage {
    fn sum<I: Iterator<Item = &'a TokenUsage>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_zero() {
        let usage = TokenUsage::default();
        assert!(usage.is_zero());
        assert_eq!(usage.total(), 0);
    }

    #[test]
    fn test_sum() {
        let parts = [
            TokenUsage::new(10, 1),
            TokenUsage::new(20, 2),
            TokenUsage::new(30, 3),
        ];
        let total: TokenUsage = parts.iter().sum();
        assert_eq!(total, TokenUsage::new(60, 6));

        let reversed: TokenUsage = parts.iter().rev().copied().sum();
        assert_eq!(reversed, total);
    }

    #[test]
    fn test_add_saturates() {
        let big = TokenUsage::new(u64::MAX, 1);
        assert_eq!((big + TokenUsage::new(1, 1)).input, u64::MAX);
    }

    #[test]
    fn test_serialization() {
        let usage = TokenUsage::new(12, 34);
        let json = serde_json::to_value(usage).unwrap();
        assert_eq!(json, serde_json::json!({"input": 12, "output": 34}));
    }
}
