use serde::{Deserialize, Serialize};

/// Lower and upper concentration bounds enforced on every write.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcentrationClamp {
    pub lower: f64,
    pub upper: f64,
}

impl Default for ConcentrationClamp {
    fn default() -> Self {
        ConcentrationClamp { lower: 0.0, upper: 1e15 }
    }
}

impl ConcentrationClamp {
    pub fn new(lower: f64, upper: f64) -> Self {
        ConcentrationClamp { lower, upper }
    }

    #[inline(always)]
    pub fn apply(&self, value: f64) -> f64 {
        value.max(self.lower).min(self.upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_both_sides() {
        let clamp = ConcentrationClamp::new(-1.0, 2.0);
        assert_eq!(clamp.apply(3.0), 2.0);
        assert_eq!(clamp.apply(-3.0), -1.0);
        assert_eq!(clamp.apply(0.25), 0.25);
    }

    #[test]
    fn default_keeps_values_non_negative() {
        let clamp = ConcentrationClamp::default();
        assert_eq!(clamp.apply(-0.5), 0.0);
        assert_eq!(clamp.apply(1e20), 1e15);
    }
}
