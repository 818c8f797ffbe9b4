/// Durability and hunger multipliers; `None` disables that cost.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CostSettings {
    pub durability_multiplier: Option<f64>,
    pub hunger_multiplier: Option<f64>,
}

impl CostSettings {
    pub fn new(durability_multiplier: Option<f64>, hunger_multiplier: Option<f64>) -> Self {
        Self {
            durability_multiplier,
            hunger_multiplier,
        }
    }

    /// Scale both multipliers by skill reductions, never below half.
    ///
    /// `durability_cut` and `hunger_cut` are fractions in `0.0..=1.0`.
    pub fn reduced(self, durability_cut: f64, hunger_cut: f64) -> Self {
        let scale = |m: f64, cut: f64| m * (1.0 - cut.clamp(0.0, 1.0)).max(0.5);
        Self {
            durability_multiplier: self.durability_multiplier.map(|m| scale(m, durability_cut)),
            hunger_multiplier: self.hunger_multiplier.map(|m| scale(m, hunger_cut)),
        }
    }
}

/// Tool wear and hunger charged for a batch of blocks.
pub struct ResourceCostModel;

impl ResourceCostModel {
    /// `ceil(ceil(blocks * multiplier) / (unbreaking + 1))`.
    pub fn tool_damage(blocks: u32, multiplier: Option<f64>, unbreaking: u32) -> u32 {
        let Some(multiplier) = multiplier else {
            return 0;
        };
        if blocks == 0 || multiplier <= 0.0 {
            return 0;
        }
        let raw = (f64::from(blocks) * multiplier).ceil() as u64;
        raw.div_ceil(u64::from(unbreaking) + 1)
            .try_into()
            .unwrap_or(u32::MAX)
    }

    pub fn hunger_delta(blocks: u32, multiplier: Option<f64>) -> f64 {
        multiplier.map_or(0.0, |m| f64::from(blocks) * m.max(0.0))
    }

    pub fn food_after(current: f64, delta: f64) -> f64 {
        (current - delta).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn damage_scales_and_unbreaking_divides() {
        assert_eq!(ResourceCostModel::tool_damage(26, Some(1.0), 0), 26);
        assert_eq!(ResourceCostModel::tool_damage(26, Some(1.0), 1), 13);
        assert_eq!(ResourceCostModel::tool_damage(26, Some(1.0), 3), 7);
        assert_eq!(ResourceCostModel::tool_damage(10, Some(0.25), 0), 3);
        assert_eq!(ResourceCostModel::tool_damage(1, Some(0.1), 3), 1);
    }

    #[test]
    fn disabled_costs_are_zero() {
        assert_eq!(ResourceCostModel::tool_damage(64, None, 0), 0);
        assert_eq!(ResourceCostModel::tool_damage(0, Some(1.0), 0), 0);
        assert_eq!(ResourceCostModel::hunger_delta(64, None), 0.0);
    }

    #[test]
    fn hunger_and_food_floor() {
        let delta = ResourceCostModel::hunger_delta(26, Some(0.1));
        assert!((delta - 2.6).abs() < 1e-9);
        assert_eq!(ResourceCostModel::food_after(2.0, 5.0), 0.0);
        assert!((ResourceCostModel::food_after(20.0, delta) - 17.4).abs() < 1e-9);
    }

    #[test]
    fn skill_reductions_floor_at_half() {
        let base = CostSettings::new(Some(1.0), Some(0.2));
        let r = base.reduced(0.10, 0.20);
        assert!((r.durability_multiplier.unwrap() - 0.9).abs() < 1e-9);
        assert!((r.hunger_multiplier.unwrap() - 0.16).abs() < 1e-9);
        let floored = base.reduced(0.9, 2.0);
        assert!((floored.durability_multiplier.unwrap() - 0.5).abs() < 1e-9);
        assert!((floored.hunger_multiplier.unwrap() - 0.1).abs() < 1e-9);
        assert_eq!(CostSettings::default().reduced(0.5, 0.5), CostSettings::default());
    }
}
