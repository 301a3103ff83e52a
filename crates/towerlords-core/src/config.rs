//! Match-level configuration: timers, limits, and the catalog-level curves
//! left to product data by the original design (spec §6.4, §9 Open
//! Questions).

use serde::{Deserialize, Serialize};

/// Tunables shared by every match (spec §6.4).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchConfig {
    pub hand_max: u32,
    pub board_size: usize,
    pub shop_size_by_level: [u32; 5],
    pub round_shop_ms: u64,
    pub ticks_to_reach: u32,
    pub sim_tick_ms: u32,
    pub draw_per_round: u32,
    pub gold_per_round: i32,
    /// Not in the published constants table (spec §6.4); decided in
    /// SPEC_FULL.md's Open Questions as equal to `GOLD_PER_ROUND`.
    pub starting_gold: i32,
    pub max_reroll_per_round_cost_increment: i32,
    /// Whether clients may send `MATCH_END_ROUND` (spec §9 Open Questions:
    /// "opt-in only", default off).
    pub end_round_enabled: bool,
    pub tower_curve: TowerCurve,
    pub rarity_weights: RarityWeightTable,
    /// Ring buffer capacity for a match's chat history (spec §6.4 `CHAT_RING`).
    pub chat_ring: usize,
    /// `(max messages, window milliseconds)` for chat rate limiting
    /// (spec §6.4 `CHAT_RATE`: "5 msgs / 10 s").
    pub chat_rate: (u32, i64),
    pub chat_max_len: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            hand_max: 7,
            board_size: 7,
            shop_size_by_level: [3, 4, 4, 5, 5],
            round_shop_ms: 30_000,
            ticks_to_reach: 10,
            sim_tick_ms: 100,
            draw_per_round: 2,
            gold_per_round: 5,
            starting_gold: 5,
            max_reroll_per_round_cost_increment: 1,
            end_round_enabled: false,
            tower_curve: TowerCurve::default(),
            rarity_weights: RarityWeightTable::default(),
            chat_ring: 50,
            chat_rate: (5, 10_000),
            chat_max_len: 500,
        }
    }
}

/// Tower HP/DPS/upgrade-cost schedule by level (spec §9 Open Questions,
/// decided in SPEC_FULL.md: fixed, monotonic schedule). Index 0 is level 1.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TowerCurve {
    pub hp_max_by_level: [i32; 5],
    pub dps_by_level: [i32; 5],
    /// Cost to upgrade from level `N` (1-indexed) to `N+1`; indexed by
    /// `level - 1`, so it has one fewer entry than the level count.
    pub upgrade_cost_by_level: [i32; 4],
}

impl Default for TowerCurve {
    fn default() -> Self {
        Self {
            hp_max_by_level: [100, 150, 220, 310, 420],
            dps_by_level: [10, 14, 19, 25, 32],
            upgrade_cost_by_level: [40, 70, 110, 160],
        }
    }
}

impl TowerCurve {
    pub fn hp_max(&self, level: u8) -> i32 {
        self.hp_max_by_level[level.saturating_sub(1) as usize]
    }

    pub fn dps(&self, level: u8) -> i32 {
        self.dps_by_level[level.saturating_sub(1) as usize]
    }

    /// Cost to upgrade away from `level`, or `None` at the cap (spec §4.5
    /// `TOWER_UPGRADE` denial `MAX_LEVEL`).
    pub fn upgrade_cost(&self, level: u8) -> Option<i32> {
        self.upgrade_cost_by_level
            .get(level.saturating_sub(1) as usize)
            .copied()
    }

    pub const MAX_LEVEL: u8 = 5;
}

/// Rarity weights widen toward rarer buckets as `towerLevel` increases
/// (spec §4.2). Row index is `level - 1`; columns are
/// `[common, uncommon, rare, epic, legendary]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RarityWeightTable {
    pub by_level: [[u32; 5]; 5],
}

impl Default for RarityWeightTable {
    fn default() -> Self {
        Self {
            by_level: [
                [70, 20, 8, 2, 0],
                [55, 25, 14, 5, 1],
                [40, 28, 20, 9, 3],
                [35, 29, 21, 11, 4],
                [30, 30, 20, 15, 5],
            ],
        }
    }
}

impl RarityWeightTable {
    pub fn weights_for_level(&self, level: u8) -> [u32; 5] {
        let idx = level.saturating_sub(1).min(4) as usize;
        self.by_level[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tower_curve_is_monotonic() {
        let curve = TowerCurve::default();
        for level in 1..5u8 {
            assert!(curve.hp_max(level) < curve.hp_max(level + 1));
            assert!(curve.dps(level) < curve.dps(level + 1));
        }
        for window in curve.upgrade_cost_by_level.windows(2) {
            assert!(window[0] < window[1]);
        }
        assert_eq!(curve.upgrade_cost(5), None);
    }

    #[test]
    fn rarity_weights_widen_with_level() {
        let table = RarityWeightTable::default();
        let low = table.weights_for_level(1);
        let high = table.weights_for_level(5);
        assert!(low[4] < high[4], "legendary weight should widen with level");
        assert_eq!(low.iter().sum::<u32>(), 100);
        assert_eq!(high.iter().sum::<u32>(), 100);
    }
}
