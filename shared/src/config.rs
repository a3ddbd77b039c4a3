/// Round rules. Loaded once at startup; never mutated while a round runs.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameConfig {
    /// Simulation ticks per second
    pub tick_rate_hz: u32,
    /// Seconds between the scatter finishing and the round going active
    pub countdown_seconds: u32,
    pub max_lives: u32,
    pub swap_interval_seconds: u32,
    /// Lower bound of the scatter coordinate magnitude
    pub scatter_min_coord: i32,
    /// Upper bound of the scatter coordinate magnitude
    pub scatter_max_coord: i32,
    /// Minimum horizontal distance between two scatter points (blocks)
    pub min_player_distance: i32,
    /// Placement attempts per participant before falling back
    pub placement_attempts: u32,
    /// Ceiling on simultaneously in-flight terrain cell loads
    pub max_parallel_chunk_loads: usize,
    /// Cells loaded around a candidate before it is inspected
    pub search_margin_cells: i32,
    /// Cells warmed around a point once it is accepted
    pub found_prewarm_cells: i32,
    pub near_radius_cells: i32,
    pub far_radius_cells: i32,
    /// Damage immunity granted after a scatter or swap teleport (ticks)
    pub invulnerability_ticks: u32,
    /// Fallback placement offset from the world spawn, lower bound (blocks)
    pub fallback_offset_min: i32,
    /// Fallback placement offset from the world spawn, upper bound (blocks)
    pub fallback_offset_max: i32,
    /// Item ids excluded from the target pool. `*` matches any run of characters.
    pub banned_items: Vec<String>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 20,
            countdown_seconds: 10,
            max_lives: 5,
            swap_interval_seconds: 300,
            scatter_min_coord: 10_000,
            scatter_max_coord: 100_000,
            min_player_distance: 10_000,
            placement_attempts: 256,
            max_parallel_chunk_loads: 8,
            search_margin_cells: 2,
            found_prewarm_cells: 3,
            near_radius_cells: 6,
            far_radius_cells: 12,
            invulnerability_ticks: 500, // ~25s at 20Hz
            fallback_offset_min: 5_000,
            fallback_offset_max: 10_000,
            banned_items: [
                "minecraft:bedrock",
                "minecraft:barrier",
                "minecraft:structure_void",
                "minecraft:*command_block",
                "minecraft:jigsaw",
                "minecraft:structure_block",
                "minecraft:end_portal_frame",
                "minecraft:end_portal",
                "minecraft:nether_portal",
                "minecraft:light",
                "minecraft:debug_stick",
                "minecraft:knowledge_book",
                "minecraft:bundle",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl GameConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_rate_hz == 0 || self.tick_rate_hz > 1000 {
            return Err("tick_rate_hz must be in 1..=1000".to_string());
        }
        if self.max_lives == 0 {
            return Err("max_lives must be > 0".to_string());
        }
        if !(10..=3600).contains(&self.swap_interval_seconds) {
            return Err("swap_interval_seconds must be in 10..=3600".to_string());
        }
        if !(0..=1_000_000).contains(&self.scatter_min_coord) {
            return Err("scatter_min_coord must be in 0..=1000000".to_string());
        }
        if !(1_000..=1_000_000).contains(&self.scatter_max_coord) {
            return Err("scatter_max_coord must be in 1000..=1000000".to_string());
        }
        if self.scatter_max_coord < self.scatter_min_coord {
            return Err("scatter_max_coord must be >= scatter_min_coord".to_string());
        }
        if self.min_player_distance < 0 {
            return Err("min_player_distance must be >= 0".to_string());
        }
        if self.placement_attempts == 0 {
            return Err("placement_attempts must be > 0".to_string());
        }
        if self.max_parallel_chunk_loads == 0 {
            return Err("max_parallel_chunk_loads must be > 0".to_string());
        }
        if self.search_margin_cells < 0 || self.found_prewarm_cells < 0 {
            return Err("search and pre-warm margins must be >= 0".to_string());
        }
        if self.near_radius_cells < 0 || self.far_radius_cells < self.near_radius_cells {
            return Err("far_radius_cells must be >= near_radius_cells >= 0".to_string());
        }
        if self.fallback_offset_min < 0 || self.fallback_offset_max < self.fallback_offset_min {
            return Err("fallback offsets must satisfy 0 <= min <= max".to_string());
        }
        Ok(())
    }

    pub fn tick_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.tick_rate_hz as f64)
    }

    pub fn swap_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.swap_interval_seconds as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_game_config_is_valid() {
        let config = GameConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn inverted_scatter_band_invalid() {
        let config = GameConfig {
            scatter_min_coord: 50_000,
            scatter_max_coord: 20_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn far_radius_smaller_than_near_invalid() {
        let config = GameConfig {
            near_radius_cells: 6,
            far_radius_cells: 3,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn swap_interval_out_of_range_invalid() {
        let config = GameConfig {
            swap_interval_seconds: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_uses_defaults_for_missing_fields() {
        let config: GameConfig =
            serde_json::from_str(r#"{"swapIntervalSeconds": 120, "maxLives": 3}"#).unwrap();
        assert_eq!(config.swap_interval_seconds, 120);
        assert_eq!(config.max_lives, 3);
        assert_eq!(config.countdown_seconds, 10);
        assert!(config.validate().is_ok());
    }
}
