//! In-memory host used by the binary and the tests.
//!
//! - `SimWorld`: connected players with positions, inventories and flags
//! - `ProceduralTerrain`: deterministic hashed heightmap with optional load
//!   latency and load failures
//! - `SimBots`: bot players that wander, die and occasionally find the target
//! - `RecordingNotifier` / `RecordingProgress`: sinks that keep what they got

use futures_util::future::{BoxFuture, FutureExt};
use lootrush_shared::geometry::{BlockPos, Location, Position};
use lootrush_shared::model::{ItemId, PlayerId, RegionId, RoundPhase};
use lootrush_shared::protocol::{Notice, Progress};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::chunks::ChunkKey;
use crate::error::TerrainError;
use crate::host::{Audience, GameMode, Material, Notifier, PlayerHost, ProgressSink, Terrain};

// === Players ===

#[derive(Debug, Clone)]
pub struct SimPlayer {
    pub id: PlayerId,
    pub name: String,
    pub online: bool,
    pub alive: bool,
    pub location: Location,
    pub inventory: Vec<ItemId>,
    pub respawn: Option<Location>,
    pub invulnerable: bool,
    pub game_mode: GameMode,
}

#[derive(Debug)]
pub struct SimWorld {
    players: BTreeMap<PlayerId, SimPlayer>,
    next_id: u32,
    spawn: Location,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SimWorld {
    pub fn new() -> Self {
        Self::with_spawn(Location::new(
            RegionId::OVERWORLD,
            Position::new(0.5, 65.0, 0.5),
        ))
    }

    pub fn with_spawn(spawn: Location) -> Self {
        Self {
            players: BTreeMap::new(),
            next_id: 1,
            spawn,
        }
    }

    /// Connect a new player at the world spawn.
    pub fn join(&mut self, name: &str) -> PlayerId {
        let id = PlayerId(self.next_id);
        self.next_id += 1;
        self.players.insert(
            id,
            SimPlayer {
                id,
                name: name.to_string(),
                online: true,
                alive: true,
                location: self.spawn,
                inventory: Vec::new(),
                respawn: None,
                invulnerable: false,
                game_mode: GameMode::Survival,
            },
        );
        id
    }

    /// Disconnect. The record is kept so the same id can reconnect.
    pub fn leave(&mut self, id: PlayerId) {
        if let Some(player) = self.players.get_mut(&id) {
            player.online = false;
        }
    }

    pub fn rejoin(&mut self, id: PlayerId) {
        if let Some(player) = self.players.get_mut(&id) {
            player.online = true;
        }
    }

    pub fn player(&self, id: PlayerId) -> Option<&SimPlayer> {
        self.players.get(&id)
    }

    pub fn give(&mut self, id: PlayerId, item: impl Into<String>) {
        if let Some(player) = self.players.get_mut(&id) {
            player.inventory.push(ItemId::new(item));
        }
    }

    pub fn set_location(&mut self, id: PlayerId, to: Location) {
        if let Some(player) = self.players.get_mut(&id) {
            player.location = to;
        }
    }

    /// Shift a player by whole blocks, as if they walked.
    pub fn nudge(&mut self, id: PlayerId, dx: f64, dz: f64) {
        if let Some(player) = self.players.get_mut(&id) {
            player.location.pos.x += dx;
            player.location.pos.z += dz;
        }
    }

    pub fn kill(&mut self, id: PlayerId) {
        if let Some(player) = self.players.get_mut(&id) {
            player.alive = false;
            player.inventory.clear();
        }
    }

    /// Bring a dead player back at their respawn point, or the world spawn.
    pub fn respawn(&mut self, id: PlayerId) {
        let spawn = self.spawn;
        if let Some(player) = self.players.get_mut(&id) {
            player.alive = true;
            player.location = player.respawn.unwrap_or(spawn);
        }
    }

    pub fn online_count(&self) -> usize {
        self.players.values().filter(|p| p.online).count()
    }
}

impl PlayerHost for SimWorld {
    fn online_players(&self) -> Vec<PlayerId> {
        self.players
            .values()
            .filter(|p| p.online)
            .map(|p| p.id)
            .collect()
    }

    fn is_online(&self, id: PlayerId) -> bool {
        self.players.get(&id).is_some_and(|p| p.online)
    }

    fn is_alive(&self, id: PlayerId) -> bool {
        self.players.get(&id).is_some_and(|p| p.online && p.alive)
    }

    fn name(&self, id: PlayerId) -> Option<String> {
        self.players.get(&id).map(|p| p.name.clone())
    }

    fn location(&self, id: PlayerId) -> Option<Location> {
        self.players
            .get(&id)
            .filter(|p| p.online)
            .map(|p| p.location)
    }

    fn teleport(&mut self, id: PlayerId, to: Location) {
        self.set_location(id, to);
    }

    fn clear_inventory(&mut self, id: PlayerId) {
        if let Some(player) = self.players.get_mut(&id) {
            player.inventory.clear();
        }
    }

    fn has_item(&self, id: PlayerId, item: &ItemId) -> bool {
        self.players
            .get(&id)
            .is_some_and(|p| p.inventory.contains(item))
    }

    fn remove_item(&mut self, id: PlayerId, item: &ItemId) {
        if let Some(player) = self.players.get_mut(&id) {
            player.inventory.retain(|held| held != item);
        }
    }

    fn respawn_point(&self, id: PlayerId) -> Option<Location> {
        self.players.get(&id).and_then(|p| p.respawn)
    }

    fn set_respawn_point(&mut self, id: PlayerId, point: Option<Location>) {
        if let Some(player) = self.players.get_mut(&id) {
            player.respawn = point;
        }
    }

    fn set_invulnerable(&mut self, id: PlayerId, invulnerable: bool) {
        if let Some(player) = self.players.get_mut(&id) {
            player.invulnerable = invulnerable;
        }
    }

    fn set_game_mode(&mut self, id: PlayerId, mode: GameMode) {
        if let Some(player) = self.players.get_mut(&id) {
            player.game_mode = mode;
        }
    }

    fn world_spawn(&self) -> Location {
        self.spawn
    }
}

// === Terrain ===

const MIN_Y: i32 = -64;
const SEA_LEVEL: i32 = 62;
/// Heightmap lattice spacing in blocks.
const LATTICE: i32 = 64;

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Deterministic world generator. Cells must be loaded before their columns
/// can be queried, like a real server.
pub struct ProceduralTerrain {
    seed: u64,
    latency: Duration,
    failure_rate: f64,
    loaded: Arc<Mutex<HashSet<ChunkKey>>>,
}

impl ProceduralTerrain {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            latency: Duration::ZERO,
            failure_rate: 0.0,
            loaded: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fraction of cells that always fail to load.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn is_loaded(&self, key: ChunkKey) -> bool {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key)
    }

    fn hash(&self, a: i32, b: i32, salt: u64) -> u64 {
        let packed = ((a as u32 as u64) << 32) | (b as u32 as u64);
        splitmix64(self.seed ^ splitmix64(packed ^ salt.rotate_left(21)))
    }

    fn unit(&self, a: i32, b: i32, salt: u64) -> f64 {
        (self.hash(a, b, salt) >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Y of the topmost solid (or fluid) block of the column.
    fn top_block(&self, x: i32, z: i32) -> i32 {
        let gx = x.div_euclid(LATTICE);
        let gz = z.div_euclid(LATTICE);
        let fx = x.rem_euclid(LATTICE) as f64 / LATTICE as f64;
        let fz = z.rem_euclid(LATTICE) as f64 / LATTICE as f64;
        let corner = |dx: i32, dz: i32| self.unit(gx + dx, gz + dz, 1);
        let top = corner(0, 0) * (1.0 - fx) + corner(1, 0) * fx;
        let bottom = corner(0, 1) * (1.0 - fx) + corner(1, 1) * fx;
        let noise = top * (1.0 - fz) + bottom * fz;
        40 + (noise * 70.0) as i32
    }

    fn surface_material(&self, x: i32, z: i32, top: i32) -> Material {
        if top < SEA_LEVEL {
            return Material::Sand;
        }
        if top > 100 {
            return Material::SnowBlock;
        }
        match self.hash(x, z, 2) % 100 {
            0..=2 => Material::Lava,
            3..=4 => Material::MagmaBlock,
            5..=12 => Material::Sand,
            13..=15 => Material::Gravel,
            _ => Material::GrassBlock,
        }
    }

    fn decoration(&self, x: i32, z: i32) -> Material {
        match self.hash(x, z, 3) % 100 {
            0..=9 => Material::ShortGrass,
            10..=11 => Material::Flower,
            12..=14 => Material::Leaves,
            15 => Material::Cobweb,
            _ => Material::Air,
        }
    }

    fn check_region(region: RegionId) -> Result<(), TerrainError> {
        if region == RegionId::OVERWORLD {
            Ok(())
        } else {
            Err(TerrainError::UnknownRegion(region))
        }
    }
}

impl Terrain for ProceduralTerrain {
    fn load_chunk(&self, key: ChunkKey) -> BoxFuture<'static, Result<(), TerrainError>> {
        let fails = self.unit(key.cell_x, key.cell_z, 4) < self.failure_rate;
        let latency = self.latency;
        let loaded = Arc::clone(&self.loaded);
        async move {
            ProceduralTerrain::check_region(key.region)?;
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if fails {
                return Err(TerrainError::LoadFailed {
                    key,
                    reason: "generator refused the cell".to_string(),
                });
            }
            loaded
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key);
            Ok(())
        }
        .boxed()
    }

    fn surface_height(&self, region: RegionId, x: i32, z: i32) -> Result<i32, TerrainError> {
        Self::check_region(region)?;
        let key = ChunkKey::containing(region, BlockPos::new(x, 0, z));
        if !self.is_loaded(key) {
            return Err(TerrainError::LoadFailed {
                key,
                reason: "cell not loaded".to_string(),
            });
        }
        // water counts as motion blocking
        Ok(self.top_block(x, z).max(SEA_LEVEL) + 1)
    }

    fn min_height(&self, _region: RegionId) -> i32 {
        MIN_Y
    }

    fn material(&self, region: RegionId, pos: BlockPos) -> Material {
        if region != RegionId::OVERWORLD || pos.y < MIN_Y {
            return Material::Air;
        }
        let top = self.top_block(pos.x, pos.z);
        if pos.y == MIN_Y {
            Material::Bedrock
        } else if pos.y < top - 3 {
            Material::Stone
        } else if pos.y < top {
            Material::Dirt
        } else if pos.y == top {
            self.surface_material(pos.x, pos.z, top)
        } else if pos.y <= SEA_LEVEL {
            Material::Water
        } else if pos.y == top + 1 {
            self.decoration(pos.x, pos.z)
        } else {
            Material::Air
        }
    }

    fn spawn_point(&self, region: RegionId) -> Result<BlockPos, TerrainError> {
        Self::check_region(region)?;
        Ok(BlockPos::new(0, self.top_block(0, 0).max(SEA_LEVEL) + 1, 0))
    }
}

// === Bots ===

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotAction {
    Die(PlayerId),
    Pickup(PlayerId, ItemId),
    Wander(PlayerId),
}

/// Per-tick odds of each bot action.
#[derive(Debug, Clone, Copy)]
pub struct BotOdds {
    pub die: f64,
    pub find_target: f64,
    pub wander: f64,
}

impl Default for BotOdds {
    fn default() -> Self {
        Self {
            die: 1.0 / 2_000.0,
            find_target: 1.0 / 30_000.0,
            wander: 1.0 / 40.0,
        }
    }
}

pub struct SimBots {
    ids: Vec<PlayerId>,
    odds: BotOdds,
    rng: ChaCha8Rng,
}

impl SimBots {
    /// Connect `count` bots to `world`.
    pub fn spawn(world: &mut SimWorld, count: usize, seed: u64) -> Self {
        let ids = (1..=count)
            .map(|i| world.join(&format!("bot-{}", i)))
            .collect();
        Self {
            ids,
            odds: BotOdds::default(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn with_odds(mut self, odds: BotOdds) -> Self {
        self.odds = odds;
        self
    }

    pub fn ids(&self) -> &[PlayerId] {
        &self.ids
    }

    pub fn is_bot(&self, id: PlayerId) -> bool {
        self.ids.contains(&id)
    }

    /// Decide what each bot does this tick. Bots only act while a round runs.
    pub fn tick(&mut self, phase: RoundPhase, target: Option<&ItemId>) -> Vec<BotAction> {
        let mut actions = Vec::new();
        if phase == RoundPhase::Idle {
            return actions;
        }
        for id in &self.ids {
            if self.rng.gen_bool(self.odds.wander) {
                actions.push(BotAction::Wander(*id));
            }
            if phase != RoundPhase::Active {
                continue;
            }
            if let Some(target) = target {
                if self.rng.gen_bool(self.odds.find_target) {
                    actions.push(BotAction::Pickup(*id, target.clone()));
                    continue;
                }
            }
            if self.rng.gen_bool(self.odds.die) {
                actions.push(BotAction::Die(*id));
            }
        }
        actions
    }
}

// === Recording sinks ===

/// Notifier that keeps every notice it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(Audience, Notice)>>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(Audience, Notice)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.sent().into_iter().map(|(_, notice)| notice).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, audience: &Audience, notice: Notice) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((audience.clone(), notice));
    }
}

#[derive(Debug, Default)]
pub struct RecordingProgress {
    reports: Mutex<Vec<Progress>>,
}

impl RecordingProgress {
    pub fn last(&self) -> Option<Progress> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, progress: Progress) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::inspect_column;

    #[test]
    fn generator_is_deterministic() {
        let a = ProceduralTerrain::new(5);
        let b = ProceduralTerrain::new(5);
        for (x, z) in [(0, 0), (12_345, -67_890), (-99_999, 99_999)] {
            assert_eq!(a.top_block(x, z), b.top_block(x, z));
            let pos = BlockPos::new(x, a.top_block(x, z), z);
            assert_eq!(
                a.material(RegionId::OVERWORLD, pos),
                b.material(RegionId::OVERWORLD, pos)
            );
        }
    }

    #[tokio::test]
    async fn height_requires_loaded_cell() {
        let terrain = ProceduralTerrain::new(1);
        let key = ChunkKey::containing(RegionId::OVERWORLD, BlockPos::new(40, 0, 40));
        assert!(terrain.surface_height(RegionId::OVERWORLD, 40, 40).is_err());
        terrain.load_chunk(key).await.unwrap();
        assert!(terrain.is_loaded(key));
        let height = terrain.surface_height(RegionId::OVERWORLD, 40, 40).unwrap();
        assert!(height > SEA_LEVEL);
    }

    #[tokio::test]
    async fn enough_columns_are_safe() {
        let terrain = ProceduralTerrain::new(77);
        let mut safe = 0;
        for i in 0..200 {
            let (x, z) = (i * 523 - 40_000, i * 877 + 13_000);
            let key = ChunkKey::containing(RegionId::OVERWORLD, BlockPos::new(x, 0, z));
            terrain.load_chunk(key).await.unwrap();
            if inspect_column(&terrain, RegionId::OVERWORLD, x, z).is_ok() {
                safe += 1;
            }
        }
        assert!(safe > 40, "only {} of 200 columns were safe", safe);
    }

    #[tokio::test]
    async fn other_regions_are_unknown() {
        let terrain = ProceduralTerrain::new(1);
        let key = ChunkKey::new(RegionId(2), 0, 0);
        assert_eq!(
            terrain.load_chunk(key).await,
            Err(TerrainError::UnknownRegion(RegionId(2)))
        );
    }

    #[test]
    fn world_tracks_online_players_in_join_order() {
        let mut world = SimWorld::new();
        let a = world.join("a");
        let b = world.join("b");
        let c = world.join("c");
        world.leave(b);
        assert_eq!(world.online_players(), vec![a, c]);
        assert!(world.location(b).is_none());
        world.rejoin(b);
        assert_eq!(world.online_count(), 3);
    }

    #[test]
    fn respawn_uses_override_when_set() {
        let mut world = SimWorld::new();
        let id = world.join("a");
        let home = Location::new(RegionId::OVERWORLD, Position::new(100.5, 70.0, 100.5));
        world.set_respawn_point(id, Some(home));
        world.kill(id);
        assert!(!world.is_alive(id));
        world.respawn(id);
        assert_eq!(world.location(id), Some(home));
    }

    #[test]
    fn bots_stay_quiet_while_idle() {
        let mut world = SimWorld::new();
        let mut bots = SimBots::spawn(&mut world, 4, 9).with_odds(BotOdds {
            die: 1.0,
            find_target: 1.0,
            wander: 1.0,
        });
        assert!(bots.tick(RoundPhase::Idle, None).is_empty());
        let target = ItemId::new("minecraft:diamond");
        let actions = bots.tick(RoundPhase::Active, Some(&target));
        assert!(actions
            .iter()
            .any(|a| matches!(a, BotAction::Pickup(_, item) if *item == target)));
    }
}
