//! Seams to the game host.
//!
//! The round logic never touches a concrete server. Everything it reads or
//! mutates goes through these traits: [`PlayerHost`] and [`Notifier`] are only
//! used on the authority task, while [`Terrain`] and [`ProgressSink`] are
//! shared with background scatter work and must be thread-safe.

use futures_util::future::BoxFuture;
use lootrush_shared::geometry::{BlockPos, Location};
use lootrush_shared::model::{ItemId, PlayerId, RegionId};
use lootrush_shared::protocol::{Notice, Progress};
use std::sync::Arc;

use crate::chunks::ChunkKey;
use crate::error::TerrainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameMode {
    Survival,
    Spectator,
}

/// Who receives a notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    All,
    /// Online identities holding the Player role, resolved by the controller.
    Participants(Vec<PlayerId>),
    Player(PlayerId),
    Console,
}

/// Block materials the placement search can tell apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Material {
    Air,
    CaveAir,
    Bedrock,
    Stone,
    Dirt,
    GrassBlock,
    Sand,
    Gravel,
    SnowBlock,
    Ice,
    Log,
    Planks,
    Leaves,
    ShortGrass,
    Flower,
    Water,
    Lava,
    Kelp,
    KelpPlant,
    Seagrass,
    TallSeagrass,
    BubbleColumn,
    Cactus,
    MagmaBlock,
    Campfire,
    SoulCampfire,
    Fire,
    SoulFire,
    PowderSnow,
    SweetBerryBush,
    Cobweb,
    WitherRose,
}

impl Material {
    /// Blocks nobody should be dropped onto.
    pub fn is_hazard(self) -> bool {
        matches!(
            self,
            Material::Lava
                | Material::Water
                | Material::Kelp
                | Material::KelpPlant
                | Material::Seagrass
                | Material::TallSeagrass
                | Material::BubbleColumn
                | Material::Cactus
                | Material::MagmaBlock
                | Material::Campfire
                | Material::SoulCampfire
                | Material::Fire
                | Material::SoulFire
                | Material::PowderSnow
                | Material::SweetBerryBush
                | Material::Cobweb
                | Material::WitherRose
        )
    }

    /// Full, opaque cube.
    pub fn is_solid(self) -> bool {
        matches!(
            self,
            Material::Bedrock
                | Material::Stone
                | Material::Dirt
                | Material::GrassBlock
                | Material::Sand
                | Material::Gravel
                | Material::SnowBlock
                | Material::Ice
                | Material::Log
                | Material::Planks
                | Material::MagmaBlock
        )
    }

    /// No collision box; an entity can occupy the block.
    pub fn is_passable(self) -> bool {
        matches!(
            self,
            Material::Air
                | Material::CaveAir
                | Material::ShortGrass
                | Material::Flower
                | Material::Water
                | Material::Lava
                | Material::Kelp
                | Material::KelpPlant
                | Material::Seagrass
                | Material::TallSeagrass
                | Material::BubbleColumn
                | Material::Fire
                | Material::SoulFire
                | Material::SweetBerryBush
                | Material::Cobweb
                | Material::WitherRose
        )
    }

    /// A safe floor is solid and not a hazard.
    pub fn is_safe_floor(self) -> bool {
        self.is_solid() && !self.is_hazard()
    }

    pub fn name(self) -> &'static str {
        match self {
            Material::Air => "air",
            Material::CaveAir => "cave_air",
            Material::Bedrock => "bedrock",
            Material::Stone => "stone",
            Material::Dirt => "dirt",
            Material::GrassBlock => "grass_block",
            Material::Sand => "sand",
            Material::Gravel => "gravel",
            Material::SnowBlock => "snow_block",
            Material::Ice => "ice",
            Material::Log => "log",
            Material::Planks => "planks",
            Material::Leaves => "leaves",
            Material::ShortGrass => "short_grass",
            Material::Flower => "flower",
            Material::Water => "water",
            Material::Lava => "lava",
            Material::Kelp => "kelp",
            Material::KelpPlant => "kelp_plant",
            Material::Seagrass => "seagrass",
            Material::TallSeagrass => "tall_seagrass",
            Material::BubbleColumn => "bubble_column",
            Material::Cactus => "cactus",
            Material::MagmaBlock => "magma_block",
            Material::Campfire => "campfire",
            Material::SoulCampfire => "soul_campfire",
            Material::Fire => "fire",
            Material::SoulFire => "soul_fire",
            Material::PowderSnow => "powder_snow",
            Material::SweetBerryBush => "sweet_berry_bush",
            Material::Cobweb => "cobweb",
            Material::WitherRose => "wither_rose",
        }
    }
}

/// Authority-side view of connected players.
pub trait PlayerHost: Send {
    fn online_players(&self) -> Vec<PlayerId>;
    fn is_online(&self, id: PlayerId) -> bool;
    /// Online and not currently dead.
    fn is_alive(&self, id: PlayerId) -> bool;
    fn name(&self, id: PlayerId) -> Option<String>;
    fn location(&self, id: PlayerId) -> Option<Location>;
    fn teleport(&mut self, id: PlayerId, to: Location);
    /// Empties the inventory and every equipment slot.
    fn clear_inventory(&mut self, id: PlayerId);
    /// True if the item sits in any inventory or equipment slot.
    fn has_item(&self, id: PlayerId, item: &ItemId) -> bool;
    fn remove_item(&mut self, id: PlayerId, item: &ItemId);
    fn respawn_point(&self, id: PlayerId) -> Option<Location>;
    fn set_respawn_point(&mut self, id: PlayerId, point: Option<Location>);
    fn set_invulnerable(&mut self, id: PlayerId, invulnerable: bool);
    fn set_game_mode(&mut self, id: PlayerId, mode: GameMode);
    /// Default spawn of the primary region, used as the holding area.
    fn world_spawn(&self) -> Location;
}

/// Terrain queries. Called from background tasks.
pub trait Terrain: Send + Sync + 'static {
    /// Bring one cell fully into memory. Loading an already loaded cell is a
    /// cheap no-op.
    fn load_chunk(&self, key: ChunkKey) -> BoxFuture<'static, Result<(), TerrainError>>;

    /// Y of the first block above the highest motion-blocking block in the
    /// column. Only meaningful once the containing cell is loaded.
    fn surface_height(&self, region: RegionId, x: i32, z: i32) -> Result<i32, TerrainError>;

    fn min_height(&self, region: RegionId) -> i32;

    fn material(&self, region: RegionId, pos: BlockPos) -> Material;

    fn spawn_point(&self, region: RegionId) -> Result<BlockPos, TerrainError>;
}

pub trait Notifier: Send {
    fn notify(&self, audience: &Audience, notice: Notice);
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: Progress);
}

/// Source of target items.
pub trait ItemSelector: Send {
    fn pick(&mut self) -> ItemId;
}

/// Everything the controller needs from its environment.
pub struct Collaborators<P> {
    pub players: P,
    pub terrain: Arc<dyn Terrain>,
    pub notifier: Box<dyn Notifier>,
    pub progress: Arc<dyn ProgressSink>,
    pub items: Box<dyn ItemSelector>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hazards_are_never_safe_floors() {
        for material in [
            Material::Lava,
            Material::Water,
            Material::MagmaBlock,
            Material::Cactus,
            Material::Cobweb,
            Material::PowderSnow,
        ] {
            assert!(!material.is_safe_floor(), "{} should be unsafe", material.name());
        }
    }

    #[test]
    fn ordinary_ground_is_safe() {
        for material in [Material::GrassBlock, Material::Stone, Material::Sand] {
            assert!(material.is_safe_floor());
        }
    }

    #[test]
    fn leaves_are_neither_floor_nor_passable() {
        assert!(!Material::Leaves.is_safe_floor());
        assert!(!Material::Leaves.is_passable());
    }

    #[test]
    fn vegetation_is_passable() {
        assert!(Material::ShortGrass.is_passable());
        assert!(Material::Flower.is_passable());
        assert!(!Material::Stone.is_passable());
    }
}
