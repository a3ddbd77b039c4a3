//! Target item pool.

use lootrush_shared::model::ItemId;
use rand::seq::SliceRandom;
use regex::{Regex, RegexBuilder};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::host::ItemSelector;

/// Picked when every catalog entry is banned.
pub const DEFAULT_ITEM: &str = "minecraft:dirt";

/// Item ids known to the simulated world.
pub const DEFAULT_CATALOG: &[&str] = &[
    "minecraft:dirt",
    "minecraft:cobblestone",
    "minecraft:oak_log",
    "minecraft:oak_planks",
    "minecraft:stick",
    "minecraft:crafting_table",
    "minecraft:furnace",
    "minecraft:torch",
    "minecraft:coal",
    "minecraft:iron_ingot",
    "minecraft:gold_ingot",
    "minecraft:diamond",
    "minecraft:emerald",
    "minecraft:redstone",
    "minecraft:lapis_lazuli",
    "minecraft:bread",
    "minecraft:apple",
    "minecraft:wheat_seeds",
    "minecraft:sugar_cane",
    "minecraft:bone",
    "minecraft:string",
    "minecraft:feather",
    "minecraft:leather",
    "minecraft:flint",
    "minecraft:gravel",
    "minecraft:sand",
    "minecraft:glass",
    "minecraft:bucket",
    "minecraft:compass",
    "minecraft:clock",
    "minecraft:bow",
    "minecraft:arrow",
    "minecraft:shield",
    "minecraft:iron_pickaxe",
    "minecraft:book",
    "minecraft:bedrock",
    "minecraft:barrier",
    "minecraft:command_block",
    "minecraft:chain_command_block",
    "minecraft:repeating_command_block",
    "minecraft:structure_block",
    "minecraft:debug_stick",
];

/// Ban rules prefixed with this are regular expressions.
pub const REGEX_PREFIX: &str = "REGEX:";

/// `*` matches any run of characters, everything else is literal.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return text.is_empty();
    };
    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };
    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        // no wildcard at all
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(at) => rest = &rest[at + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

/// Compiled banned-items list. Entries are exact ids, `*` wildcard patterns,
/// or `REGEX:` expressions that must match the whole id. Matching ignores
/// case. Invalid expressions are logged and skipped.
#[derive(Debug, Default)]
pub struct BanList {
    patterns: Vec<String>,
    expressions: Vec<Regex>,
}

impl BanList {
    pub fn new(banned: &[String]) -> Self {
        let mut list = Self::default();
        for entry in banned {
            match entry.strip_prefix(REGEX_PREFIX) {
                Some(expr) => match RegexBuilder::new(&format!("^(?:{})$", expr))
                    .case_insensitive(true)
                    .build()
                {
                    Ok(regex) => list.expressions.push(regex),
                    Err(err) => {
                        tracing::warn!("Invalid regex pattern in banned items: {} ({})", entry, err)
                    }
                },
                None => list.patterns.push(entry.to_ascii_lowercase()),
            }
        }
        list
    }

    pub fn is_banned(&self, item: &str) -> bool {
        let lowered = item.to_ascii_lowercase();
        self.patterns
            .iter()
            .any(|pattern| wildcard_match(pattern, &lowered))
            || self.expressions.iter().any(|regex| regex.is_match(item))
    }

    pub fn len(&self) -> usize {
        self.patterns.len() + self.expressions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Uniform choice among the allowed catalog entries.
pub struct ItemPool {
    pool: Vec<ItemId>,
    rng: ChaCha8Rng,
}

impl ItemPool {
    pub fn new<I, S>(catalog: I, banned: &[String], seed: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let bans = BanList::new(banned);
        let pool: Vec<ItemId> = catalog
            .into_iter()
            .map(|id| ItemId::new(id))
            .filter(|id| !bans.is_banned(id.as_str()))
            .collect();
        tracing::info!("Item pool size: {}", pool.len());
        Self {
            pool,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn contains(&self, item: &ItemId) -> bool {
        self.pool.contains(item)
    }
}

impl ItemSelector for ItemPool {
    fn pick(&mut self) -> ItemId {
        self.pool
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or_else(|| ItemId::new(DEFAULT_ITEM))
    }
}
