//! Tile world - an arena of texture consumers.
//!
//! Entities are dense indices into the arena, handed out in increasing order
//! for the arena's lifetime. Despawned entities leave a hole; ids are never
//! reused.

use crate::gpu::TextureHandle;
use std::collections::VecDeque;

/// Index of an entity inside its [`World`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(usize);

impl EntityId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// A grid cell that displays one texture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub column: u32,
    pub row: u32,
    pub texture: Option<TextureHandle>,
}

impl Tile {
    pub fn at(column: u32, row: u32) -> Self {
        Self {
            column,
            row,
            texture: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct World {
    tiles: Vec<Option<Tile>>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// World with `count` tiles laid out row by row, `columns` per row
    pub fn grid(count: usize, columns: u32) -> Self {
        let columns = columns.max(1);
        let mut world = Self::new();
        for i in 0..count as u32 {
            world.spawn(Tile::at(i % columns, i / columns));
        }
        world
    }

    pub fn spawn(&mut self, tile: Tile) -> EntityId {
        self.tiles.push(Some(tile));
        EntityId(self.tiles.len() - 1)
    }

    /// Remove an entity, returning the texture it held so the caller can
    /// release it on a thread owning the context.
    pub fn despawn(&mut self, id: EntityId) -> Option<TextureHandle> {
        self.tiles.get_mut(id.0)?.take()?.texture
    }

    pub fn get(&self, id: EntityId) -> Option<&Tile> {
        self.tiles.get(id.0)?.as_ref()
    }

    /// Number of live entities
    pub fn len(&self) -> usize {
        self.tiles.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live entities in index order
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &Tile)> {
        self.tiles
            .iter()
            .enumerate()
            .filter_map(|(i, tile)| tile.as_ref().map(|t| (EntityId(i), t)))
    }

    /// Entities still lacking a texture, in index order
    pub fn awaiting_texture(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.iter()
            .filter(|(_, tile)| tile.texture.is_none())
            .map(|(id, _)| id)
    }

    /// Number of entities that have a texture
    pub fn textured(&self) -> usize {
        self.iter().filter(|(_, t)| t.texture.is_some()).count()
    }

    /// Rows needed to lay out every tile
    pub fn rows(&self) -> u32 {
        self.iter().map(|(_, t)| t.row + 1).max().unwrap_or(0)
    }

    /// Hand out textures first come first served: the Nth handle goes to the
    /// Nth entity lacking a texture. Handles without a taker stay queued.
    /// Returns the number assigned.
    pub fn assign_textures(&mut self, handles: &mut VecDeque<TextureHandle>) -> usize {
        let mut assigned = 0;
        for tile in self.tiles.iter_mut().flatten() {
            if handles.is_empty() {
                break;
            }
            if tile.texture.is_none() {
                tile.texture = handles.pop_front();
                assigned += 1;
            }
        }
        assigned
    }

    /// Strip every texture, returning them for release
    pub fn take_textures(&mut self) -> Vec<TextureHandle> {
        self.tiles
            .iter_mut()
            .flatten()
            .filter_map(|tile| tile.texture.take())
            .collect()
    }
}
