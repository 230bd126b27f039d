use pathfinding::prelude::astar;

use crate::models::{
    airfield::AirfieldFootprint,
    common::TilePos,
    traits::{IPathFinder, PathOptions, SurfaceRestriction},
};
use crate::scenario::TileRect;

/// 直進・斜め移動のコスト
const STRAIGHT_COST: u32 = 10;
const DIAGONAL_COST: u32 = 14;

/// 地形の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileKind {
    Grass,
    /// 舗装面（道路・飛行場）
    Paved,
    Blocked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TerrainTile {
    pub kind: TileKind,
    /// 舗装面の所有勢力
    pub owner: Option<String>,
}

/// タイル地形グリッド
#[derive(Debug, Clone)]
pub struct TerrainGrid {
    pub width: i32,
    pub height: i32,
    tiles: Vec<TerrainTile>,
}

impl TerrainGrid {
    /// 全面草地のグリッドを作成
    pub fn new(width: i32, height: i32) -> Self {
        let count = (width.max(0) * height.max(0)) as usize;
        Self {
            width,
            height,
            tiles: vec![TerrainTile { kind: TileKind::Grass, owner: None }; count],
        }
    }

    pub fn in_bounds(&self, tile: TilePos) -> bool {
        tile.x >= 0 && tile.y >= 0 && tile.x < self.width && tile.y < self.height
    }

    fn index(&self, tile: TilePos) -> Option<usize> {
        self.in_bounds(tile).then(|| (tile.y * self.width + tile.x) as usize)
    }

    pub fn get(&self, tile: TilePos) -> Option<&TerrainTile> {
        self.index(tile).map(|i| &self.tiles[i])
    }

    pub fn set(&mut self, tile: TilePos, kind: TileKind, owner: Option<&str>) {
        if let Some(i) = self.index(tile) {
            self.tiles[i] = TerrainTile { kind, owner: owner.map(str::to_string) };
        }
    }

    /// 道路矩形を舗装（所有者なし）
    pub fn pave_rect(&mut self, rect: &TileRect) {
        for y in rect.y..rect.y + rect.height {
            for x in rect.x..rect.x + rect.width {
                self.set(TilePos::new(x, y), TileKind::Paved, None);
            }
        }
    }

    /// 飛行場の占有範囲を配置（格納庫ブロックは通行不可）
    pub fn place_airfield(&mut self, footprint: &AirfieldFootprint, owner: &str) {
        for local_y in 0..footprint.height {
            for local_x in 0..footprint.width {
                let tile = TilePos::new(footprint.tile_x + local_x, footprint.tile_y + local_y);
                if footprint.is_blocked_local_tile(local_x, local_y) {
                    self.set(tile, TileKind::Blocked, Some(owner));
                } else {
                    self.set(tile, TileKind::Paved, Some(owner));
                }
            }
        }
    }

    /// 破壊された飛行場の跡地を草地に戻す
    pub fn clear_airfield(&mut self, footprint: &AirfieldFootprint) {
        for local_y in 0..footprint.height {
            for local_x in 0..footprint.width {
                let tile = TilePos::new(footprint.tile_x + local_x, footprint.tile_y + local_y);
                self.set(tile, TileKind::Grass, None);
            }
        }
    }

    fn matches_surface(tile: &TerrainTile, surface: SurfaceRestriction) -> bool {
        match surface {
            SurfaceRestriction::Any => tile.kind != TileKind::Blocked,
            SurfaceRestriction::PavedOnly => tile.kind == TileKind::Paved,
        }
    }

    /// 経路探索オプションの下で通行可能か
    pub fn is_passable(&self, tile: TilePos, options: &PathOptions) -> bool {
        let Some(terrain) = self.get(tile) else {
            return false;
        };
        if !Self::matches_surface(terrain, options.surface) {
            return false;
        }
        match (&terrain.owner, &options.owner_filter) {
            (Some(owner), Some(filter)) if terrain.kind == TileKind::Paved => owner == filter,
            _ => true,
        }
    }
}

/// A*によるグリッド経路探索
#[derive(Debug, Clone)]
pub struct GridPathFinder {
    grid: TerrainGrid,
}

impl GridPathFinder {
    pub fn new(grid: TerrainGrid) -> Self {
        Self { grid }
    }

    pub fn grid(&self) -> &TerrainGrid {
        &self.grid
    }

    pub fn grid_mut(&mut self) -> &mut TerrainGrid {
        &mut self.grid
    }

    fn neighbours(&self, tile: &TilePos, options: &PathOptions) -> Vec<(TilePos, u32)> {
        let mut result = Vec::with_capacity(8);
        for dy in -1..=1 {
            for dx in -1..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let next = TilePos::new(tile.x + dx, tile.y + dy);
                if !self.grid.is_passable(next, options) {
                    continue;
                }
                if dx != 0 && dy != 0 {
                    // 角をすり抜ける斜め移動は禁止
                    let side_a = TilePos::new(tile.x + dx, tile.y);
                    let side_b = TilePos::new(tile.x, tile.y + dy);
                    if !self.grid.is_passable(side_a, options) || !self.grid.is_passable(side_b, options) {
                        continue;
                    }
                    result.push((next, DIAGONAL_COST));
                } else {
                    result.push((next, STRAIGHT_COST));
                }
            }
        }
        result
    }
}

fn octile_distance(a: &TilePos, b: &TilePos) -> u32 {
    let dx = (a.x - b.x).unsigned_abs();
    let dy = (a.y - b.y).unsigned_abs();
    STRAIGHT_COST * dx.max(dy) + (DIAGONAL_COST - STRAIGHT_COST) * dx.min(dy)
}

impl IPathFinder for GridPathFinder {
    fn find_path(&self, origin: TilePos, destination: TilePos, options: &PathOptions) -> Vec<TilePos> {
        if !self.grid.in_bounds(origin) || !self.grid.in_bounds(destination) {
            return Vec::new();
        }
        if origin == destination {
            return vec![origin];
        }

        let goal = if self.grid.is_passable(destination, options) {
            destination
        } else if options.strict_destination {
            return Vec::new();
        } else {
            match self.nearest_surface_tile(destination, 4, options.surface) {
                Some(tile) => tile,
                None => return Vec::new(),
            }
        };

        astar(
            &origin,
            |tile| self.neighbours(tile, options),
            |tile| octile_distance(tile, &goal),
            |tile| *tile == goal,
        )
        .map(|(path, _cost)| path)
        .unwrap_or_default()
    }

    fn nearest_surface_tile(&self, origin: TilePos, max_radius: i32, surface: SurfaceRestriction) -> Option<TilePos> {
        let matches = |tile: TilePos| {
            self.grid.get(tile).is_some_and(|t| TerrainGrid::matches_surface(t, surface))
        };
        if matches(origin) {
            return Some(origin);
        }
        for radius in 1..=max_radius {
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    if dx.abs() != radius && dy.abs() != radius {
                        continue;
                    }
                    let tile = TilePos::new(origin.x + dx, origin.y + dy);
                    if matches(tile) {
                        return Some(tile);
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn finder_with_airfield() -> GridPathFinder {
        let mut grid = TerrainGrid::new(30, 15);
        grid.place_airfield(&AirfieldFootprint { tile_x: 2, tile_y: 2, width: 12, height: 6 }, "blue");
        grid.pave_rect(&TileRect { x: 14, y: 4, width: 10, height: 1 });
        GridPathFinder::new(grid)
    }

    #[test]
    fn test_taxi_path_stays_on_paved_tiles() {
        let finder = finder_with_airfield();
        let options = PathOptions::taxi("blue");
        let path = finder.find_path(TilePos::new(3, 6), TilePos::new(20, 4), &options);
        assert_eq!(path.first(), Some(&TilePos::new(3, 6)));
        assert_eq!(path.last(), Some(&TilePos::new(20, 4)));
        for tile in &path {
            assert!(finder.grid().is_passable(*tile, &options), "{:?} not paved", tile);
        }
    }

    #[test]
    fn test_hangar_block_is_avoided() {
        let finder = finder_with_airfield();
        let options = PathOptions::taxi("blue");
        // 格納庫（左上）を迂回して上段の駐機スロットへ
        let path = finder.find_path(TilePos::new(3, 6), TilePos::new(10, 2), &options);
        assert!(!path.is_empty());
        assert!(path.iter().all(|t| !(t.x >= 2 && t.x <= 8 && t.y >= 2 && t.y <= 3)));
    }

    #[test]
    fn test_owner_filter_blocks_foreign_airfield() {
        let finder = finder_with_airfield();
        let options = PathOptions::taxi("red");
        let path = finder.find_path(TilePos::new(20, 4), TilePos::new(5, 6), &options);
        assert!(path.is_empty());
    }

    #[test]
    fn test_strict_destination_on_grass_fails() {
        let finder = finder_with_airfield();
        let options = PathOptions::taxi("blue");
        assert!(finder.find_path(TilePos::new(3, 6), TilePos::new(3, 12), &options).is_empty());
        assert_eq!(
            finder.nearest_surface_tile(TilePos::new(3, 12), 8, SurfaceRestriction::PavedOnly),
            Some(TilePos::new(2, 7))
        );
    }

    #[test]
    fn test_same_tile_path() {
        let finder = finder_with_airfield();
        let path = finder.find_path(TilePos::new(4, 4), TilePos::new(4, 4), &PathOptions::taxi("blue"));
        assert_eq!(path, vec![TilePos::new(4, 4)]);
    }
}
