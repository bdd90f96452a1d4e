//! Grid-backed zone for tests and the headless simulator.

use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;

use hostile_common::{CellCoord, Position, UnitId, ZoneError};

use crate::world::{BlockingFlags, LosResult, UnitInfo, ZoneQuery};

/// Obstacle occupying a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Obstacle {
    /// Blocks movement and every ray
    Wall,
    /// Blocks movement and direct rays; ballistic rays pass over
    LowCover,
}

/// A rectangular zone made of unit cells.
#[derive(Debug)]
pub struct GridZone {
    width: i32,
    height: i32,
    obstacles: RwLock<AHashMap<CellCoord, Obstacle>>,
    slopes: RwLock<AHashMap<CellCoord, f32>>,
    units: RwLock<AHashMap<UnitId, UnitInfo>>,
}

impl GridZone {
    /// Creates an open zone of `width` x `height` cells.
    #[must_use]
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            obstacles: RwLock::new(AHashMap::new()),
            slopes: RwLock::new(AHashMap::new()),
            units: RwLock::new(AHashMap::new()),
        }
    }

    /// Zone width in cells.
    #[must_use]
    pub const fn width(&self) -> i32 {
        self.width
    }

    /// Zone height in cells.
    #[must_use]
    pub const fn height(&self) -> i32 {
        self.height
    }

    /// Places an obstacle.
    pub fn set_obstacle(&self, x: i32, y: i32, obstacle: Obstacle) -> Result<(), ZoneError> {
        let cell = self.checked(x, y)?;
        self.obstacles.write().insert(cell, obstacle);
        Ok(())
    }

    /// Builds a wall segment along a row from `x0` to `x1` inclusive.
    pub fn wall_row(&self, y: i32, x0: i32, x1: i32) -> Result<(), ZoneError> {
        for x in x0.min(x1)..=x0.max(x1) {
            self.set_obstacle(x, y, Obstacle::Wall)?;
        }
        Ok(())
    }

    /// Builds a wall segment along a column from `y0` to `y1` inclusive.
    pub fn wall_column(&self, x: i32, y0: i32, y1: i32) -> Result<(), ZoneError> {
        for y in y0.min(y1)..=y0.max(y1) {
            self.set_obstacle(x, y, Obstacle::Wall)?;
        }
        Ok(())
    }

    /// Sets the terrain slope of a cell in degrees.
    pub fn set_slope(&self, x: i32, y: i32, slope: f32) -> Result<(), ZoneError> {
        let cell = self.checked(x, y)?;
        self.slopes.write().insert(cell, slope);
        Ok(())
    }

    /// Inserts or replaces a unit.
    pub fn upsert_unit(&self, info: UnitInfo) {
        self.units.write().insert(info.id, info);
    }

    /// Moves a unit.
    pub fn move_unit(&self, id: UnitId, position: Position) -> Result<(), ZoneError> {
        let mut units = self.units.write();
        let unit = units.get_mut(&id).ok_or(ZoneError::UnitNotFound(id))?;
        unit.position = position;
        Ok(())
    }

    /// Applies an arbitrary edit to a unit.
    pub fn edit_unit<F: FnOnce(&mut UnitInfo)>(&self, id: UnitId, edit: F) -> Result<(), ZoneError> {
        let mut units = self.units.write();
        let unit = units.get_mut(&id).ok_or(ZoneError::UnitNotFound(id))?;
        edit(unit);
        Ok(())
    }

    /// Removes a unit from the zone.
    pub fn remove_unit(&self, id: UnitId) -> Option<UnitInfo> {
        self.units.write().remove(&id)
    }

    /// Cells currently holding an obstacle.
    #[must_use]
    pub fn obstacle_cells(&self) -> AHashSet<CellCoord> {
        self.obstacles.read().keys().copied().collect()
    }

    fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }

    fn checked(&self, x: i32, y: i32) -> Result<CellCoord, ZoneError> {
        if self.in_bounds(x, y) {
            Ok(CellCoord::new(x, y))
        } else {
            Err(ZoneError::OutOfBounds { x, y })
        }
    }
}

impl ZoneQuery for GridZone {
    fn is_walkable(&self, x: i32, y: i32, max_slope: f32) -> bool {
        if !self.in_bounds(x, y) {
            return false;
        }
        let cell = CellCoord::new(x, y);
        if self.obstacles.read().contains_key(&cell) {
            return false;
        }
        self.slopes.read().get(&cell).map_or(true, |s| *s <= max_slope)
    }

    fn line_of_sight(&self, from: Position, to: Position, ballistic: bool) -> LosResult {
        let start = from.cell();
        let end = to.cell();
        let dist = from.distance(to);
        let steps = (dist / 0.25).ceil().max(1.0) as usize;

        let obstacles = self.obstacles.read();
        let mut result = LosResult::CLEAR;
        for i in 1..steps {
            let t = i as f32 / steps as f32;
            let cell = Position::new(from.x + (to.x - from.x) * t, from.y + (to.y - from.y) * t)
                .cell();
            if cell == start || cell == end {
                continue;
            }
            match obstacles.get(&cell) {
                Some(Obstacle::Wall) => {
                    result.hit = true;
                    result.blocking |= BlockingFlags::STRUCTURE;
                    return result;
                },
                Some(Obstacle::LowCover) => {
                    result.blocking |= BlockingFlags::LOW_COVER;
                    if !ballistic {
                        result.hit = true;
                        return result;
                    }
                },
                None => {},
            }
        }
        result
    }

    fn units_in_range(&self, center: Position, radius: f32) -> Vec<UnitInfo> {
        let mut found: Vec<UnitInfo> = self
            .units
            .read()
            .values()
            .filter(|u| u.position.distance(center) <= radius)
            .cloned()
            .collect();
        found.sort_by_key(|u| u.id);
        found
    }

    fn unit(&self, id: UnitId) -> Option<UnitInfo> {
        self.units.read().get(&id).cloned()
    }

    fn unit_moved(&self, unit: UnitId, position: Position) {
        // Agents the zone was never told about are not tracked
        let _ = self.move_unit(unit, position);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walkability() {
        let zone = GridZone::new(10, 10);
        zone.set_obstacle(2, 2, Obstacle::Wall).expect("in bounds");
        zone.set_slope(3, 3, 60.0).expect("in bounds");

        assert!(zone.is_walkable(1, 1, 45.0));
        assert!(!zone.is_walkable(2, 2, 45.0));
        assert!(!zone.is_walkable(3, 3, 45.0));
        assert!(zone.is_walkable(3, 3, 70.0));
        assert!(!zone.is_walkable(-1, 0, 45.0));
        assert!(!zone.is_walkable(10, 0, 45.0));
    }

    #[test]
    fn test_out_of_bounds_obstacle() {
        let zone = GridZone::new(4, 4);
        assert!(matches!(
            zone.set_obstacle(9, 9, Obstacle::Wall),
            Err(ZoneError::OutOfBounds { x: 9, y: 9 })
        ));
    }

    #[test]
    fn test_wall_blocks_los() {
        let zone = GridZone::new(20, 20);
        zone.wall_column(10, 0, 19).expect("in bounds");

        let a = Position::new(5.5, 5.5);
        let b = Position::new(15.5, 5.5);
        let los = zone.line_of_sight(a, b, false);
        assert!(los.hit);
        assert!(los.blocking.contains(BlockingFlags::STRUCTURE));
        assert!(zone.line_of_sight(a, b, true).hit);
    }

    #[test]
    fn test_low_cover_only_blocks_direct() {
        let zone = GridZone::new(20, 20);
        zone.set_obstacle(10, 5, Obstacle::LowCover).expect("in bounds");

        let a = Position::new(5.5, 5.5);
        let b = Position::new(15.5, 5.5);
        assert!(zone.line_of_sight(a, b, false).hit);
        let arc = zone.line_of_sight(a, b, true);
        assert!(arc.is_clear());
        assert!(arc.blocking.contains(BlockingFlags::LOW_COVER));
    }

    #[test]
    fn test_units_in_range() {
        let zone = GridZone::new(50, 50);
        let near = UnitId::new();
        let far = UnitId::new();
        zone.upsert_unit(UnitInfo::player(near, Position::new(1.0, 1.0)));
        zone.upsert_unit(UnitInfo::player(far, Position::new(40.0, 40.0)));

        let found = zone.units_in_range(Position::new(0.0, 0.0), 5.0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, near);

        zone.move_unit(far, Position::new(2.0, 2.0)).expect("unit exists");
        assert_eq!(zone.units_in_range(Position::new(0.0, 0.0), 5.0).len(), 2);
    }
}
