//! Continuous positions and grid cells.

use serde::{Deserialize, Serialize};

/// A point on the zone plane, in world units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate
    pub x: f32,
    /// Y coordinate
    pub y: f32,
}

impl Position {
    /// Creates a new position.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another position.
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Normalized direction towards another position, or zero when coincident.
    #[must_use]
    pub fn direction_to(self, other: Self) -> (f32, f32) {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let len = (dx * dx + dy * dy).sqrt();
        if len < 0.001 {
            (0.0, 0.0)
        } else {
            (dx / len, dy / len)
        }
    }

    /// Moves towards `target` by at most `max_step`, never overshooting.
    #[must_use]
    pub fn step_towards(self, target: Self, max_step: f32) -> Self {
        let dist = self.distance(target);
        if dist <= max_step {
            return target;
        }
        let (dx, dy) = self.direction_to(target);
        Self::new(self.x + dx * max_step, self.y + dy * max_step)
    }

    /// Offsets this position by a polar vector.
    #[must_use]
    pub fn offset_polar(self, angle: f32, radius: f32) -> Self {
        Self::new(self.x + angle.cos() * radius, self.y + angle.sin() * radius)
    }

    /// Grid cell containing this position.
    #[must_use]
    pub fn cell(self) -> CellCoord {
        CellCoord::new(self.x.floor() as i32, self.y.floor() as i32)
    }
}

/// Integer grid cell used by terrain queries and pathfinding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoord {
    /// X cell index
    pub x: i32,
    /// Y cell index
    pub y: i32,
}

impl CellCoord {
    /// Creates a new cell coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Center of the cell in world units.
    #[must_use]
    pub fn center(self) -> Position {
        Position::new(self.x as f32 + 0.5, self.y as f32 + 0.5)
    }

    /// Octile distance in cells: straight steps cost 1, diagonal steps `diagonal`.
    #[must_use]
    pub fn octile_distance(self, other: Self, diagonal: f32) -> f32 {
        let dx = (self.x - other.x).unsigned_abs() as f32;
        let dy = (self.y - other.y).unsigned_abs() as f32;
        let (lo, hi) = if dx < dy { (dx, dy) } else { (dy, dx) };
        (hi - lo) + lo * diagonal
    }

    /// The eight neighbouring cells with a flag telling whether the step is diagonal.
    #[must_use]
    pub fn neighbors8(self) -> [(Self, bool); 8] {
        let Self { x, y } = self;
        [
            (Self::new(x + 1, y), false),
            (Self::new(x - 1, y), false),
            (Self::new(x, y + 1), false),
            (Self::new(x, y - 1), false),
            (Self::new(x + 1, y + 1), true),
            (Self::new(x + 1, y - 1), true),
            (Self::new(x - 1, y + 1), true),
            (Self::new(x - 1, y - 1), true),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance() {
        let a = Position::new(0.0, 0.0);
        assert!((a.distance(Position::new(3.0, 4.0)) - 5.0).abs() < 0.001);
    }

    #[test]
    fn test_step_towards_no_overshoot() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(1.0, 0.0);
        assert_eq!(a.step_towards(b, 5.0), b);

        let mid = a.step_towards(Position::new(10.0, 0.0), 2.0);
        assert!((mid.x - 2.0).abs() < 0.001);
    }

    #[test]
    fn test_cell_of_negative_position() {
        assert_eq!(Position::new(-0.5, 1.5).cell(), CellCoord::new(-1, 1));
    }

    #[test]
    fn test_octile_distance() {
        let a = CellCoord::new(0, 0);
        assert!((a.octile_distance(CellCoord::new(3, 0), 1.4) - 3.0).abs() < 0.001);
        assert!((a.octile_distance(CellCoord::new(2, 2), 1.4) - 2.8).abs() < 0.001);
        assert!((a.octile_distance(CellCoord::new(3, 1), 1.4) - 3.4).abs() < 0.001);
    }
}
