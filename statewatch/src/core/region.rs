//! Geometric value types shared by the registry, resolver and collaborators.

use serde::{Deserialize, Serialize};

/// Integer rectangle in screen coordinates.
///
/// A resolved region always has positive width and height. An unresolved
/// region is modelled as `Option::None` by its owner, never as a degenerate
/// rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// True when both dimensions are strictly positive.
    pub fn has_positive_size(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn center(&self) -> Location {
        Location {
            x: self.x + self.width / 2,
            y: self.y + self.height / 2,
        }
    }

    /// Shift and grow the region by `adjustment`, or `None` if any coordinate
    /// overflows. The result may be degenerate; callers decide whether to
    /// accept it.
    pub fn adjusted(&self, adjustment: &Adjustment) -> Option<Region> {
        Some(Region {
            x: self.x.checked_add(adjustment.dx)?,
            y: self.y.checked_add(adjustment.dy)?,
            width: self.width.checked_add(adjustment.dw)?,
            height: self.height.checked_add(adjustment.dh)?,
        })
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{} {}x{})", self.x, self.y, self.width, self.height)
    }
}

/// A single point on screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub x: i32,
    pub y: i32,
}

/// Offset applied to a target match when deriving a dependent search region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Adjustment {
    pub dx: i32,
    pub dy: i32,
    pub dw: i32,
    pub dh: i32,
}

/// Result of a successful locate. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    anchor_id: String,
    region: Region,
    score: f64,
}

impl Match {
    /// Create a match; `score` is clamped into `[0, 1]`.
    pub fn new(anchor_id: impl Into<String>, region: Region, score: f64) -> Self {
        Self {
            anchor_id: anchor_id.into(),
            region,
            score: score.clamp(0.0, 1.0),
        }
    }

    pub fn anchor_id(&self) -> &str {
        &self.anchor_id
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn score(&self) -> f64 {
        self.score
    }
}
