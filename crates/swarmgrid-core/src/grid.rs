//! Dense cell grid storing at most one object per cell.

use crate::object::ObjectKey;
use crate::types::{GridCoord, GridLocation};
use thiserror::Error;

/// Errors raised by grid placement.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GridError {
    #[error("location {0} is outside the grid")]
    OutOfBounds(GridLocation),
    #[error("cell {0} is already occupied")]
    Occupied(GridLocation),
}

/// A `height x width` cell array of optional object handles.
///
/// The grid enforces single occupancy: placing onto an occupied cell is an
/// error, never a silent overwrite. Location bookkeeping on the objects
/// themselves is the world's responsibility.
#[derive(Debug, Clone)]
pub struct Grid {
    height: GridCoord,
    width: GridCoord,
    cells: Vec<Option<ObjectKey>>,
}

impl Grid {
    /// Create an empty grid.
    #[must_use]
    pub fn new(height: GridCoord, width: GridCoord) -> Self {
        Self {
            height,
            width,
            cells: vec![None; usize::from(height) * usize::from(width)],
        }
    }

    #[must_use]
    pub const fn height(&self) -> GridCoord {
        self.height
    }

    #[must_use]
    pub const fn width(&self) -> GridCoord {
        self.width
    }

    /// Whether `loc` lies inside the grid.
    #[must_use]
    pub fn contains(&self, loc: GridLocation) -> bool {
        loc.r < self.height && loc.c < self.width
    }

    #[inline]
    fn offset(&self, loc: GridLocation) -> usize {
        usize::from(loc.r) * usize::from(self.width) + usize::from(loc.c)
    }

    /// The object occupying `loc`, if any.
    #[must_use]
    pub fn object_at(&self, loc: GridLocation) -> Option<ObjectKey> {
        if !self.contains(loc) {
            return None;
        }
        self.cells[self.offset(loc)]
    }

    /// Whether `loc` is inside the grid and unoccupied.
    #[must_use]
    pub fn is_empty_cell(&self, loc: GridLocation) -> bool {
        self.contains(loc) && self.cells[self.offset(loc)].is_none()
    }

    /// Place `key` at `loc`.
    pub fn place(&mut self, key: ObjectKey, loc: GridLocation) -> Result<(), GridError> {
        if !self.contains(loc) {
            return Err(GridError::OutOfBounds(loc));
        }
        let slot = self.offset(loc);
        if self.cells[slot].is_some() {
            return Err(GridError::Occupied(loc));
        }
        self.cells[slot] = Some(key);
        Ok(())
    }

    /// Move the object at `from` to `to`. Fails without side effects if `to`
    /// is occupied or out of bounds.
    pub fn relocate(&mut self, from: GridLocation, to: GridLocation) -> Result<(), GridError> {
        if !self.contains(to) {
            return Err(GridError::OutOfBounds(to));
        }
        if self.cells[self.offset(to)].is_some() {
            return Err(GridError::Occupied(to));
        }
        let from_slot = self.offset(from);
        let key = self.cells[from_slot].take();
        debug_assert!(key.is_some(), "relocate source cell must be occupied");
        let to_slot = self.offset(to);
        self.cells[to_slot] = key;
        Ok(())
    }

    /// Clear the cell at `loc`, returning the evicted object handle.
    pub fn clear(&mut self, loc: GridLocation) -> Option<ObjectKey> {
        if !self.contains(loc) {
            return None;
        }
        let slot = self.offset(loc);
        self.cells[slot].take()
    }

    /// Visit every in-bounds location within Chebyshev distance `radius` of
    /// `center`, excluding the center itself. Used by closure queries and
    /// nearby-object scans.
    pub fn for_each_neighbor(
        &self,
        center: GridLocation,
        radius: u16,
        mut visit: impl FnMut(GridLocation),
    ) {
        let radius = i32::from(radius);
        for dr in -radius..=radius {
            for dc in -radius..=radius {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let r = i32::from(center.r) + dr;
                let c = i32::from(center.c) + dc;
                if r < 0 || c < 0 || r >= i32::from(self.height) || c >= i32::from(self.width) {
                    continue;
                }
                visit(GridLocation::new(r as GridCoord, c as GridCoord));
            }
        }
    }
}
