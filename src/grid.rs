//! Uniform-grid index over a static set of obstacle points.
//!
//! Every obstacle is stored in its home cell *and* the 8 surrounding cells, so a
//! single-cell lookup already holds every obstacle that can lie within one cell
//! radius of any point inside that cell.

use crate::error::GridError;
use bevy_math::bounding::Aabb2d;
use glam::Vec2;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fractional margin added to inferred bounds so edge obstacles stay inside.
const BOUNDS_MARGIN: f32 = 0.01;

/// Smallest grid (per axis) worth bucketing.
const MIN_CELLS: usize = 4;

/// Largest cell table a grid may allocate.
pub const MAX_CELLS: usize = 1 << 24;

/// What happens to the cell table when obstacles are added after construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebuildPolicy {
    /// Rebuild the cells on every [`ObstacleGrid::extend`].
    #[default]
    Eager,
    /// Defer the rebuild. [`ObstacleGrid::query`] fails with
    /// [`GridError::RebuildRequired`] until [`ObstacleGrid::rebuild`] runs;
    /// [`ObstacleGrid::aggregate`] rebuilds on its own.
    Lazy,
}

/// Spatial index answering "obstacles near P" in constant time.
#[derive(Clone, Debug)]
pub struct ObstacleGrid {
    obstacles: Vec<Vec2>,
    cell_radius: f32,
    fixed_bounds: Option<Aabb2d>,
    policy: RebuildPolicy,
    layout: Layout,
    stale: bool,
}

#[derive(Clone, Debug)]
struct Layout {
    bounds: Aabb2d,
    nx: usize,
    ny: usize,
    cells: Vec<Vec<usize>>,
}

impl Layout {
    fn compute(
        obstacles: &[Vec2],
        cell_radius: f32,
        fixed_bounds: Option<Aabb2d>,
    ) -> Result<Self, GridError> {
        let bounds = match fixed_bounds {
            Some(b) => b,
            None => infer_bounds(obstacles).ok_or(GridError::Empty)?,
        };
        let extent = bounds.max - bounds.min;
        let nx = (extent.x / cell_radius).floor().max(0.0) as usize;
        let ny = (extent.y / cell_radius).floor().max(0.0) as usize;
        if nx < MIN_CELLS || ny < MIN_CELLS {
            return Err(GridError::Degenerate { nx, ny });
        }
        let count = nx
            .checked_mul(ny)
            .filter(|n| *n <= MAX_CELLS)
            .ok_or(GridError::TooManyCells { nx, ny })?;

        let mut layout = Self {
            bounds,
            nx,
            ny,
            cells: vec![Vec::new(); count],
        };
        for (idx, o) in obstacles.iter().enumerate() {
            let (i, j) = layout
                .home_cell(*o)
                .ok_or(GridError::OutOfBounds { x: o.x, y: o.y })?;
            for jj in j.saturating_sub(1)..=(j + 1).min(ny - 1) {
                for ii in i.saturating_sub(1)..=(i + 1).min(nx - 1) {
                    layout.cells[ii + jj * nx].push(idx);
                }
            }
        }
        Ok(layout)
    }

    fn extent(&self) -> Vec2 {
        self.bounds.max - self.bounds.min
    }

    /// Cell holding `p`, or `None` when `p` is outside the bounds.
    fn home_cell(&self, p: Vec2) -> Option<(usize, usize)> {
        let (min, max) = (self.bounds.min, self.bounds.max);
        if !(p.x >= min.x && p.x <= max.x && p.y >= min.y && p.y <= max.y) {
            return None;
        }
        let rel = (p - min) / self.extent();
        let i = ((rel.x * self.nx as f32) as usize).min(self.nx - 1);
        let j = ((rel.y * self.ny as f32) as usize).min(self.ny - 1);
        Some((i, j))
    }

    /// Cell for an arbitrary point; indices outside the grid wrap around.
    fn wrapped_cell(&self, p: Vec2) -> usize {
        if let Some((i, j)) = self.home_cell(p) {
            return i + j * self.nx;
        }
        let rel = (p - self.bounds.min) / self.extent();
        let i = ((rel.x * self.nx as f32).floor() as i64).rem_euclid(self.nx as i64) as usize;
        let j = ((rel.y * self.ny as f32).floor() as i64).rem_euclid(self.ny as i64) as usize;
        i + j * self.nx
    }
}

fn infer_bounds(points: &[Vec2]) -> Option<Aabb2d> {
    let first = *points.first()?;
    let (lo, hi) = points
        .iter()
        .fold((first, first), |(lo, hi), p| (lo.min(*p), hi.max(*p)));
    Some(Aabb2d {
        min: lo - lo.abs() * BOUNDS_MARGIN,
        max: hi + hi.abs() * BOUNDS_MARGIN,
    })
}

impl ObstacleGrid {
    /// Buckets `points` into cells of at least `cell_radius` per side.
    ///
    /// When `bounds` is `None` they are inferred from the data with a 1% margin.
    /// Fails when the resulting grid has fewer than 4 cells along either axis,
    /// or when a point falls outside explicit bounds.
    pub fn build(
        points: impl IntoIterator<Item = Vec2>,
        cell_radius: f32,
        bounds: Option<Aabb2d>,
    ) -> Result<Self, GridError> {
        if !(cell_radius.is_finite() && cell_radius > 0.0) {
            return Err(GridError::InvalidCellRadius(cell_radius));
        }
        let obstacles: Vec<Vec2> = points.into_iter().collect();
        let layout = Layout::compute(&obstacles, cell_radius, bounds)?;
        debug!(
            obstacles = obstacles.len(),
            nx = layout.nx,
            ny = layout.ny,
            "obstacle grid built"
        );
        Ok(Self {
            obstacles,
            cell_radius,
            fixed_bounds: bounds,
            policy: RebuildPolicy::default(),
            layout,
            stale: false,
        })
    }

    /// Sets the rebuild policy used by later [`extend`](Self::extend) calls (builder pattern).
    pub fn with_policy(mut self, policy: RebuildPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Parses whitespace separated `x y` lines, stopping at the first line that
    /// is not a coordinate pair.
    pub fn parse_points(text: &str) -> Vec<Vec2> {
        text.lines()
            .map_while(|line| {
                let mut it = line.split_whitespace().map(str::parse::<f32>);
                match (it.next(), it.next(), it.next()) {
                    (Some(Ok(x)), Some(Ok(y)), None) => Some(Vec2::new(x, y)),
                    _ => None,
                }
            })
            .collect()
    }

    /// Adds more obstacles.
    ///
    /// Under [`RebuildPolicy::Eager`] the cells are rebuilt immediately and the
    /// new points are rolled back if the rebuild fails. Under
    /// [`RebuildPolicy::Lazy`] the grid is only marked stale.
    pub fn extend(&mut self, points: impl IntoIterator<Item = Vec2>) -> Result<(), GridError> {
        let before = self.obstacles.len();
        self.obstacles.extend(points);
        match self.policy {
            RebuildPolicy::Eager => {
                if let Err(e) = self.rebuild() {
                    self.obstacles.truncate(before);
                    self.stale = false;
                    return Err(e);
                }
                Ok(())
            }
            RebuildPolicy::Lazy => {
                self.stale = self.stale || self.obstacles.len() != before;
                Ok(())
            }
        }
    }

    /// Recomputes bounds (unless fixed), dimensions and cell membership.
    pub fn rebuild(&mut self) -> Result<(), GridError> {
        self.layout = Layout::compute(&self.obstacles, self.cell_radius, self.fixed_bounds)?;
        self.stale = false;
        Ok(())
    }

    /// Returns every obstacle stored in the cell containing `point`.
    ///
    /// The result is a superset of the obstacles within one cell radius of
    /// `point`. Points outside the bounds are mapped back into the grid by
    /// index wrapping.
    pub fn query(&self, point: Vec2) -> Result<Vec<Vec2>, GridError> {
        if self.stale {
            return Err(GridError::RebuildRequired);
        }
        let cell = &self.layout.cells[self.layout.wrapped_cell(point)];
        Ok(cell.iter().map(|&idx| self.obstacles[idx]).collect())
    }

    /// Centroid of the obstacles homed in each cell holding at least `min_count` of them.
    pub fn aggregate(&mut self, min_count: usize) -> Result<Vec<Vec2>, GridError> {
        if self.stale {
            self.rebuild()?;
        }
        let layout = &self.layout;
        let mut homes: Vec<(Vec2, usize)> = vec![(Vec2::ZERO, 0); layout.nx * layout.ny];
        for o in &self.obstacles {
            if let Some((i, j)) = layout.home_cell(*o) {
                let slot = &mut homes[i + j * layout.nx];
                slot.0 += *o;
                slot.1 += 1;
            }
        }
        Ok(homes
            .into_iter()
            .filter(|(_, n)| *n > 0 && *n >= min_count)
            .map(|(sum, n)| sum / n as f32)
            .collect())
    }

    pub fn obstacles(&self) -> &[Vec2] {
        &self.obstacles
    }

    pub fn len(&self) -> usize {
        self.obstacles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obstacles.is_empty()
    }

    /// Number of cells along x and y.
    pub fn dimensions(&self) -> (usize, usize) {
        (self.layout.nx, self.layout.ny)
    }

    pub fn bounds(&self) -> Aabb2d {
        self.layout.bounds
    }

    pub fn cell_radius(&self) -> f32 {
        self.cell_radius
    }

    /// True when obstacles were added under the lazy policy and not rebuilt yet.
    pub fn is_stale(&self) -> bool {
        self.stale
    }
}
