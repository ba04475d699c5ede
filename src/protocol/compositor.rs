//! wl_region state
//!
//! Regions are built by clients from added and subtracted rectangles and
//! copied into a surface's pending state when set as its input or opaque
//! region.

use crate::compositor::geometry::Rectangle;

/// Operations kept before a region degrades to its bounding box
const MAX_REGION_OPS: usize = 64;

/// A region for defining input or opaque areas
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Region {
    /// Rectangle operations in request order
    ops: Vec<RegionOp>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RegionOp {
    Add(Rectangle),
    Subtract(Rectangle),
}

impl RegionOp {
    fn rect(&self) -> Rectangle {
        match self {
            RegionOp::Add(rect) | RegionOp::Subtract(rect) => *rect,
        }
    }
}

impl Region {
    /// Create a new empty region
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Add a rectangle to the region
    pub fn add(&mut self, rect: Rectangle) {
        if !rect.is_empty() {
            self.push(RegionOp::Add(rect));
        }
    }

    /// Subtract a rectangle from the region
    pub fn subtract(&mut self, rect: Rectangle) {
        if !rect.is_empty() && !self.ops.is_empty() {
            self.push(RegionOp::Subtract(rect));
        }
    }

    /// Append an operation, dropping the ones it hides entirely
    fn push(&mut self, op: RegionOp) {
        let rect = op.rect();
        if let Some(RegionOp::Add(last)) = self.ops.last() {
            if matches!(op, RegionOp::Add(_)) && last.covers(&rect) {
                return;
            }
        }
        self.ops.retain(|earlier| !rect.covers(&earlier.rect()));
        if self.ops.len() >= MAX_REGION_OPS {
            let extents = self.extents();
            self.ops.clear();
            if !extents.is_empty() {
                self.ops.push(RegionOp::Add(extents));
            }
        }
        if matches!(op, RegionOp::Subtract(_)) && self.ops.is_empty() {
            return;
        }
        self.ops.push(op);
    }

    /// Check if a point is inside the region.
    ///
    /// Later operations win over earlier ones.
    pub fn contains(&self, px: i32, py: i32) -> bool {
        let (x, y) = (px as f64, py as f64);
        self.ops
            .iter()
            .rev()
            .find_map(|op| match op {
                RegionOp::Add(rect) if rect.contains(x, y) => Some(true),
                RegionOp::Subtract(rect) if rect.contains(x, y) => Some(false),
                _ => None,
            })
            .unwrap_or(false)
    }

    /// Bounding box of the added rectangles still in effect
    pub fn extents(&self) -> Rectangle {
        self.ops.iter().fold(Rectangle::default(), |acc, op| match op {
            RegionOp::Add(rect) => acc.union(rect),
            RegionOp::Subtract(_) => acc,
        })
    }

    /// Check if the region is empty
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_add() {
        let mut region = Region::new();
        region.add(Rectangle::new(0, 0, 100, 100));
        assert!(region.contains(50, 50));
        assert!(!region.contains(150, 150));
    }

    #[test]
    fn test_region_subtract() {
        let mut region = Region::new();
        region.add(Rectangle::new(0, 0, 100, 100));
        region.subtract(Rectangle::new(25, 25, 50, 50));
        assert!(region.contains(10, 10));
        assert!(!region.contains(50, 50));
    }

    #[test]
    fn test_region_add_after_subtract() {
        let mut region = Region::new();
        region.add(Rectangle::new(0, 0, 100, 100));
        region.subtract(Rectangle::new(0, 0, 50, 50));
        region.add(Rectangle::new(10, 10, 5, 5));
        assert!(region.contains(12, 12));
        assert!(!region.contains(30, 30));
        assert_eq!(region.extents(), Rectangle::new(0, 0, 100, 100));
    }

    #[test]
    fn test_hidden_operations_are_dropped() {
        let mut region = Region::new();
        for i in 0..1000 {
            region.add(Rectangle::new(i % 10, 0, 5, 5));
        }
        region.add(Rectangle::new(0, 0, 100, 100));
        assert_eq!(region.ops.len(), 1);

        for _ in 0..1000 {
            region.add(Rectangle::new(10, 10, 5, 5));
        }
        assert_eq!(region.ops.len(), 1);
    }

    #[test]
    fn test_operations_are_capped() {
        let mut region = Region::new();
        for i in 0..1000 {
            region.add(Rectangle::new(i * 10, 0, 5, 5));
        }
        assert!(region.ops.len() <= MAX_REGION_OPS);
        assert!(region.contains(0, 0));
        assert!(region.contains(9990, 0));
    }

    #[test]
    fn test_huge_rectangle() {
        let mut region = Region::new();
        region.add(Rectangle::new(1, 1, i32::MAX, i32::MAX));
        assert!(region.contains(1000, 1000));
        assert!(!region.contains(0, 0));
    }

    #[test]
    fn test_subtract_from_empty_stays_empty() {
        let mut region = Region::new();
        region.subtract(Rectangle::new(0, 0, 10, 10));
        assert!(region.is_empty());
    }
}
