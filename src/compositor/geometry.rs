//! Integer rectangles shared by damage tracking, layout and hit-testing.
//!
//! Coordinates come straight from clients, so edge arithmetic saturates at
//! the `i32` limits instead of overflowing.

/// An axis-aligned rectangle in logical pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rectangle {
    /// Create a new rectangle
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A rectangle at the origin with the given size
    pub const fn from_size(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// True when the rectangle covers no pixels
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    /// Smallest rectangle containing both `self` and `other`.
    ///
    /// Empty rectangles are ignored, so the union never shrinks a
    /// non-empty accumulator.
    pub fn union(&self, other: &Rectangle) -> Rectangle {
        if other.is_empty() {
            return *self;
        }
        if self.is_empty() {
            return *other;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Rectangle {
            x,
            y,
            width: self.right().max(other.right()).saturating_sub(x),
            height: self.bottom().max(other.bottom()).saturating_sub(y),
        }
    }

    /// Overlapping area, if any
    pub fn intersection(&self, other: &Rectangle) -> Option<Rectangle> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x || bottom <= y {
            None
        } else {
            Some(Rectangle::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y)))
        }
    }

    /// Whether `other` lies entirely inside this rectangle
    pub fn covers(&self, other: &Rectangle) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Check whether a point lies inside the rectangle
    pub fn contains(&self, px: f64, py: f64) -> bool {
        px >= self.x as f64
            && px < self.right() as f64
            && py >= self.y as f64
            && py < self.bottom() as f64
    }

    /// Center point
    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    /// Same size, moved by (dx, dy)
    pub fn translate(&self, dx: i32, dy: i32) -> Rectangle {
        Rectangle::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.width,
            self.height,
        )
    }

    /// Shrink by `amount` on every edge, never below zero size
    pub fn inset(&self, amount: i32) -> Rectangle {
        Rectangle {
            x: self.x + amount,
            y: self.y + amount,
            width: (self.width - 2 * amount).max(0),
            height: (self.height - 2 * amount).max(0),
        }
    }

    /// Scale every coordinate by an integer factor
    pub fn scale(&self, factor: i32) -> Rectangle {
        Rectangle::new(
            self.x.saturating_mul(factor),
            self.y.saturating_mul(factor),
            self.width.saturating_mul(factor),
            self.height.saturating_mul(factor),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_covers_both() {
        let a = Rectangle::new(0, 0, 10, 10);
        let b = Rectangle::new(20, 5, 5, 20);
        let u = a.union(&b);
        assert_eq!(u, Rectangle::new(0, 0, 25, 25));
    }

    #[test]
    fn test_union_ignores_empty() {
        let a = Rectangle::new(3, 3, 4, 4);
        assert_eq!(a.union(&Rectangle::default()), a);
        assert_eq!(Rectangle::default().union(&a), a);
    }

    #[test]
    fn test_intersection() {
        let a = Rectangle::new(0, 0, 10, 10);
        let b = Rectangle::new(5, 5, 10, 10);
        assert_eq!(a.intersection(&b), Some(Rectangle::new(5, 5, 5, 5)));
        assert_eq!(a.intersection(&Rectangle::new(10, 0, 5, 5)), None);
    }

    #[test]
    fn test_contains_is_half_open() {
        let r = Rectangle::new(0, 0, 100, 50);
        assert!(r.contains(0.0, 0.0));
        assert!(r.contains(99.5, 49.5));
        assert!(!r.contains(100.0, 10.0));
    }

    #[test]
    fn test_edges_saturate() {
        let huge = Rectangle::new(1, 1, i32::MAX, i32::MAX);
        assert_eq!(huge.right(), i32::MAX);
        assert_eq!(
            huge.intersection(&Rectangle::from_size(100, 100)),
            Some(Rectangle::new(1, 1, 99, 99))
        );
        let u = Rectangle::new(-10, -10, 5, 5).union(&huge);
        assert_eq!(u, Rectangle::new(-10, -10, i32::MAX, i32::MAX));
        assert!(huge.contains(1e6, 1e6));
    }

    #[test]
    fn test_inset_clamps() {
        let r = Rectangle::new(0, 0, 6, 6).inset(4);
        assert_eq!(r.width, 0);
        assert!(r.is_empty());
    }
}
