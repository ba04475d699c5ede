//! Layout policies and the geometry they produce
//!
//! Every function here is pure: it takes the usable area and the number of
//! windows and returns one slot per window, in container order.

use std::fmt;
use std::str::FromStr;

use crate::compositor::geometry::Rectangle;
use crate::layout::LayoutError;

/// How a workspace arranges its tiled windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LayoutPolicy {
    /// Free placement; tiled windows fall back to the split tree
    Floating,
    /// Recursive splits along each container's axis
    #[default]
    Tiling,
    /// Only the focused window is shown, using the whole area
    Monocle,
    /// ceil(sqrt(n)) columns
    Grid,
    /// Title strips on top of each other, focused window below them
    Stacked,
    /// One row of tabs, focused window below it
    Tabbed,
    /// Halving with alternating axes
    Spiral,
    /// Like spiral, but divided by the split ratio
    Dwindle,
}

impl LayoutPolicy {
    /// All policies in cycling order
    pub const ALL: [LayoutPolicy; 8] = [
        LayoutPolicy::Floating,
        LayoutPolicy::Tiling,
        LayoutPolicy::Monocle,
        LayoutPolicy::Grid,
        LayoutPolicy::Stacked,
        LayoutPolicy::Tabbed,
        LayoutPolicy::Spiral,
        LayoutPolicy::Dwindle,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LayoutPolicy::Floating => "floating",
            LayoutPolicy::Tiling => "tiling",
            LayoutPolicy::Monocle => "monocle",
            LayoutPolicy::Grid => "grid",
            LayoutPolicy::Stacked => "stacked",
            LayoutPolicy::Tabbed => "tabbed",
            LayoutPolicy::Spiral => "spiral",
            LayoutPolicy::Dwindle => "dwindle",
        }
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|p| *p == self).unwrap_or(0)
    }

    /// Next policy, wrapping
    pub fn next(self) -> Self {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    /// Previous policy, wrapping
    pub fn prev(self) -> Self {
        Self::ALL[(self.index() + Self::ALL.len() - 1) % Self::ALL.len()]
    }

    /// Whether the split tree shapes the geometry
    pub fn uses_tree(self) -> bool {
        matches!(self, LayoutPolicy::Tiling | LayoutPolicy::Floating)
    }
}

impl fmt::Display for LayoutPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LayoutPolicy {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| LayoutError::UnknownPolicy(s.to_string()))
    }
}

/// Split direction of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SplitAxis {
    /// Children side by side, as columns
    #[default]
    Vertical,
    /// Children on top of each other, as rows
    Horizontal,
}

impl SplitAxis {
    pub fn toggled(self) -> Self {
        match self {
            SplitAxis::Vertical => SplitAxis::Horizontal,
            SplitAxis::Horizontal => SplitAxis::Vertical,
        }
    }
}

/// Where one window goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Slot {
    /// Cell for the window content
    pub geometry: Rectangle,
    /// Title strip drawn for the window, if the policy has one
    pub title_bar: Option<Rectangle>,
    /// Hidden windows keep their geometry but are not drawn
    pub visible: bool,
}

impl Slot {
    fn shown(geometry: Rectangle) -> Self {
        Self {
            geometry,
            title_bar: None,
            visible: true,
        }
    }
}

/// Divide `area` into `count` equal cells along `axis`; the remainder
/// pixels go to the last cells so the cells tile the area exactly
pub fn split_equal(area: Rectangle, axis: SplitAxis, count: usize) -> Vec<Rectangle> {
    if count == 0 {
        return Vec::new();
    }
    let n = count as i64;
    let length = match axis {
        SplitAxis::Vertical => area.width,
        SplitAxis::Horizontal => area.height,
    } as i64;
    (0..n)
        .map(|i| {
            let start = (i * length / n) as i32;
            let end = ((i + 1) * length / n) as i32;
            match axis {
                SplitAxis::Vertical => Rectangle::new(area.x + start, area.y, end - start, area.height),
                SplitAxis::Horizontal => Rectangle::new(area.x, area.y + start, area.width, end - start),
            }
        })
        .collect()
}

/// Divide `area` in two along `axis`, the first part taking `ratio`
pub fn split_ratio(area: Rectangle, axis: SplitAxis, ratio: f32) -> (Rectangle, Rectangle) {
    match axis {
        SplitAxis::Vertical => {
            let first = (area.width as f32 * ratio) as i32;
            (
                Rectangle::new(area.x, area.y, first, area.height),
                Rectangle::new(area.x + first, area.y, area.width - first, area.height),
            )
        }
        SplitAxis::Horizontal => {
            let first = (area.height as f32 * ratio) as i32;
            (
                Rectangle::new(area.x, area.y, area.width, first),
                Rectangle::new(area.x, area.y + first, area.width, area.height - first),
            )
        }
    }
}

/// Everyone gets the full area; only the focused window is drawn
pub fn monocle(area: Rectangle, count: usize, focused: usize) -> Vec<Slot> {
    (0..count)
        .map(|i| Slot {
            visible: i == focused,
            ..Slot::shown(area)
        })
        .collect()
}

pub fn grid(area: Rectangle, count: usize) -> Vec<Slot> {
    if count == 0 {
        return Vec::new();
    }
    let cols = (count as f64).sqrt().ceil() as usize;
    let rows = count.div_ceil(cols);
    let columns = split_equal(area, SplitAxis::Vertical, cols);
    let row_cells: Vec<Vec<Rectangle>> = columns
        .iter()
        .map(|column| split_equal(*column, SplitAxis::Horizontal, rows))
        .collect();
    (0..count)
        .map(|i| Slot::shown(row_cells[i % cols][i / cols]))
        .collect()
}

pub fn stacked(area: Rectangle, count: usize, focused: usize, title_height: i32) -> Vec<Slot> {
    let titles = (count as i32 * title_height).min(area.height);
    let content = Rectangle::new(area.x, area.y + titles, area.width, area.height - titles);
    (0..count)
        .map(|i| Slot {
            geometry: content,
            title_bar: Some(Rectangle::new(
                area.x,
                area.y + i as i32 * title_height,
                area.width,
                title_height,
            )),
            visible: i == focused,
        })
        .collect()
}

pub fn tabbed(area: Rectangle, count: usize, focused: usize, title_height: i32) -> Vec<Slot> {
    let strip_height = title_height.min(area.height);
    let strip = Rectangle::new(area.x, area.y, area.width, strip_height);
    let content = Rectangle::new(area.x, area.y + strip_height, area.width, area.height - strip_height);
    split_equal(strip, SplitAxis::Vertical, count)
        .into_iter()
        .enumerate()
        .map(|(i, tab)| Slot {
            geometry: content,
            title_bar: Some(tab),
            visible: i == focused,
        })
        .collect()
}

/// Alternate vertical and horizontal cuts, each window taking `ratio` of
/// what is left; the last window takes the rest
fn alternating(area: Rectangle, count: usize, ratio: f32) -> Vec<Slot> {
    let mut rest = area;
    let mut slots = Vec::with_capacity(count);
    for i in 0..count {
        if i + 1 == count {
            slots.push(Slot::shown(rest));
            break;
        }
        let axis = if i % 2 == 0 {
            SplitAxis::Vertical
        } else {
            SplitAxis::Horizontal
        };
        let (first, second) = split_ratio(rest, axis, ratio);
        slots.push(Slot::shown(first));
        rest = second;
    }
    slots
}

pub fn spiral(area: Rectangle, count: usize) -> Vec<Slot> {
    alternating(area, count, 0.5)
}

pub fn dwindle(area: Rectangle, count: usize, ratio: f32) -> Vec<Slot> {
    alternating(area, count, ratio)
}
