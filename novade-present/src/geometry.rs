//! Rectangles and points in window-system coordinates.

use novade_dri2::Rectangle;

/// An edge-based rectangle: `right` and `bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// A rectangle of the given size anchored at the origin.
    pub const fn from_size(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub const fn width(&self) -> i32 {
        self.right - self.left
    }

    pub const fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Computes where a copy lands inside `self`.
    ///
    /// Without `dest` the whole of `self` is the destination. Otherwise `dest`
    /// is taken relative to `self`: its left/top are offsets from `self`'s
    /// origin and its right/bottom are extents from the offset origin. Every
    /// resulting edge is clamped so it does not pass `self`'s right or bottom
    /// edge; the left/top edges are not clamped.
    pub fn destination(&self, dest: Option<&Rect>) -> Rect {
        let Some(dest) = dest else {
            return *self;
        };
        let left = self.left.saturating_add(dest.left);
        let top = self.top.saturating_add(dest.top);
        let right = dest.right.saturating_add(left);
        let bottom = dest.bottom.saturating_add(top);
        Rect {
            left: left.min(self.right),
            top: top.min(self.bottom),
            right: right.min(self.right),
            bottom: bottom.min(self.bottom),
        }
    }

    /// The X rectangle covering `self`. Out-of-range values saturate and an
    /// inverted rectangle becomes empty.
    pub fn to_rectangle(&self) -> Rectangle {
        fn coord(v: i32) -> i16 {
            v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
        }
        fn extent(v: i32) -> u16 {
            v.clamp(0, u16::MAX as i32) as u16
        }
        Rectangle {
            x: coord(self.left),
            y: coord(self.top),
            width: extent(self.width()),
            height: extent(self.height()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}
