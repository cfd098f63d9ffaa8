// ============================================================================
// GEOMETRY: world / layer transforms, bounding boxes, polygon tests
// ============================================================================

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Placement of a layer in world space.
///
/// Rendering applies scale → rotate → translate around the layer's own
/// center, so a layer-space point `(w/2, h/2)` lands exactly on `(x, y)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerTransform {
    pub x: f64,
    pub y: f64,
    pub scale: f64,
    pub rotation: f64,
    /// Native (layer-space) width.
    pub width: f64,
    /// Native (layer-space) height.
    pub height: f64,
}

impl LayerTransform {
    pub fn identity(width: f64, height: f64) -> Self {
        Self { x: width / 2.0, y: height / 2.0, scale: 1.0, rotation: 0.0, width, height }
    }
}

/// World point → the layer's unrotated, unscaled pixel space.
pub fn world_to_layer(p: Point, t: &LayerTransform) -> Point {
    let dx = (p.x - t.x) / t.scale;
    let dy = (p.y - t.y) / t.scale;
    let (sin, cos) = (-t.rotation).sin_cos();
    Point {
        x: dx * cos - dy * sin + t.width / 2.0,
        y: dx * sin + dy * cos + t.height / 2.0,
    }
}

/// Layer pixel space → world point (the render transform).
pub fn layer_to_world(p: Point, t: &LayerTransform) -> Point {
    let dx = p.x - t.width / 2.0;
    let dy = p.y - t.height / 2.0;
    let (sin, cos) = t.rotation.sin_cos();
    Point {
        x: (dx * cos - dy * sin) * t.scale + t.x,
        y: (dx * sin + dy * cos) * t.scale + t.y,
    }
}

/// The four world-space corners of a layer, clockwise from its top-left.
pub fn world_corners(t: &LayerTransform) -> [Point; 4] {
    [
        layer_to_world(Point::new(0.0, 0.0), t),
        layer_to_world(Point::new(t.width, 0.0), t),
        layer_to_world(Point::new(t.width, t.height), t),
        layer_to_world(Point::new(0.0, t.height), t),
    ]
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn at(p: Point) -> Self {
        Self { min_x: p.x, min_y: p.y, max_x: p.x, max_y: p.y }
    }

    /// Tight box around `points`; `None` for an empty sequence.
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Point>,
    {
        let mut iter = points.into_iter();
        let mut bbox = Self::at(*iter.next()?);
        for p in iter {
            bbox.include(*p);
        }
        Some(bbox)
    }

    /// Grow to contain `p` (O(1) incremental accumulation).
    pub fn include(&mut self, p: Point) {
        self.min_x = self.min_x.min(p.x);
        self.min_y = self.min_y.min(p.y);
        self.max_x = self.max_x.max(p.x);
        self.max_y = self.max_y.max(p.y);
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> Point {
        Point::new((self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0)
    }

    /// Zero or negative area: "no usable region".
    pub fn is_degenerate(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }
}

/// Even-odd point-in-polygon test.  The polygon is implicitly closed.
pub fn point_in_polygon(p: Point, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (a, b) = (polygon[i], polygon[j]);
        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Join closed rings into one polygon for even-odd filling.  Each later
/// ring is reached from the first ring's start by a bridge walked out and
/// back, so the bridge edges cancel and the rings keep their own areas.
pub fn join_rings(rings: &[Vec<Point>]) -> Vec<Point> {
    let mut rings = rings.iter().filter(|r| !r.is_empty());
    let Some(first) = rings.next() else { return Vec::new() };
    let anchor = first[0];
    let mut joined = first.clone();
    for ring in rings {
        joined.push(anchor);
        joined.extend_from_slice(ring);
        joined.push(ring[0]);
    }
    if joined.len() > first.len() {
        joined.push(anchor);
    }
    joined
}
