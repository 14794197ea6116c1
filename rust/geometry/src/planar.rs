// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Planar analytic geometry
//!
//! Value types and predicates used for hit-testing, layout and edge routing
//! in diagram rendering. Every function is pure; inputs are copied and
//! results are returned fresh.

use crate::{Error, Result};
use smallvec::SmallVec;
use std::f64::consts::PI;

/// Tolerance for classifying a point as lying on a line
pub const ON_LINE_TOLERANCE: f64 = f64::EPSILON * 1000.0;

/// Tolerance on edge parameters in line/rectangle intersection
const EDGE_PARAM_TOLERANCE: f64 = 1e-10;

/// Widening applied to coordinate ranges in segment intersection
const BETWEEN_TOLERANCE: f64 = 1e-9;

/// Sine of the angle below which two lines are treated as parallel
const PARALLEL_TOLERANCE: f64 = 1e-12;

/// A point in the plane
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A segment from `p1` to `p2`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Line {
    pub p1: Point,
    pub p2: Point,
}

impl Line {
    #[inline]
    pub const fn new(p1: Point, p2: Point) -> Self {
        Self { p1, p2 }
    }

    #[inline]
    fn dx(&self) -> f64 {
        self.p2.x - self.p1.x
    }

    #[inline]
    fn dy(&self) -> f64 {
        self.p2.y - self.p1.y
    }

    #[inline]
    pub fn length(&self) -> f64 {
        self.dx().hypot(self.dy())
    }
}

/// A directed segment; `p1` is the tail, `p2` the head
pub type Vector = Line;

/// Axis-aligned rectangle with `p1` holding the smaller coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rectangle {
    pub p1: Point,
    pub p2: Point,
}

impl Rectangle {
    /// Create a rectangle from two opposite corners in any order
    pub fn new(a: Point, b: Point) -> Self {
        Self {
            p1: Point::new(a.x.min(b.x), a.y.min(b.y)),
            p2: Point::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.p2.x - self.p1.x
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.p2.y - self.p1.y
    }

    /// Edges in order bottom, right, top, left
    fn edges(&self) -> [Line; 4] {
        let a = self.p1;
        let b = Point::new(self.p2.x, self.p1.y);
        let c = self.p2;
        let d = Point::new(self.p1.x, self.p2.y);
        [Line::new(a, b), Line::new(b, c), Line::new(c, d), Line::new(d, a)]
    }
}

/// Equation of the infinite line through a segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineEquation {
    /// `y = slope * x + intercept`
    Sloped { slope: f64, intercept: f64 },
    /// `x = x`
    Vertical { x: f64 },
}

impl LineEquation {
    #[inline]
    pub fn is_vertical(&self) -> bool {
        matches!(self, LineEquation::Vertical { .. })
    }
}

/// Result of intersecting two infinite lines
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineIntersection {
    /// The lines cross at exactly one point
    Point(Point),
    /// The lines are the same line; every point is shared
    Coincident,
    /// Distinct parallel lines; nothing is shared
    Parallel,
}

/// Euclidean distance
#[inline]
pub fn distance(p1: Point, p2: Point) -> f64 {
    (p2.x - p1.x).hypot(p2.y - p1.y)
}

/// Slope/intercept form of the line through `line`
pub fn line_equation(line: &Line) -> LineEquation {
    let dx = line.dx();
    if dx == 0.0 {
        return LineEquation::Vertical { x: line.p1.x };
    }
    let slope = line.dy() / dx;
    LineEquation::Sloped {
        slope,
        intercept: line.p1.y - slope * line.p1.x,
    }
}

/// Classify `point` against a line: 1 above (right of a vertical line), 0 on, -1 below
pub fn point_side(point: Point, equation: &LineEquation) -> i8 {
    let offset = match *equation {
        LineEquation::Sloped { slope, intercept } => point.y - (slope * point.x + intercept),
        LineEquation::Vertical { x } => point.x - x,
    };
    if offset.abs() <= ON_LINE_TOLERANCE {
        0
    } else if offset > 0.0 {
        1
    } else {
        -1
    }
}

/// Whether two segments intersect (touching endpoints count)
pub fn lines_intersect(l1: &Line, l2: &Line) -> bool {
    let eq1 = line_equation(l1);
    let eq2 = line_equation(l2);

    let s1 = point_side(l1.p1, &eq2);
    let s2 = point_side(l1.p2, &eq2);
    let s3 = point_side(l2.p1, &eq1);
    let s4 = point_side(l2.p2, &eq1);

    if s1 == 0 && s2 == 0 && s3 == 0 && s4 == 0 {
        // Collinear: overlap of extents decides
        return rectangles_intersect(
            &Rectangle::new(l1.p1, l1.p2),
            &Rectangle::new(l2.p1, l2.p2),
        );
    }

    s1 * s2 <= 0 && s3 * s4 <= 0
}

/// Intersection of the infinite lines through `l1` and `l2` (Cramer's rule)
pub fn lines_intersection(l1: &Line, l2: &Line) -> LineIntersection {
    // a*x + b*y = c
    let a1 = l1.dy();
    let b1 = -l1.dx();
    let c1 = a1 * l1.p1.x + b1 * l1.p1.y;

    let a2 = l2.dy();
    let b2 = -l2.dx();
    let c2 = a2 * l2.p1.x + b2 * l2.p1.y;

    // Scaled by both lengths so short segments keep their crossing
    let det = a1 * b2 - a2 * b1;
    if det.abs() <= PARALLEL_TOLERANCE * l1.length() * l2.length() {
        // Parallel: coincident iff l2 lies on l1
        let eq1 = line_equation(l1);
        return if point_side(l2.p1, &eq1) == 0 {
            LineIntersection::Coincident
        } else {
            LineIntersection::Parallel
        };
    }

    LineIntersection::Point(Point::new(
        (c1 * b2 - c2 * b1) / det,
        (a1 * c2 - a2 * c1) / det,
    ))
}

/// Points where segment `line` crosses the border of `rect`
pub fn line_rectangle_intersections(line: &Line, rect: &Rectangle) -> SmallVec<[Point; 4]> {
    let mut result = SmallVec::new();

    let extent = Rectangle::new(line.p1, line.p2);
    if !rectangles_intersect(&extent, rect) {
        return result;
    }

    let d = Point::new(line.dx(), line.dy());
    for edge in rect.edges() {
        let e = Point::new(edge.dx(), edge.dy());
        let denom = d.x * e.y - d.y * e.x;
        if denom == 0.0 {
            continue;
        }
        let w = Point::new(edge.p1.x - line.p1.x, edge.p1.y - line.p1.y);
        let t = (w.x * e.y - w.y * e.x) / denom;
        let u = (w.x * d.y - w.y * d.x) / denom;

        let in_range = |v: f64| (-EDGE_PARAM_TOLERANCE..=1.0 + EDGE_PARAM_TOLERANCE).contains(&v);
        if in_range(t) && in_range(u) {
            let p = Point::new(line.p1.x + t * d.x, line.p1.y + t * d.y);
            if !result
                .iter()
                .any(|q: &Point| distance(*q, p) <= EDGE_PARAM_TOLERANCE)
            {
                result.push(p);
            }
        }
    }

    result
}

/// Centroid of a simple polygon (shoelace formula)
pub fn polygon_centroid(polygon: &[Point]) -> Result<Point> {
    let n = polygon.len();
    if n < 3 {
        return Err(Error::DegeneratePolygon(n));
    }

    let mut area2 = 0.0;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for i in 0..n {
        let p = polygon[i];
        let q = polygon[(i + 1) % n];
        let cross = p.x * q.y - q.x * p.y;
        area2 += cross;
        cx += (p.x + q.x) * cross;
        cy += (p.y + q.y) * cross;
    }

    if area2.abs() <= f64::EPSILON {
        // Zero area: all points collinear
        let (sx, sy) = polygon
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        return Ok(Point::new(sx / n as f64, sy / n as f64));
    }

    // area2 is twice the signed area, so 6A = 3 * area2
    Ok(Point::new(cx / (3.0 * area2), cy / (3.0 * area2)))
}

/// Direction of a vector in `[0, 2π)`
pub fn vector_angle(vector: &Vector) -> f64 {
    let angle = vector.dy().atan2(vector.dx());
    if angle < 0.0 {
        angle + 2.0 * PI
    } else {
        angle
    }
}

#[inline]
pub fn vector_length(vector: &Vector) -> f64 {
    distance(vector.p1, vector.p2)
}

/// Rotate `point` by `angle` radians counter-clockwise about `center`
pub fn rotate_point(point: Point, center: Point, angle: f64) -> Point {
    let (sin, cos) = angle.sin_cos();
    let dx = point.x - center.x;
    let dy = point.y - center.y;
    Point::new(
        center.x + dx * cos - dy * sin,
        center.y + dx * sin + dy * cos,
    )
}

/// Rotate a vector about its tail
pub fn rotate_vector(vector: &Vector, angle: f64) -> Vector {
    Vector::new(vector.p1, rotate_point(vector.p2, vector.p1, angle))
}

/// Same direction, length `new_length`, tail moved to the origin.
///
/// A zero-length vector stays zero.
pub fn normalize_vector(vector: &Vector, new_length: f64) -> Vector {
    let length = vector_length(vector);
    let head = if length == 0.0 {
        Point::default()
    } else {
        let k = new_length / length;
        Point::new(vector.dx() * k, vector.dy() * k)
    };
    Vector::new(Point::default(), head)
}

/// Smallest rectangle containing every point, `None` without points
pub fn bounding_box(points: &[Point]) -> Option<Rectangle> {
    let first = *points.first()?;
    let mut p1 = first;
    let mut p2 = first;
    for p in &points[1..] {
        p1.x = p1.x.min(p.x);
        p1.y = p1.y.min(p.y);
        p2.x = p2.x.max(p.x);
        p2.y = p2.y.max(p.y);
    }
    Some(Rectangle { p1, p2 })
}

/// Grow `rect` by `margin` on every side; a negative margin shrinks it.
///
/// Shrinking past zero size collapses that axis onto its centre.
pub fn enlarge_box(rect: &mut Rectangle, margin: f64) {
    rect.p1.x -= margin;
    rect.p1.y -= margin;
    rect.p2.x += margin;
    rect.p2.y += margin;

    if rect.p1.x > rect.p2.x {
        let mid = (rect.p1.x + rect.p2.x) / 2.0;
        rect.p1.x = mid;
        rect.p2.x = mid;
    }
    if rect.p1.y > rect.p2.y {
        let mid = (rect.p1.y + rect.p2.y) / 2.0;
        rect.p1.y = mid;
        rect.p2.y = mid;
    }
}

/// Axis-aligned overlap test; shared borders count as overlap
#[inline]
pub fn rectangles_intersect(r1: &Rectangle, r2: &Rectangle) -> bool {
    r1.p1.x <= r2.p2.x && r2.p1.x <= r1.p2.x && r1.p1.y <= r2.p2.y && r2.p1.y <= r1.p2.y
}

/// Intersection point of two segments, if they cross
pub fn segments_intersection(l1: &Line, l2: &Line) -> Option<Point> {
    let p = match lines_intersection(l1, l2) {
        LineIntersection::Point(p) => p,
        LineIntersection::Coincident | LineIntersection::Parallel => return None,
    };

    let between = |v: f64, a: f64, b: f64| {
        v >= a.min(b) - BETWEEN_TOLERANCE && v <= a.max(b) + BETWEEN_TOLERANCE
    };

    if between(p.x, l1.p1.x, l1.p2.x)
        && between(p.y, l1.p1.y, l1.p2.y)
        && between(p.x, l2.p1.x, l2.p2.x)
        && between(p.y, l2.p1.y, l2.p2.y)
    {
        Some(p)
    } else {
        None
    }
}
