// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Orthogonal edge paths
//!
//! A small SVG path model (`M`, `L`, `C`, `Z`) plus the corner rounding used
//! when routing diagram edges: parallel edges are pushed apart by a signed
//! perpendicular shift and every right-angle corner becomes a cubic bezier.

use crate::planar::{distance, Point};
use crate::{Error, Result};
use nom::{
    character::complete::one_of,
    combinator::{all_consuming, map},
    multi::{many0, many0_count},
    number::complete::double,
    sequence::{pair, preceded, terminated, tuple},
    IResult,
};
use std::fmt;
use std::str::FromStr;

/// Below this a direction or turn is treated as zero
const EPSILON: f64 = 1e-9;

/// Upper bound on the radius of any rounded corner
pub const MAX_CORNER_RADIUS: f64 = 1.0;

/// One drawing command of a path
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathStep {
    Move(Point),
    Line(Point),
    Cubic { c1: Point, c2: Point, to: Point },
    Close,
}

/// Sequence of drawing commands
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Path {
    pub steps: Vec<PathStep>,
}

impl Path {
    pub fn new(steps: Vec<PathStep>) -> Self {
        Self { steps }
    }

    /// Open polyline through `points`
    pub fn polyline(points: &[Point]) -> Self {
        let steps = points
            .iter()
            .enumerate()
            .map(|(i, &p)| if i == 0 { PathStep::Move(p) } else { PathStep::Line(p) })
            .collect();
        Self { steps }
    }

    /// Parse the SVG mini-grammar: `M`/`L`/`C`/`Z` followed by comma or
    /// space separated numbers, e.g. `"M 0 0 L 10,0 L 10 10 Z"`.
    ///
    /// Lower-case commands are read as absolute. Numbers follow SVG rules,
    /// so `"1.5.5"` is the two numbers `1.5` and `.5`.
    pub fn parse(input: &str) -> Result<Self> {
        match all_consuming(path_steps)(input) {
            Ok((_, steps)) => Ok(Self { steps }),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(Error::InvalidPath(
                format!("unexpected input at '{}'", e.input.trim()),
            )),
            Err(nom::Err::Incomplete(_)) => Err(Error::InvalidPath("truncated path".to_string())),
        }
    }

    /// Number of cubic bezier steps
    pub fn cubic_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, PathStep::Cubic { .. }))
            .count()
    }

    /// First point of the path
    pub fn start(&self) -> Option<Point> {
        match self.steps.first()? {
            PathStep::Move(p) | PathStep::Line(p) => Some(*p),
            PathStep::Cubic { to, .. } => Some(*to),
            PathStep::Close => None,
        }
    }

    /// Last explicit point of the path (the close command draws back to the start)
    pub fn end(&self) -> Option<Point> {
        self.steps.iter().rev().find_map(|s| match s {
            PathStep::Move(p) | PathStep::Line(p) => Some(*p),
            PathStep::Cubic { to, .. } => Some(*to),
            PathStep::Close => None,
        })
    }
}

impl FromStr for Path {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Path::parse(s)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match step {
                PathStep::Move(p) => write!(f, "M {} {}", p.x, p.y)?,
                PathStep::Line(p) => write!(f, "L {} {}", p.x, p.y)?,
                PathStep::Cubic { c1, c2, to } => write!(
                    f,
                    "C {} {} {} {} {} {}",
                    c1.x, c1.y, c2.x, c2.y, to.x, to.y
                )?,
                PathStep::Close => f.write_str("Z")?,
            }
        }
        Ok(())
    }
}

/// Whitespace and commas between tokens
fn separators(input: &str) -> IResult<&str, ()> {
    map(many0_count(one_of(" \t\r\n,")), |_| ())(input)
}

fn number(input: &str) -> IResult<&str, f64> {
    preceded(separators, double)(input)
}

fn point(input: &str) -> IResult<&str, Point> {
    map(pair(number, number), |(x, y)| Point::new(x, y))(input)
}

fn path_step(input: &str) -> IResult<&str, PathStep> {
    let (input, command) = preceded(separators, one_of("MLCZmlcz"))(input)?;
    match command.to_ascii_uppercase() {
        'M' => map(point, PathStep::Move)(input),
        'L' => map(point, PathStep::Line)(input),
        'C' => map(tuple((point, point, point)), |(c1, c2, to)| PathStep::Cubic {
            c1,
            c2,
            to,
        })(input),
        _ => Ok((input, PathStep::Close)),
    }
}

fn path_steps(input: &str) -> IResult<&str, Vec<PathStep>> {
    terminated(many0(path_step), separators)(input)
}

/// Round the corners of an orthogonal `M`/`L`(/`Z`) path.
///
/// With a non-zero `perpendicular_shift` every segment is first offset to its
/// left by that signed amount: interior vertices move to the intersection of
/// the two offset segments, so an inner corner moves towards the inside of
/// the turn and an outer corner away from it. Endpoints of an open path
/// slide along their segment's normal.
///
/// Each interior corner is then replaced by a line to the trim point and a
/// cubic bezier to the trim point on the outgoing segment. The trim radius is
/// `min(radius, distance from the previous drawn point, half the outgoing
/// segment, MAX_CORNER_RADIUS)`, and both control points sit halfway between
/// their trim point and the original corner. For a closed path the closing segment is rounded
/// like any other, and the start point is moved to the rounded end of the
/// corner at the first vertex.
pub fn bezier_path_corners(path: &Path, radius: f64, perpendicular_shift: f64) -> Result<Path> {
    let (mut points, closed) = polyline_points(path)?;
    if closed && points.len() > 1 && distance(points[0], points[points.len() - 1]) <= EPSILON {
        points.pop();
    }
    if points.len() < 2 || (closed && points.len() < 3) {
        return Ok(path.clone());
    }

    if perpendicular_shift != 0.0 {
        points = shift_vertices(&points, closed, perpendicular_shift);
    }

    let radius = radius.max(0.0).min(MAX_CORNER_RADIUS);
    Ok(if closed {
        round_closed(&points, radius)
    } else {
        round_open(&points, radius)
    })
}

/// Vertices of a single `M L* Z?` subpath
fn polyline_points(path: &Path) -> Result<(Vec<Point>, bool)> {
    let mut points = Vec::with_capacity(path.steps.len());
    let mut closed = false;

    for (i, step) in path.steps.iter().enumerate() {
        if closed {
            return Err(Error::InvalidPath("steps after close".to_string()));
        }
        match (i, step) {
            (0, PathStep::Move(p)) => points.push(*p),
            (0, _) => return Err(Error::InvalidPath("path must start with M".to_string())),
            (_, PathStep::Line(p)) => points.push(*p),
            (_, PathStep::Close) => closed = true,
            (_, PathStep::Move(_)) => {
                return Err(Error::InvalidPath("only a single subpath is supported".to_string()))
            }
            (_, PathStep::Cubic { .. }) => {
                return Err(Error::InvalidPath("corners are already rounded".to_string()))
            }
        }
    }

    Ok((points, closed))
}

#[inline]
fn direction(from: Point, to: Point) -> Point {
    let len = distance(from, to);
    if len <= EPSILON {
        Point::default()
    } else {
        Point::new((to.x - from.x) / len, (to.y - from.y) / len)
    }
}

/// Unit normal to the left of the travel direction
#[inline]
fn left_normal(from: Point, to: Point) -> Point {
    let d = direction(from, to);
    Point::new(-d.y, d.x)
}

/// Offset of a vertex joining two segments with normals `n_in` and `n_out`
fn miter(n_in: Point, n_out: Point, shift: f64) -> Point {
    let dot = n_in.x * n_out.x + n_in.y * n_out.y;
    if dot <= -1.0 + EPSILON {
        // Path doubles back, offset lines never meet
        return Point::new(n_in.x * shift, n_in.y * shift);
    }
    let k = shift / (1.0 + dot);
    Point::new((n_in.x + n_out.x) * k, (n_in.y + n_out.y) * k)
}

fn shift_vertices(points: &[Point], closed: bool, shift: f64) -> Vec<Point> {
    let n = points.len();
    (0..n)
        .map(|i| {
            let p = points[i];
            let prev = if i > 0 {
                Some(points[i - 1])
            } else if closed {
                Some(points[n - 1])
            } else {
                None
            };
            let next = if i + 1 < n {
                Some(points[i + 1])
            } else if closed {
                Some(points[0])
            } else {
                None
            };

            let offset = match (prev, next) {
                (Some(a), Some(b)) => miter(left_normal(a, p), left_normal(p, b), shift),
                (None, Some(b)) => {
                    let nrm = left_normal(p, b);
                    Point::new(nrm.x * shift, nrm.y * shift)
                }
                (Some(a), None) => {
                    let nrm = left_normal(a, p);
                    Point::new(nrm.x * shift, nrm.y * shift)
                }
                (None, None) => Point::default(),
            };
            Point::new(p.x + offset.x, p.y + offset.y)
        })
        .collect()
}

/// Trim points and bezier of one rounded corner
struct Corner {
    trim_in: Point,
    c1: Point,
    c2: Point,
    trim_out: Point,
}

/// Round the corner at `corner`, or `None` when it is straight or `r` is zero
fn round_corner(prev: Point, corner: Point, next: Point, r: f64) -> Option<Corner> {
    let d_in = direction(prev, corner);
    let d_out = direction(corner, next);
    let turn = d_in.x * d_out.y - d_in.y * d_out.x;
    if r <= EPSILON || turn.abs() <= EPSILON {
        return None;
    }

    let trim_in = Point::new(corner.x - d_in.x * r, corner.y - d_in.y * r);
    let trim_out = Point::new(corner.x + d_out.x * r, corner.y + d_out.y * r);
    let halfway = |a: Point| Point::new((a.x + corner.x) / 2.0, (a.y + corner.y) / 2.0);

    Some(Corner {
        trim_in,
        c1: halfway(trim_in),
        c2: halfway(trim_out),
        trim_out,
    })
}

fn push_corner(steps: &mut Vec<PathStep>, corner: &Corner) {
    steps.push(PathStep::Line(corner.trim_in));
    steps.push(PathStep::Cubic {
        c1: corner.c1,
        c2: corner.c2,
        to: corner.trim_out,
    });
}

fn round_open(points: &[Point], radius: f64) -> Path {
    let n = points.len();
    let mut steps = Vec::with_capacity(n * 2);
    steps.push(PathStep::Move(points[0]));

    let mut drawn = points[0];
    for i in 1..n - 1 {
        let corner = points[i];
        let next = points[i + 1];
        let r = radius
            .min(distance(drawn, corner))
            .min(distance(corner, next) / 2.0);

        match round_corner(points[i - 1], corner, next, r) {
            Some(rounded) => {
                push_corner(&mut steps, &rounded);
                drawn = rounded.trim_out;
            }
            None => {
                steps.push(PathStep::Line(corner));
                drawn = corner;
            }
        }
    }

    steps.push(PathStep::Line(points[n - 1]));
    Path { steps }
}

fn round_closed(points: &[Point], radius: f64) -> Path {
    let n = points.len();
    let mut steps = Vec::with_capacity(n * 2 + 2);
    steps.push(PathStep::Move(points[0]));

    let mut drawn = points[0];
    let mut first_trim_in: Option<Point> = None;
    for i in 1..n {
        let corner = points[i];
        let next = points[(i + 1) % n];
        let r = radius
            .min(distance(drawn, corner))
            .min(distance(corner, next) / 2.0);

        match round_corner(points[i - 1], corner, next, r) {
            Some(rounded) => {
                if i == 1 {
                    first_trim_in = Some(rounded.trim_in);
                }
                push_corner(&mut steps, &rounded);
                drawn = rounded.trim_out;
            }
            None => {
                steps.push(PathStep::Line(corner));
                drawn = corner;
            }
        }
    }

    // The corner at the start vertex must end before the first corner begins
    let start = points[0];
    let limit = first_trim_in.unwrap_or(points[1]);
    let r = radius
        .min(distance(drawn, start))
        .min(distance(start, limit));
    if let Some(rounded) = round_corner(points[n - 1], start, points[1], r) {
        push_corner(&mut steps, &rounded);
        steps[0] = PathStep::Move(rounded.trim_out);
    }

    steps.push(PathStep::Close);
    Path { steps }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> Point {
        Point::new(x, y)
    }

    #[test]
    fn test_parse_and_format() {
        let path = Path::parse("M 0 0 L 10,0 L10 -5.5 Z").unwrap();
        assert_eq!(
            path.steps,
            vec![
                PathStep::Move(p(0.0, 0.0)),
                PathStep::Line(p(10.0, 0.0)),
                PathStep::Line(p(10.0, -5.5)),
                PathStep::Close,
            ]
        );
        assert_eq!(path.to_string(), "M 0 0 L 10 0 L 10 -5.5 Z");

        let curve: Path = "m1 2 c 3 4 5 6 7 8".parse().unwrap();
        assert_eq!(curve.cubic_count(), 1);
        assert_eq!(curve.end(), Some(p(7.0, 8.0)));
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        assert!(matches!(Path::parse("M 0"), Err(Error::InvalidPath(_))));
        assert!(matches!(Path::parse("10 10"), Err(Error::InvalidPath(_))));
        assert!(matches!(Path::parse("M 0 0 Q 1 1 2 2"), Err(Error::InvalidPath(_))));
        assert!(matches!(Path::parse("M 0 0 L 1..2 3"), Err(Error::InvalidPath(_))));
        assert!(matches!(Path::parse("M 0 0 L x 1"), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn test_parse_svg_number_runs() {
        let path = Path::parse("M1.5.5L-2e1,3 z").unwrap();
        assert_eq!(
            path.steps,
            vec![
                PathStep::Move(p(1.5, 0.5)),
                PathStep::Line(p(-20.0, 3.0)),
                PathStep::Close,
            ]
        );
        assert_eq!(Path::parse("  ").unwrap(), Path::default());
    }

    #[test]
    fn test_l_shape_gets_one_bezier() {
        let path = Path::parse("M 0 0 L 10 0 L 10 10").unwrap();
        let rounded = bezier_path_corners(&path, 2.0, 0.0).unwrap();

        assert_eq!(rounded.cubic_count(), 1);
        assert_eq!(rounded.start(), Some(p(0.0, 0.0)));
        assert_eq!(rounded.end(), Some(p(10.0, 10.0)));
        assert_eq!(
            rounded.steps,
            vec![
                PathStep::Move(p(0.0, 0.0)),
                PathStep::Line(p(9.0, 0.0)),
                PathStep::Cubic {
                    c1: p(9.5, 0.0),
                    c2: p(10.0, 0.5),
                    to: p(10.0, 1.0),
                },
                PathStep::Line(p(10.0, 10.0)),
            ]
        );
    }

    #[test]
    fn test_radius_clamped_by_short_segments() {
        // Outgoing segment of length 1 allows at most radius 0.5
        let path = Path::polyline(&[p(0.0, 0.0), p(10.0, 0.0), p(10.0, 1.0), p(20.0, 1.0)]);
        let rounded = bezier_path_corners(&path, 0.8, 0.0).unwrap();

        assert_eq!(rounded.cubic_count(), 2);
        assert_eq!(rounded.steps[1], PathStep::Line(p(9.5, 0.0)));
        match rounded.steps[2] {
            PathStep::Cubic { to, .. } => assert_eq!(to, p(10.0, 0.5)),
            other => panic!("expected cubic, got {:?}", other),
        }
        // Second corner may only use what the first corner left over
        assert_eq!(rounded.steps[3], PathStep::Line(p(10.0, 0.5)));
        assert_eq!(rounded.end(), Some(p(20.0, 1.0)));
    }

    #[test]
    fn test_radius_capped_at_one() {
        let path = Path::polyline(&[p(0.0, 0.0), p(100.0, 0.0), p(100.0, 100.0)]);
        let rounded = bezier_path_corners(&path, 25.0, 0.0).unwrap();

        assert_eq!(rounded.steps[1], PathStep::Line(p(99.0, 0.0)));
        match rounded.steps[2] {
            PathStep::Cubic { to, .. } => assert_eq!(to, p(100.0, 1.0)),
            other => panic!("expected cubic, got {:?}", other),
        }

        let square = Path::parse("M 0 0 L 50 0 L 50 50 L 0 50 Z").unwrap();
        let rounded = bezier_path_corners(&square, 25.0, 0.0).unwrap();
        assert_eq!(rounded.start(), Some(p(1.0, 0.0)));
    }

    #[test]
    fn test_straight_vertices_are_kept() {
        let path = Path::polyline(&[p(0.0, 0.0), p(5.0, 0.0), p(10.0, 0.0)]);
        let rounded = bezier_path_corners(&path, 2.0, 0.0).unwrap();
        assert_eq!(rounded.cubic_count(), 0);
        assert_eq!(rounded, path);
    }

    #[test]
    fn test_closed_square() {
        let path = Path::parse("M 0 0 L 10 0 L 10 10 L 0 10 Z").unwrap();
        let rounded = bezier_path_corners(&path, 2.0, 0.0).unwrap();

        assert_eq!(rounded.cubic_count(), 4);
        assert_eq!(rounded.steps.last(), Some(&PathStep::Close));
        // Start re-adjusted to the end of the corner at the first vertex
        assert_eq!(rounded.start(), Some(p(1.0, 0.0)));
        assert_eq!(rounded.end(), Some(p(1.0, 0.0)));
    }

    #[test]
    fn test_closed_path_with_repeated_start_point() {
        let path = Path::parse("M 0 0 L 10 0 L 10 10 L 0 10 L 0 0 Z").unwrap();
        let rounded = bezier_path_corners(&path, 2.0, 0.0).unwrap();
        assert_eq!(rounded.cubic_count(), 4);
    }

    #[test]
    fn test_perpendicular_shift_keeps_path_orthogonal() {
        let path = Path::parse("M 0 0 L 10 0 L 10 10").unwrap();
        let shifted = bezier_path_corners(&path, 0.0, 1.0).unwrap();

        assert_eq!(
            shifted.steps,
            vec![
                PathStep::Move(p(0.0, 1.0)),
                PathStep::Line(p(9.0, 1.0)),
                PathStep::Line(p(9.0, 10.0)),
            ]
        );

        // Negative shift moves the outer way
        let outward = bezier_path_corners(&path, 0.0, -1.0).unwrap();
        assert_eq!(outward.steps[1], PathStep::Line(p(11.0, -1.0)));
    }

    #[test]
    fn test_rejects_rounded_input() {
        let path = Path::parse("M 0 0 C 1 1 2 2 3 3").unwrap();
        assert!(bezier_path_corners(&path, 1.0, 0.0).is_err());
        assert!(bezier_path_corners(&Path::parse("L 0 0").unwrap(), 1.0, 0.0).is_err());
    }
}
