//! Polygon-with-holes geometry for regions.
//!
//! Geometry is stored as the document's path commands and flattened to line
//! rings on demand. Holes are expressed by the winding rule: a ring traced
//! against its parent's direction (nonzero) or any nested ring (even-odd)
//! punches a hole.

use serde::{Deserialize, Serialize};

use crate::path::{PathCommand, Pt};

/// Flatness used when deriving vertices for packing and containment.
pub const FLATTEN_TOLERANCE: f64 = 2.0;

/// Coarser flatness for area/centroid integration.
pub const AREA_TOLERANCE: f64 = 3.0;

const MAX_SUBDIVISION_DEPTH: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindingRule {
    EvenOdd,
    NonZero,
}

/// Axis-aligned bounding box in level-0 pixel units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn empty() -> Self {
        Self { min_x: f64::MAX, min_y: f64::MAX, max_x: f64::MIN, max_y: f64::MIN }
    }

    pub fn is_empty(&self) -> bool {
        self.max_x < self.min_x || self.max_y < self.min_y
    }

    pub fn width(&self) -> f64 {
        if self.is_empty() { 0.0 } else { self.max_x - self.min_x }
    }

    pub fn height(&self) -> f64 {
        if self.is_empty() { 0.0 } else { self.max_y - self.min_y }
    }

    pub fn center(&self) -> [f64; 2] {
        [(self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0]
    }

    pub fn add_point(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn union(&mut self, other: &Bounds) {
        if !other.is_empty() {
            self.add_point(other.min_x, other.min_y);
            self.add_point(other.max_x, other.max_y);
        }
    }
}

/// A closed line ring produced by flattening.
pub type Ring = Vec<[f64; 2]>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionGeometry {
    pub winding: WindingRule,
    pub commands: Vec<PathCommand>,
}

impl RegionGeometry {
    pub fn new(winding: WindingRule, commands: Vec<PathCommand>) -> Self {
        Self { winding, commands }
    }

    /// Axis-aligned rectangle.
    pub fn rect(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(
            WindingRule::EvenOdd,
            vec![
                PathCommand::Move([x, y]),
                PathCommand::Line([x + width, y]),
                PathCommand::Line([x + width, y + height]),
                PathCommand::Line([x, y + height]),
                PathCommand::Close,
            ],
        )
    }

    /// Circle approximated by 32 chords.
    pub fn circle(cx: f32, cy: f32, radius: f32) -> Self {
        let n = 32;
        let mut commands = Vec::with_capacity(n + 2);
        for i in 0..n {
            let angle = 2.0 * std::f32::consts::PI * i as f32 / n as f32;
            let p = [cx + radius * angle.cos(), cy + radius * angle.sin()];
            commands.push(if i == 0 { PathCommand::Move(p) } else { PathCommand::Line(p) });
        }
        commands.push(PathCommand::Close);
        Self::new(WindingRule::EvenOdd, commands)
    }

    /// Rebuild a geometry from flattened rings (after clipping).
    pub fn from_rings(winding: WindingRule, rings: &[Ring]) -> Self {
        let mut commands = Vec::new();
        for ring in rings {
            if ring.len() < 3 {
                continue;
            }
            for (i, p) in ring.iter().enumerate() {
                let p = [p[0] as f32, p[1] as f32];
                commands.push(if i == 0 { PathCommand::Move(p) } else { PathCommand::Line(p) });
            }
            commands.push(PathCommand::Close);
        }
        Self::new(winding, commands)
    }

    pub fn is_degenerate(&self) -> bool {
        self.commands.iter().filter(|c| c.end().is_some()).count() < 3
    }

    /// Flatten curves into closed line rings.
    ///
    /// `tolerance` bounds the distance between control points and the chord
    /// before a curve segment is emitted as a line. Open subpaths are closed
    /// implicitly, matching fill semantics.
    pub fn flatten(&self, tolerance: f64) -> Vec<Ring> {
        let mut rings = Vec::new();
        let mut current: Ring = Vec::new();
        let mut cursor: Pt = [0.0, 0.0];

        for command in &self.commands {
            match *command {
                PathCommand::Move(p) => {
                    finish_ring(&mut rings, std::mem::take(&mut current));
                    current.push([p[0] as f64, p[1] as f64]);
                    cursor = p;
                }
                PathCommand::Line(p) => {
                    current.push([p[0] as f64, p[1] as f64]);
                    cursor = p;
                }
                PathCommand::Quad(c, p) => {
                    flatten_quad(&mut current, pt64(cursor), pt64(c), pt64(p), tolerance, 0);
                    cursor = p;
                }
                PathCommand::Curve(c1, c2, p) => {
                    flatten_cubic(&mut current, pt64(cursor), pt64(c1), pt64(c2), pt64(p), tolerance, 0);
                    cursor = p;
                }
                PathCommand::Close => {
                    finish_ring(&mut rings, std::mem::take(&mut current));
                }
            }
        }
        finish_ring(&mut rings, current);
        rings
    }

    /// Flattened ring vertices, concatenated. Used as relocation anchors by
    /// the packing wrangler.
    pub fn vertices(&self, tolerance: f64) -> Vec<[f64; 2]> {
        self.flatten(tolerance).into_iter().flatten().collect()
    }

    /// Bounding box over all command coordinates. Control points bound their
    /// curves, so this is a superset of the exact extent.
    pub fn bounds(&self) -> Bounds {
        let mut bounds = Bounds::empty();
        for command in &self.commands {
            match *command {
                PathCommand::Move(p) | PathCommand::Line(p) => {
                    bounds.add_point(p[0] as f64, p[1] as f64)
                }
                PathCommand::Quad(c, p) => {
                    bounds.add_point(c[0] as f64, c[1] as f64);
                    bounds.add_point(p[0] as f64, p[1] as f64);
                }
                PathCommand::Curve(c1, c2, p) => {
                    bounds.add_point(c1[0] as f64, c1[1] as f64);
                    bounds.add_point(c2[0] as f64, c2[1] as f64);
                    bounds.add_point(p[0] as f64, p[1] as f64);
                }
                PathCommand::Close => {}
            }
        }
        bounds
    }

    /// Unsigned area by the shoelace formula over the flattened rings.
    ///
    /// Rings are accumulated signed, so holes traced in the opposite
    /// direction subtract from the total.
    pub fn area(&self) -> f64 {
        let mut doubled = 0.0;
        for ring in self.flatten(AREA_TOLERANCE) {
            let n = ring.len();
            for i in 0..n {
                let [x1, y1] = ring[i];
                let [x2, y2] = ring[(i + 1) % n];
                doubled += x1 * y2 - x2 * y1;
            }
        }
        doubled.abs() / 2.0
    }

    /// Vertex-average centroid of the flattened outline.
    pub fn centroid(&self) -> [f64; 2] {
        let mut x = 0.0;
        let mut y = 0.0;
        let mut count = 0.0;
        for ring in self.flatten(AREA_TOLERANCE) {
            for p in ring {
                x += p[0];
                y += p[1];
                count += 1.0;
            }
        }
        if count == 0.0 {
            count = 1.0;
        }
        [x / count, y / count]
    }

    /// Point containment under the geometry's winding rule.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let rings = self.flatten(FLATTEN_TOLERANCE);
        match self.winding {
            WindingRule::EvenOdd => crossings(&rings, x, y) % 2 != 0,
            WindingRule::NonZero => winding_number(&rings, x, y) != 0,
        }
    }

    /// Clip the flattened outline to an axis-aligned rectangle
    /// (Sutherland-Hodgman, one pass per rectangle edge).
    pub fn clip_to_rect(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Vec<Ring> {
        self.flatten(FLATTEN_TOLERANCE)
            .into_iter()
            .filter_map(|ring| {
                let clipped = clip_ring(ring, min_x, min_y, max_x, max_y);
                (clipped.len() >= 3).then_some(clipped)
            })
            .collect()
    }

    /// Drop the locally shortest edges until none is shorter than
    /// `min_arc_length`, never keeping fewer than 3 movable vertices.
    pub fn simplify(&mut self, min_arc_length: f32) -> &mut Self {
        let n = self.commands.len();
        if n == 0 {
            return self;
        }
        let mut removed = vec![false; n];
        let mut movable: Vec<usize> =
            (0..n).filter(|&i| self.commands[i].is_movable()).collect();

        while movable.len() > 3 {
            let mut shortest: Option<(usize, f32)> = None;
            for (slot, &i) in movable.iter().enumerate() {
                let len = self.arc_length_at(i, &removed);
                if shortest.map_or(true, |(_, best)| len < best) {
                    shortest = Some((slot, len));
                }
            }
            match shortest {
                Some((slot, len)) if len < min_arc_length => {
                    removed[movable[slot]] = true;
                    movable.remove(slot);
                }
                _ => break,
            }
        }

        let commands = std::mem::take(&mut self.commands);
        self.commands = commands
            .into_iter()
            .enumerate()
            .filter_map(|(i, c)| (!removed[i]).then_some(c))
            .collect();
        self
    }

    fn arc_length_at(&self, index: usize, removed: &[bool]) -> f32 {
        let n = self.commands.len();
        let mut j = (n + index - 1) % n;
        while removed[j] {
            j = (n + j - 1) % n;
        }
        match self.commands[j].end() {
            Some(prev_end) => self.commands[index].arc_length_from(prev_end),
            // Preceded only by a close; nothing meaningful to collapse into.
            None => f32::INFINITY,
        }
    }
}

fn pt64(p: Pt) -> [f64; 2] {
    [p[0] as f64, p[1] as f64]
}

fn finish_ring(rings: &mut Vec<Ring>, mut ring: Ring) {
    if let (Some(&first), Some(&last)) = (ring.first(), ring.last()) {
        if ring.len() > 1 && first == last {
            ring.pop();
        }
    }
    if ring.len() >= 3 {
        rings.push(ring);
    }
}

fn point_segment_distance(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
    let abx = b[0] - a[0];
    let aby = b[1] - a[1];
    let norm = (abx * abx + aby * aby).sqrt();
    if norm == 0.0 {
        return ((p[0] - a[0]).powi(2) + (p[1] - a[1]).powi(2)).sqrt();
    }
    ((p[0] - a[0]) * aby - (p[1] - a[1]) * abx).abs() / norm
}

fn flatten_quad(out: &mut Ring, p0: [f64; 2], c: [f64; 2], p1: [f64; 2], tol: f64, depth: u32) {
    if depth >= MAX_SUBDIVISION_DEPTH || point_segment_distance(c, p0, p1) <= tol {
        out.push(p1);
        return;
    }
    let ac = midpoint(p0, c);
    let cb = midpoint(c, p1);
    let mid = midpoint(ac, cb);
    flatten_quad(out, p0, ac, mid, tol, depth + 1);
    flatten_quad(out, mid, cb, p1, tol, depth + 1);
}

#[allow(clippy::too_many_arguments)]
fn flatten_cubic(
    out: &mut Ring,
    p0: [f64; 2],
    c1: [f64; 2],
    c2: [f64; 2],
    p1: [f64; 2],
    tol: f64,
    depth: u32,
) {
    let flat = point_segment_distance(c1, p0, p1).max(point_segment_distance(c2, p0, p1));
    if depth >= MAX_SUBDIVISION_DEPTH || flat <= tol {
        out.push(p1);
        return;
    }
    let m01 = midpoint(p0, c1);
    let m12 = midpoint(c1, c2);
    let m23 = midpoint(c2, p1);
    let m012 = midpoint(m01, m12);
    let m123 = midpoint(m12, m23);
    let mid = midpoint(m012, m123);
    flatten_cubic(out, p0, m01, m012, mid, tol, depth + 1);
    flatten_cubic(out, mid, m123, m23, p1, tol, depth + 1);
}

fn midpoint(a: [f64; 2], b: [f64; 2]) -> [f64; 2] {
    [(a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0]
}

fn crossings(rings: &[Ring], x: f64, y: f64) -> u32 {
    let mut count = 0;
    for ring in rings {
        let n = ring.len();
        for i in 0..n {
            let [x1, y1] = ring[i];
            let [x2, y2] = ring[(i + 1) % n];
            if (y1 <= y) != (y2 <= y) {
                let t = (y - y1) / (y2 - y1);
                if x < x1 + t * (x2 - x1) {
                    count += 1;
                }
            }
        }
    }
    count
}

fn winding_number(rings: &[Ring], x: f64, y: f64) -> i32 {
    let mut winding = 0;
    for ring in rings {
        let n = ring.len();
        for i in 0..n {
            let [x1, y1] = ring[i];
            let [x2, y2] = ring[(i + 1) % n];
            if (y1 <= y) != (y2 <= y) {
                let t = (y - y1) / (y2 - y1);
                if x < x1 + t * (x2 - x1) {
                    winding += if y2 > y1 { 1 } else { -1 };
                }
            }
        }
    }
    winding
}

fn clip_ring(ring: Ring, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Ring {
    type Keep = fn(&[f64; 2], f64) -> bool;
    let edges: [(Keep, f64); 4] = [
        (|p, v| p[0] >= v, min_x),
        (|p, v| p[0] <= v, max_x),
        (|p, v| p[1] >= v, min_y),
        (|p, v| p[1] <= v, max_y),
    ];
    let mut subject = ring;
    for (edge, &(inside, value)) in edges.iter().enumerate() {
        if subject.is_empty() {
            break;
        }
        let vertical = edge < 2;
        let mut output = Vec::with_capacity(subject.len() + 4);
        let n = subject.len();
        for i in 0..n {
            let current = subject[i];
            let previous = subject[(i + n - 1) % n];
            let current_in = inside(&current, value);
            let previous_in = inside(&previous, value);
            if current_in != previous_in {
                output.push(intersect_axis(previous, current, value, vertical));
            }
            if current_in {
                output.push(current);
            }
        }
        subject = output;
    }
    subject
}

fn intersect_axis(a: [f64; 2], b: [f64; 2], value: f64, vertical: bool) -> [f64; 2] {
    if vertical {
        let t = (value - a[0]) / (b[0] - a[0]);
        [value, a[1] + t * (b[1] - a[1])]
    } else {
        let t = (value - a[1]) / (b[1] - a[1]);
        [a[0] + t * (b[0] - a[0]), value]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_area_and_bounds() {
        let rect = RegionGeometry::rect(10.0, 20.0, 100.0, 50.0);
        assert!((rect.area() - 5000.0).abs() < 1e-6);
        let bounds = rect.bounds();
        assert_eq!(bounds.min_x, 10.0);
        assert_eq!(bounds.max_y, 70.0);
        assert_eq!(bounds.width(), 100.0);
    }

    #[test]
    fn test_circle_area_approximation() {
        let circle = RegionGeometry::circle(0.0, 0.0, 100.0);
        let exact = std::f64::consts::PI * 100.0 * 100.0;
        // 32 chords underestimate by under 1%.
        assert!((circle.area() - exact).abs() / exact < 0.01);
    }

    #[test]
    fn test_even_odd_hole() {
        let mut commands = RegionGeometry::rect(0.0, 0.0, 100.0, 100.0).commands;
        commands.extend(RegionGeometry::rect(25.0, 25.0, 50.0, 50.0).commands);
        let geometry = RegionGeometry::new(WindingRule::EvenOdd, commands);
        assert!(geometry.contains(10.0, 10.0));
        assert!(!geometry.contains(50.0, 50.0));
        assert!(!geometry.contains(-5.0, 50.0));
    }

    #[test]
    fn test_nonzero_containment() {
        let geometry = RegionGeometry::new(
            WindingRule::NonZero,
            RegionGeometry::rect(0.0, 0.0, 10.0, 10.0).commands,
        );
        assert!(geometry.contains(5.0, 5.0));
        assert!(!geometry.contains(15.0, 5.0));
    }

    #[test]
    fn test_centroid_of_square() {
        let rect = RegionGeometry::rect(0.0, 0.0, 10.0, 10.0);
        let [cx, cy] = rect.centroid();
        assert!((cx - 5.0).abs() < 1e-6);
        assert!((cy - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_curve_flattening_respects_tolerance() {
        let geometry = RegionGeometry::new(
            WindingRule::EvenOdd,
            vec![
                PathCommand::Move([0.0, 0.0]),
                PathCommand::Quad([50.0, 100.0], [100.0, 0.0]),
                PathCommand::Close,
            ],
        );
        let coarse = geometry.flatten(10.0);
        let fine = geometry.flatten(0.5);
        assert!(fine[0].len() > coarse[0].len());
    }

    #[test]
    fn test_clip_to_rect() {
        let rect = RegionGeometry::rect(0.0, 0.0, 100.0, 100.0);
        let clipped = rect.clip_to_rect(50.0, 50.0, 200.0, 200.0);
        assert_eq!(clipped.len(), 1);
        let area: f64 = RegionGeometry::from_rings(WindingRule::EvenOdd, &clipped).area();
        assert!((area - 2500.0).abs() < 1e-6);
    }

    #[test]
    fn test_clip_disjoint_rect_is_empty() {
        let rect = RegionGeometry::rect(0.0, 0.0, 10.0, 10.0);
        assert!(rect.clip_to_rect(20.0, 20.0, 30.0, 30.0).is_empty());
    }

    #[test]
    fn test_simplify_keeps_at_least_three_vertices() {
        let mut geometry = RegionGeometry::circle(0.0, 0.0, 1.0);
        geometry.simplify(1000.0);
        let movable = geometry.commands.iter().filter(|c| c.is_movable()).count();
        assert_eq!(movable, 3);
    }

    #[test]
    fn test_simplify_bounded_area_drift() {
        let mut geometry = RegionGeometry::circle(0.0, 0.0, 100.0);
        let before = geometry.area();
        let perimeter = 2.0 * std::f64::consts::PI * 100.0;
        let min_arc = 25.0;
        geometry.simplify(min_arc as f32);
        let after = geometry.area();
        assert!((before - after).abs() <= min_arc * perimeter);
        let movable = geometry.commands.iter().filter(|c| c.is_movable()).count();
        assert!(movable >= 3);
        assert!(movable < 32);
    }
}
