//! Boundary polygons of binary planes.
//!
//! Boundaries run along pixel edges. Pixel `[row, col]` covers the square
//! from corner `(col, row)` to `(col + 1, row + 1)`, so every vertex is a
//! pixel corner given as `(x = column, y = row)`.

use ndarray::Array2;
use std::collections::BTreeSet;

/// Unit step along a pixel edge, in image coordinates (`y` down).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Step {
    Down,
    Right,
    Up,
    Left,
}

impl Step {
    fn offset(self) -> (isize, isize) {
        match self {
            Step::Down => (0, 1),
            Step::Right => (1, 0),
            Step::Up => (0, -1),
            Step::Left => (-1, 0),
        }
    }

    /// Turn towards the region, which lies on the left of the boundary.
    fn turn_left(self) -> Self {
        match self {
            Step::Down => Step::Right,
            Step::Right => Step::Up,
            Step::Up => Step::Left,
            Step::Left => Step::Down,
        }
    }

    fn turn_right(self) -> Self {
        self.turn_left().turn_left().turn_left()
    }
}

/// Directed edge starting at corner `(y, x)`.
type Edge = (usize, usize, Step);

fn end_of((y, x, step): Edge) -> (usize, usize) {
    let (dx, dy) = step.offset();
    ((y as isize + dy) as usize, (x as isize + dx) as usize)
}

/// Closed boundary of a region or of a hole in it.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    /// Corners `[x, y]`, without repeating the first one at the end.
    pub points: Vec<[f64; 2]>,
}

impl Polygon {
    /// Shoelace area in image coordinates. Negative for boundaries that run
    /// counter-clockwise as displayed.
    pub fn signed_area(&self) -> f64 {
        let n = self.points.len();
        (0..n)
            .map(|i| {
                let [x0, y0] = self.points[i];
                let [x1, y1] = self.points[(i + 1) % n];
                x0 * y1 - x1 * y0
            })
            .sum::<f64>()
            / 2.0
    }

    pub fn is_hole(&self) -> bool {
        self.signed_area() > 0.0
    }
}

/// Every pixel edge between the region and its surroundings, oriented so the
/// region lies on the left.
fn boundary_edges(plane: &Array2<bool>) -> BTreeSet<Edge> {
    let (rows, cols) = plane.dim();
    let outside = |r: isize, c: isize| {
        r < 0 || c < 0 || r as usize >= rows || c as usize >= cols || !plane[[r as usize, c as usize]]
    };
    let mut edges = BTreeSet::new();
    for ((r, c), &inside) in plane.indexed_iter() {
        if !inside {
            continue;
        }
        let (ri, ci) = (r as isize, c as isize);
        if outside(ri, ci - 1) {
            edges.insert((r, c, Step::Down));
        }
        if outside(ri + 1, ci) {
            edges.insert((r + 1, c, Step::Right));
        }
        if outside(ri, ci + 1) {
            edges.insert((r + 1, c + 1, Step::Up));
        }
        if outside(ri - 1, ci) {
            edges.insert((r, c + 1, Step::Left));
        }
    }
    edges
}

/// Follows edges from `start` until the loop closes, preferring left turns so
/// that diagonally touching pixels get separate boundaries.
fn trace(start: Edge, edges: &mut BTreeSet<Edge>) -> Vec<Edge> {
    let mut path = vec![start];
    let mut current = start;
    loop {
        let (y, x) = end_of(current);
        let step = current.2;
        let next = [step.turn_left(), step, step.turn_right()]
            .into_iter()
            .map(|s| (y, x, s))
            .find(|edge| *edge == start || edges.contains(edge));
        match next {
            Some(edge) if edge == start => break,
            Some(edge) => {
                edges.remove(&edge);
                path.push(edge);
                current = edge;
            }
            // every corner has as many outgoing as incoming edges
            None => break,
        }
    }
    path
}

/// Boundary polygons of the `true` pixels of `plane`.
///
/// Outer boundaries run counter-clockwise as displayed (negative
/// [`Polygon::signed_area`]), holes clockwise. Holes are only returned with
/// `include_holes`. Vertices where the boundary runs straight on are dropped.
pub fn polygons(plane: &Array2<bool>, include_holes: bool) -> Vec<Polygon> {
    let mut edges = boundary_edges(plane);
    let mut result = Vec::new();
    while let Some(start) = edges.pop_first() {
        let path = trace(start, &mut edges);
        let n = path.len();
        let points = (0..n)
            .filter(|&i| path[(i + n - 1) % n].2 != path[i].2)
            .map(|i| {
                let (y, x, _) = path[i];
                [x as f64, y as f64]
            })
            .collect();
        let polygon = Polygon { points };
        if include_holes || !polygon.is_hole() {
            result.push(polygon);
        }
    }
    result
}

/// Pixels of the region that touch a pixel outside it (4-neighbourhood) or
/// the plane border.
pub fn outline(plane: &Array2<bool>) -> Array2<bool> {
    let (rows, cols) = plane.dim();
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        plane[[r, c]]
            && (r == 0
                || c == 0
                || r + 1 == rows
                || c + 1 == cols
                || !plane[[r - 1, c]]
                || !plane[[r + 1, c]]
                || !plane[[r, c - 1]]
                || !plane[[r, c + 1]])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array2};

    fn points(polygon: &Polygon) -> Vec<[f64; 2]> {
        polygon.points.clone()
    }

    #[test]
    fn test_single_pixel() {
        let mut plane = Array2::from_elem((3, 3), false);
        plane[[1, 2]] = true;
        let found = polygons(&plane, false);
        assert_eq!(found.len(), 1);
        assert_eq!(
            points(&found[0]),
            vec![[2.0, 1.0], [2.0, 2.0], [3.0, 2.0], [3.0, 1.0]]
        );
        assert_eq!(found[0].signed_area(), -1.0);
    }

    #[test]
    fn test_rectangle_drops_collinear_corners() {
        let mut plane = Array2::from_elem((5, 6), false);
        plane.slice_mut(s![1..4, 1..5]).fill(true);
        let found = polygons(&plane, true);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].points.len(), 4);
        assert_eq!(found[0].signed_area(), -12.0);
    }

    #[test]
    fn test_holes_are_optional_and_clockwise() {
        let mut plane = Array2::from_elem((5, 5), true);
        plane[[2, 2]] = false;
        assert_eq!(polygons(&plane, false).len(), 1);
        let found = polygons(&plane, true);
        assert_eq!(found.len(), 2);
        let hole = found.iter().find(|p| p.is_hole()).unwrap();
        assert_eq!(hole.signed_area(), 1.0);
        let outer = found.iter().find(|p| !p.is_hole()).unwrap();
        assert_eq!(outer.signed_area(), -25.0);
    }

    #[test]
    fn test_diagonal_pixels_are_separate() {
        let mut plane = Array2::from_elem((2, 2), false);
        plane[[0, 0]] = true;
        plane[[1, 1]] = true;
        let found = polygons(&plane, true);
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.points.len() == 4 && p.signed_area() == -1.0));
    }

    #[test]
    fn test_l_shape() {
        let mut plane = Array2::from_elem((2, 2), true);
        plane[[0, 1]] = false;
        let found = polygons(&plane, false);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].points.len(), 6);
        assert_eq!(found[0].signed_area(), -3.0);
    }

    #[test]
    fn test_empty_plane() {
        assert!(polygons(&Array2::from_elem((4, 4), false), true).is_empty());
    }

    #[test]
    fn test_outline() {
        let mut plane = Array2::from_elem((5, 5), false);
        plane.slice_mut(s![1..4, 1..4]).fill(true);
        let edge = outline(&plane);
        assert!(edge[[1, 1]]);
        assert!(!edge[[2, 2]]);
        assert_eq!(edge.iter().filter(|&&v| v).count(), 8);
    }
}
