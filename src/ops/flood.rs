// ============================================================================
// FLOOD FILL, CONTOUR TRACING, POLYLINE SIMPLIFICATION
// ============================================================================

use std::collections::VecDeque;

use image::RgbaImage;

use crate::geometry::{Point, point_in_polygon};

/// Pixel-space bounds of a filled region, inclusive: `(min_x, min_y, max_x, max_y)`.
pub type RegionBounds = (u32, u32, u32, u32);

/// Manhattan distance between two RGB triples (0–765).
#[inline]
pub fn color_distance(a: [u8; 3], b: [u8; 3]) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| x.abs_diff(*y) as u32).sum()
}

/// 4-connected BFS from `seed`.  A pixel joins when it is not fully
/// transparent and its RGB lies within `tolerance` of `reference`.
/// The mask doubles as the visited set; `None` bounds means nothing matched.
pub fn flood_fill_mask(
    img: &RgbaImage,
    seed: (u32, u32),
    reference: [u8; 3],
    tolerance: u32,
) -> (Vec<bool>, Option<RegionBounds>) {
    let (w, h) = img.dimensions();
    let mut mask = vec![false; w as usize * h as usize];
    if seed.0 >= w || seed.1 >= h {
        return (mask, None);
    }

    let joins = |x: u32, y: u32| {
        let p = img.get_pixel(x, y);
        p[3] > 0 && color_distance([p[0], p[1], p[2]], reference) <= tolerance
    };
    if !joins(seed.0, seed.1) {
        return (mask, None);
    }

    let idx = |x: u32, y: u32| y as usize * w as usize + x as usize;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (seed.0, seed.1, seed.0, seed.1);
    let mut queue = VecDeque::with_capacity(1024);
    mask[idx(seed.0, seed.1)] = true;
    queue.push_back(seed);

    while let Some((x, y)) = queue.pop_front() {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);

        let neighbors = [
            (x.wrapping_sub(1), y),
            (x + 1, y),
            (x, y.wrapping_sub(1)),
            (x, y + 1),
        ];
        for (nx, ny) in neighbors {
            if nx >= w || ny >= h || mask[idx(nx, ny)] {
                continue;
            }
            if joins(nx, ny) {
                mask[idx(nx, ny)] = true;
                queue.push_back((nx, ny));
            }
        }
    }
    (mask, Some((min_x, min_y, max_x, max_y)))
}

/// Clockwise neighbour offsets (y grows downward), starting east.
const MOORE_DIRS: [(i64, i64); 8] = [(1, 0), (1, 1), (0, 1), (-1, 1), (-1, 0), (-1, -1), (0, -1), (1, -1)];

/// Outer boundary of the region containing the first set pixel in raster
/// order, as pixel-centre coordinates.  An isolated pixel yields one point,
/// an empty mask none.
pub fn trace_contour(mask: &[bool], width: u32, height: u32) -> Vec<(f64, f64)> {
    let Some(first) = mask.iter().position(|&m| m) else { return Vec::new() };
    let w = width as usize;
    trace_from(mask, width, height, ((first % w) as i64, (first / w) as i64))
}

/// One outer boundary per 8-connected region of `mask`, in raster order of
/// each region's first pixel.  A region lying inside an earlier boundary
/// (an island in a hole) is already covered by it and yields no ring.
pub fn trace_contours(mask: &[bool], width: u32, height: u32) -> Vec<Vec<(f64, f64)>> {
    let (w, h) = (width as usize, height as usize);
    let mut labelled = vec![false; mask.len()];
    let mut rings: Vec<Vec<(f64, f64)>> = Vec::new();
    let mut polygons: Vec<Vec<Point>> = Vec::new();

    for i in 0..mask.len().min(w * h) {
        if !mask[i] || labelled[i] {
            continue;
        }
        let start = ((i % w) as i64, (i / w) as i64);
        label_region(mask, &mut labelled, w, h, i);

        let seed_centre = Point::new(start.0 as f64 + 0.5, start.1 as f64 + 0.5);
        if polygons.iter().any(|poly| point_in_polygon(seed_centre, poly)) {
            continue;
        }
        let ring = trace_from(mask, width, height, start);
        if ring.len() > 2 {
            polygons.push(ring.iter().map(|&(x, y)| Point::new(x, y)).collect());
        }
        rings.push(ring);
    }
    rings
}

/// 8-connected BFS marking every pixel of the region holding `seed`.
fn label_region(mask: &[bool], labelled: &mut [bool], w: usize, h: usize, seed: usize) {
    let mut queue = VecDeque::new();
    labelled[seed] = true;
    queue.push_back(seed);
    while let Some(i) = queue.pop_front() {
        let (x, y) = ((i % w) as i64, (i / w) as i64);
        for (dx, dy) in MOORE_DIRS {
            let (nx, ny) = (x + dx, y + dy);
            if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                continue;
            }
            let n = ny as usize * w + nx as usize;
            if mask[n] && !labelled[n] {
                labelled[n] = true;
                queue.push_back(n);
            }
        }
    }
}

/// Moore-neighbour walk from `start`, which must be the region's first
/// pixel in raster order so that its west and northern neighbours are
/// clear.  Ends when the walk is back on `start` and about to leave it in
/// the direction it first left (Jacob's criterion), so branches meeting at
/// the start pixel are both walked.
fn trace_from(mask: &[bool], width: u32, height: u32, start: (i64, i64)) -> Vec<(f64, f64)> {
    let (w, h) = (width as i64, height as i64);
    let set = |x: i64, y: i64| x >= 0 && y >= 0 && x < w && y < h && mask[(y * w + x) as usize];

    let center = |(x, y): (i64, i64)| (x as f64 + 0.5, y as f64 + 0.5);
    let mut contour = vec![center(start)];
    let mut current = start;
    // Treat the start as entered moving east: the first search begins north-west.
    let mut dir = 0usize;
    let mut first_dir = None;
    let max_steps = (w * h * 8 + 8) as usize;

    for _ in 0..max_steps {
        let mut next = None;
        for k in 0..8 {
            let d = (dir + 5 + k) % 8;
            let (dx, dy) = MOORE_DIRS[d];
            let candidate = (current.0 + dx, current.1 + dy);
            if set(candidate.0, candidate.1) {
                next = Some((candidate, d));
                break;
            }
        }
        let Some((candidate, d)) = next else { break };
        if current == start {
            match first_dir {
                None => first_dir = Some(d),
                Some(f) if f == d => break,
                Some(_) => {}
            }
        }
        contour.push(center(candidate));
        current = candidate;
        dir = d;
    }
    if contour.len() > 1 && contour.last() == Some(&center(start)) {
        contour.pop();
    }
    contour
}

fn perp_distance(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len = (dx * dx + dy * dy).sqrt();
    if len < 1e-12 {
        let (ex, ey) = (p.0 - a.0, p.1 - a.1);
        return (ex * ex + ey * ey).sqrt();
    }
    ((p.0 - a.0) * dy - (p.1 - a.1) * dx).abs() / len
}

/// Recursive Douglas–Peucker on an open polyline.
pub fn rdp_simplify(points: &[(f64, f64)], epsilon: f64) -> Vec<(f64, f64)> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let first = points[0];
    let last = points[points.len() - 1];

    let mut max_dist = 0.0;
    let mut max_idx = 0;
    for (i, p) in points.iter().enumerate().skip(1).take(points.len() - 2) {
        let dist = perp_distance(*p, first, last);
        if dist > max_dist {
            max_dist = dist;
            max_idx = i;
        }
    }

    if max_dist > epsilon {
        let mut left = rdp_simplify(&points[..=max_idx], epsilon);
        let right = rdp_simplify(&points[max_idx..], epsilon);
        left.pop();
        left.extend(right);
        left
    } else {
        vec![first, last]
    }
}

/// Douglas–Peucker on a closed contour: the start is appended so the loop
/// closes, then the duplicate is dropped again.
pub fn simplify_closed(contour: &[(f64, f64)], epsilon: f64) -> Vec<(f64, f64)> {
    if contour.len() <= 3 {
        return contour.to_vec();
    }
    let mut closed = contour.to_vec();
    closed.push(contour[0]);
    let mut simplified = rdp_simplify(&closed, epsilon);
    simplified.pop();
    simplified
}

/// Rasterize a polygon: a pixel is inside when its centre is (even-odd).
/// The mask covers `width × height` pixels whose origin sits at `origin`
/// in the polygon's coordinate space.
pub fn polygon_mask(polygon: &[Point], origin: (f64, f64), width: u32, height: u32) -> Vec<bool> {
    let mut mask = vec![false; width as usize * height as usize];
    for y in 0..height {
        for x in 0..width {
            let c = Point::new(origin.0 + x as f64 + 0.5, origin.1 + y as f64 + 0.5);
            mask[y as usize * width as usize + x as usize] = point_in_polygon(c, polygon);
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn manhattan_distance() {
        assert_eq!(color_distance([10, 20, 30], [10, 20, 30]), 0);
        assert_eq!(color_distance([0, 0, 0], [255, 255, 255]), 765);
        assert_eq!(color_distance([10, 50, 0], [20, 40, 5]), 25);
    }

    #[test]
    fn fill_stops_at_color_edges_and_transparency() {
        let mut img = RgbaImage::from_pixel(6, 3, Rgba([100, 100, 100, 255]));
        for y in 0..3 {
            img.put_pixel(3, y, Rgba([250, 0, 0, 255]));
        }
        img.put_pixel(0, 2, Rgba([100, 100, 100, 0]));

        let (mask, bounds) = flood_fill_mask(&img, (1, 1), [100, 100, 100], 30);
        assert_eq!(bounds, Some((0, 0, 2, 2)));
        assert_eq!(mask.iter().filter(|&&m| m).count(), 8);
        assert!(!mask[2 * 6]);
    }

    #[test]
    fn transparent_seed_matches_nothing() {
        let img = RgbaImage::from_pixel(3, 3, Rgba([0, 0, 0, 0]));
        let (mask, bounds) = flood_fill_mask(&img, (1, 1), [0, 0, 0], 765);
        assert!(bounds.is_none());
        assert!(mask.iter().all(|m| !m));
    }

    #[test]
    fn trace_square_region() {
        // 3×3 block at (1,1)..(3,3) inside a 5×5 mask
        let mut mask = vec![false; 25];
        for y in 1..4 {
            for x in 1..4 {
                mask[y * 5 + x] = true;
            }
        }
        let contour = trace_contour(&mask, 5, 5);
        assert_eq!(contour[0], (1.5, 1.5));
        assert_eq!(contour.len(), 8);
        assert!(contour.contains(&(3.5, 3.5)));
        assert!(!contour.contains(&(2.5, 2.5)));

        let simplified = simplify_closed(&contour, 0.1);
        assert_eq!(simplified, vec![(1.5, 1.5), (3.5, 1.5), (3.5, 3.5), (1.5, 3.5)]);
    }

    #[test]
    fn single_pixel_contour() {
        let mut mask = vec![false; 9];
        mask[4] = true;
        assert_eq!(trace_contour(&mask, 3, 3), vec![(1.5, 1.5)]);
        assert!(trace_contour(&[false; 4], 2, 2).is_empty());
    }

    #[test]
    fn contour_walks_both_branches_through_start() {
        // one-pixel-wide V with its apex at the top
        let mut mask = vec![false; 15];
        for (x, y) in [(2, 0), (1, 1), (3, 1), (0, 2), (4, 2)] {
            mask[y * 5 + x] = true;
        }
        let contour = trace_contour(&mask, 5, 3);
        assert_eq!(contour[0], (2.5, 0.5));
        assert_eq!(contour.len(), 8);
        assert!(contour.contains(&(4.5, 2.5)));
        assert!(contour.contains(&(0.5, 2.5)));
    }

    #[test]
    fn every_region_gets_a_ring() {
        // two 2×2 blocks in a 7×3 mask
        let mut mask = vec![false; 21];
        for y in 0..2 {
            for x in [0, 1, 4, 5] {
                mask[y * 7 + x] = true;
            }
        }
        let rings = trace_contours(&mask, 7, 3);
        assert_eq!(rings.len(), 2);
        assert_eq!(rings[0][0], (0.5, 0.5));
        assert_eq!(rings[1][0], (4.5, 0.5));
        assert!(rings[1].contains(&(5.5, 1.5)));
        assert!(trace_contours(&[false; 4], 2, 2).is_empty());
    }

    #[test]
    fn island_inside_hole_adds_no_ring() {
        // 7×7 frame with a single pixel in the middle of its hole
        let mut mask = vec![false; 49];
        for y in 0..7 {
            for x in 0..7 {
                let edge = x == 0 || y == 0 || x == 6 || y == 6;
                mask[y * 7 + x] = edge || (x == 3 && y == 3);
            }
        }
        let rings = trace_contours(&mask, 7, 7);
        assert_eq!(rings.len(), 1);
        assert!(rings[0].contains(&(6.5, 6.5)));
    }

    #[test]
    fn rdp_drops_collinear_points() {
        let line: Vec<(f64, f64)> = (0..10).map(|i| (i as f64, 0.0)).collect();
        assert_eq!(rdp_simplify(&line, 0.5), vec![(0.0, 0.0), (9.0, 0.0)]);
        let bent = [(0.0, 0.0), (5.0, 4.0), (10.0, 0.0)];
        assert_eq!(rdp_simplify(&bent, 1.5).len(), 3);
    }

    #[test]
    fn polygon_mask_uses_pixel_centres() {
        let square = [Point::new(1.0, 1.0), Point::new(3.0, 1.0), Point::new(3.0, 3.0), Point::new(1.0, 3.0)];
        let mask = polygon_mask(&square, (0.0, 0.0), 4, 4);
        let inside: Vec<usize> = mask.iter().enumerate().filter(|(_, m)| **m).map(|(i, _)| i).collect();
        assert_eq!(inside, vec![5, 6, 9, 10]);
    }
}
