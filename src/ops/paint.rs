// ============================================================================
// PAINT / ERASE / BUCKET FILL
// ============================================================================
//
// Buffer-level operators take points in working-buffer pixels.  The
// layer-level wrappers scale layer-space points by the working ratio,
// materialize the buffer, and record one Layer History entry per operation.

use image::{Rgba, RgbaImage};

use crate::canvas::{CanvasState, LayerId, blend_over};
use crate::components::history::{LayerHistoryStore, LayerSnapshot};
use crate::error::SnapshotError;
use crate::geometry::Point;
use crate::ops::flood::flood_fill_mask;
use crate::settings::EngineSettings;

pub const PAINT_LABEL: &str = "Paint";
pub const ERASE_LABEL: &str = "Erase";
pub const FILL_LABEL: &str = "Fill";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokeStyle {
    pub color: Rgba<u8>,
    /// Full stroke width in layer pixels.
    pub width: f32,
    pub opacity: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrokeMode {
    Paint,
    Erase,
}

fn sdf_line_segment(px: f32, py: f32, ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    let dx = bx - ax;
    let dy = by - ay;
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq > 0.0 { (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0) } else { 0.0 };
    let cx = ax + t * dx;
    let cy = ay + t * dy;
    ((px - cx) * (px - cx) + (py - cy) * (py - cy)).sqrt()
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Per-pixel coverage of a round-capped, round-joined polyline of the given
/// radius, over the affected window.  Segment coverages combine by maximum.
/// Returns `(x0, y0, w, h, coverage)` or `None` when nothing is touched.
fn stroke_coverage(points: &[(f32, f32)], radius: f32, img_w: u32, img_h: u32) -> Option<(u32, u32, u32, u32, Vec<f32>)> {
    let reach = radius + 1.0;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
    for &(x, y) in points {
        min_x = min_x.min(x - reach);
        min_y = min_y.min(y - reach);
        max_x = max_x.max(x + reach);
        max_y = max_y.max(y + reach);
    }
    let x0 = min_x.floor().max(0.0) as u32;
    let y0 = min_y.floor().max(0.0) as u32;
    let x1 = (max_x.ceil().max(0.0) as u32).min(img_w);
    let y1 = (max_y.ceil().max(0.0) as u32).min(img_h);
    if x0 >= x1 || y0 >= y1 {
        return None;
    }
    let (w, h) = (x1 - x0, y1 - y0);
    let mut coverage = vec![0.0f32; w as usize * h as usize];

    let segments: Vec<((f32, f32), (f32, f32))> = if points.len() == 1 {
        vec![(points[0], points[0])]
    } else {
        points.windows(2).map(|s| (s[0], s[1])).collect()
    };

    for (a, b) in segments {
        let sx0 = ((a.0.min(b.0) - reach).floor().max(x0 as f32) as u32).min(x1);
        let sy0 = ((a.1.min(b.1) - reach).floor().max(y0 as f32) as u32).min(y1);
        let sx1 = ((a.0.max(b.0) + reach).ceil().max(0.0) as u32).min(x1);
        let sy1 = ((a.1.max(b.1) + reach).ceil().max(0.0) as u32).min(y1);
        for y in sy0..sy1 {
            for x in sx0..sx1 {
                let d = sdf_line_segment(x as f32 + 0.5, y as f32 + 0.5, a.0, a.1, b.0, b.1);
                let c = 1.0 - smoothstep(radius - 0.5, radius + 0.5, d);
                let slot = &mut coverage[(y - y0) as usize * w as usize + (x - x0) as usize];
                if c > *slot {
                    *slot = c;
                }
            }
        }
    }
    Some((x0, y0, w, h, coverage))
}

/// Composite a stroke source-over.  Returns whether any pixel changed.
pub fn paint_stroke(img: &mut RgbaImage, points: &[(f32, f32)], style: &StrokeStyle) -> bool {
    if points.is_empty() || style.width <= 0.0 || style.opacity <= 0.0 {
        return false;
    }
    let Some((x0, y0, w, _h, coverage)) = stroke_coverage(points, style.width / 2.0, img.width(), img.height())
    else {
        return false;
    };
    let mut touched = false;
    for (i, c) in coverage.iter().enumerate() {
        if *c <= 0.0 {
            continue;
        }
        let (x, y) = (x0 + (i as u32 % w), y0 + (i as u32 / w));
        let dst = *img.get_pixel(x, y);
        let out = blend_over(dst, style.color, c * style.opacity);
        if out != dst {
            img.put_pixel(x, y, out);
            touched = true;
        }
    }
    touched
}

/// Reduce alpha by the stroke coverage; colour channels are untouched.
/// Returns whether any alpha value went down.
pub fn erase_stroke(img: &mut RgbaImage, points: &[(f32, f32)], width: f32, opacity: f32) -> bool {
    if points.is_empty() || width <= 0.0 || opacity <= 0.0 {
        return false;
    }
    let Some((x0, y0, w, _h, coverage)) = stroke_coverage(points, width / 2.0, img.width(), img.height()) else {
        return false;
    };
    let mut touched = false;
    for (i, c) in coverage.iter().enumerate() {
        if *c <= 0.0 {
            continue;
        }
        let (x, y) = (x0 + (i as u32 % w), y0 + (i as u32 / w));
        let px = img.get_pixel_mut(x, y);
        let keep = (1.0 - c * opacity.min(1.0)).max(0.0);
        let alpha = (px[3] as f32 * keep).round() as u8;
        if alpha < px[3] {
            px[3] = alpha;
            touched = true;
        }
    }
    touched
}

fn fill_color(color: Rgba<u8>, opacity: f32) -> Rgba<u8> {
    Rgba([
        color[0],
        color[1],
        color[2],
        (color[3] as f32 * opacity.clamp(0.0, 1.0)).round() as u8,
    ])
}

fn fill_changes(seed_px: Rgba<u8>, fill: Rgba<u8>) -> bool {
    seed_px[3] != 0 && seed_px != fill
}

/// Replace the 4-connected region around `seed` with `color` at `opacity`.
/// A transparent seed, or one already equal to the fill colour, is a no-op.
pub fn bucket_fill(img: &mut RgbaImage, seed: (u32, u32), color: Rgba<u8>, opacity: f32, tolerance: u32) -> bool {
    if seed.0 >= img.width() || seed.1 >= img.height() {
        return false;
    }
    let fill = fill_color(color, opacity);
    let seed_px = *img.get_pixel(seed.0, seed.1);
    if !fill_changes(seed_px, fill) {
        return false;
    }
    let (mask, bounds) = flood_fill_mask(img, seed, [seed_px[0], seed_px[1], seed_px[2]], tolerance);
    if bounds.is_none() {
        return false;
    }
    let w = img.width() as usize;
    for (i, _) in mask.iter().enumerate().filter(|(_, m)| **m) {
        img.put_pixel((i % w) as u32, (i / w) as u32, fill);
    }
    true
}

// ============================================================================
// LAYER-LEVEL OPERATIONS
// ============================================================================

/// Paint or erase a stroke given in layer space on layer `id`.
pub fn stroke_layer(
    canvas: &mut CanvasState,
    layer_history: &mut LayerHistoryStore,
    id: LayerId,
    points: &[Point],
    style: &StrokeStyle,
    mode: StrokeMode,
    settings: &EngineSettings,
) -> Result<bool, SnapshotError> {
    let Some(layer) = canvas.layer_mut(id) else { return Ok(false) };
    if layer.is_pending() || points.is_empty() {
        return Ok(false);
    }
    let before = LayerSnapshot::capture(layer)?;
    let (rx, ry) = layer.working_ratio();
    let buffer_points: Vec<(f32, f32)> = points.iter().map(|p| ((p.x * rx) as f32, (p.y * ry) as f32)).collect();
    let scaled = StrokeStyle { width: style.width * ((rx + ry) / 2.0) as f32, ..*style };

    let Some(buf) = layer.ensure_mutable() else { return Ok(false) };
    let changed = match mode {
        StrokeMode::Paint => paint_stroke(buf, &buffer_points, &scaled),
        StrokeMode::Erase => erase_stroke(buf, &buffer_points, scaled.width, scaled.opacity),
    };
    if !changed {
        return Ok(false);
    }
    layer.mark_raster_changed(settings.thumbnail_size, settings.low_res_proxy_size);
    let label = match mode {
        StrokeMode::Paint => PAINT_LABEL,
        StrokeMode::Erase => ERASE_LABEL,
    };
    layer_history.commit(layer, &before, label)?;
    Ok(true)
}

/// Bucket fill at a layer-space seed on layer `id`.
pub fn fill_layer(
    canvas: &mut CanvasState,
    layer_history: &mut LayerHistoryStore,
    id: LayerId,
    seed: Point,
    color: Rgba<u8>,
    opacity: f32,
    settings: &EngineSettings,
) -> Result<bool, SnapshotError> {
    let Some(layer) = canvas.layer_mut(id) else { return Ok(false) };
    let Some(img) = layer.pixels() else { return Ok(false) };
    let (rx, ry) = layer.working_ratio();
    let (sx, sy) = ((seed.x * rx).floor(), (seed.y * ry).floor());
    if sx < 0.0 || sy < 0.0 || sx >= img.width() as f64 || sy >= img.height() as f64 {
        return Ok(false);
    }
    let seed_px = *img.get_pixel(sx as u32, sy as u32);
    if !fill_changes(seed_px, fill_color(color, opacity)) {
        return Ok(false);
    }
    let before = LayerSnapshot::capture(layer)?;
    let Some(buf) = layer.ensure_mutable() else { return Ok(false) };
    if !bucket_fill(buf, (sx as u32, sy as u32), color, opacity, settings.fill_tolerance) {
        return Ok(false);
    }
    layer.mark_raster_changed(settings.thumbnail_size, settings.low_res_proxy_size);
    layer_history.commit(layer, &before, FILL_LABEL)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{Layer, LayerKind};

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn style(width: f32, opacity: f32) -> StrokeStyle {
        StrokeStyle { color: RED, width, opacity }
    }

    #[test]
    fn single_point_paints_a_disc() {
        let mut img = RgbaImage::new(20, 20);
        assert!(paint_stroke(&mut img, &[(10.0, 10.0)], &style(8.0, 1.0)));
        assert_eq!(img.get_pixel(10, 10), &RED);
        assert_eq!(img.get_pixel(12, 11), &RED);
        assert_eq!(img.get_pixel(16, 10)[3], 0);
        assert_eq!(img.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn joined_segments_do_not_double_blend() {
        let mut img = RgbaImage::from_pixel(30, 30, Rgba([0, 0, 0, 255]));
        paint_stroke(&mut img, &[(5.0, 15.0), (15.0, 15.0), (15.0, 25.0)], &style(4.0, 0.5));
        let at_joint = img.get_pixel(15, 15)[0];
        let on_segment = img.get_pixel(10, 15)[0];
        assert_eq!(at_joint, on_segment);
    }

    #[test]
    fn erase_reduces_alpha_only() {
        let mut img = RgbaImage::from_pixel(10, 10, Rgba([10, 20, 30, 200]));
        assert!(erase_stroke(&mut img, &[(5.0, 5.0)], 4.0, 0.5));
        assert_eq!(img.get_pixel(5, 5), &Rgba([10, 20, 30, 100]));
        erase_stroke(&mut img, &[(5.0, 5.0)], 4.0, 1.0);
        assert_eq!(img.get_pixel(5, 5)[3], 0);
        assert_eq!(img.get_pixel(0, 0)[3], 200);
    }

    #[test]
    fn stroke_outside_buffer_touches_nothing() {
        let mut img = RgbaImage::new(4, 4);
        assert!(!paint_stroke(&mut img, &[(-50.0, -50.0)], &style(4.0, 1.0)));
    }

    #[test]
    fn bucket_fill_is_idempotent() {
        let mut img = RgbaImage::from_pixel(5, 5, Rgba([0, 0, 255, 255]));
        img.put_pixel(2, 0, Rgba([0, 255, 0, 255]));
        assert!(bucket_fill(&mut img, (0, 4), RED, 1.0, 30));
        assert_eq!(img.get_pixel(4, 4), &RED);
        assert_eq!(img.get_pixel(2, 0), &Rgba([0, 255, 0, 255]));

        let snapshot = img.clone();
        assert!(!bucket_fill(&mut img, (0, 4), RED, 1.0, 30));
        assert_eq!(img, snapshot);
    }

    #[test]
    fn fill_applies_opacity_to_alpha() {
        let mut img = RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255]));
        bucket_fill(&mut img, (0, 0), RED, 0.5, 0);
        assert_eq!(img.get_pixel(1, 1), &Rgba([255, 0, 0, 128]));
    }

    #[test]
    fn layer_fill_commits_fill_label_once() {
        let mut canvas = CanvasState::new(10.0, 10.0);
        let layer = Layer::from_pixels("l", LayerKind::Asset, RgbaImage::from_pixel(4, 4, Rgba([1, 1, 1, 255])), 96.0);
        let id = layer.id;
        canvas.layers.push(layer);
        let mut history = LayerHistoryStore::default();
        let settings = EngineSettings::default();

        assert!(fill_layer(&mut canvas, &mut history, id, Point::new(1.0, 1.0), RED, 1.0, &settings).unwrap());
        assert!(!fill_layer(&mut canvas, &mut history, id, Point::new(1.0, 1.0), RED, 1.0, &settings).unwrap());
        let labels: Vec<_> = history.timeline(id).unwrap().entries().iter().map(|e| e.label.clone()).collect();
        assert_eq!(labels, vec!["Initial".to_string(), FILL_LABEL.to_string()]);
        assert_eq!(canvas.layer(id).unwrap().version, 1);
    }

    #[test]
    fn erase_over_transparency_reports_no_change() {
        let mut img = RgbaImage::new(10, 10);
        assert!(!erase_stroke(&mut img, &[(5.0, 5.0), (8.0, 5.0)], 4.0, 1.0));
    }

    #[test]
    fn layer_erase_on_clear_pixels_keeps_version_and_full_res() {
        let mut canvas = CanvasState::new(10.0, 10.0);
        let mut layer = Layer::from_pixels("clear", LayerKind::Asset, RgbaImage::new(8, 8), 96.0);
        layer.full_res = Some(std::sync::Arc::new(RgbaImage::new(16, 16)));
        let id = layer.id;
        canvas.layers.push(layer);
        let mut history = LayerHistoryStore::default();
        let done = stroke_layer(
            &mut canvas,
            &mut history,
            id,
            &[Point::new(2.0, 2.0), Point::new(6.0, 6.0)],
            &style(3.0, 1.0),
            StrokeMode::Erase,
            &EngineSettings::default(),
        )
        .unwrap();
        assert!(!done);
        let layer = canvas.layer(id).unwrap();
        assert_eq!(layer.version, 0);
        assert!(layer.full_res.is_some());
        assert!(history.is_empty());
    }

    #[test]
    fn noop_layer_fill_leaves_shared_buffer_alone() {
        let mut canvas = CanvasState::new(10.0, 10.0);
        let mut layer = Layer::new("s", LayerKind::Asset, None, crate::canvas::LayerMetadata::with_dpi(96.0));
        layer.image = Some(crate::canvas::LayerImage::Shared(std::sync::Arc::new(RgbaImage::from_pixel(4, 4, RED))));
        layer.metadata.original_width = 4;
        layer.metadata.original_height = 4;
        let id = layer.id;
        canvas.layers.push(layer);
        let mut history = LayerHistoryStore::default();
        let settings = EngineSettings::default();

        assert!(!fill_layer(&mut canvas, &mut history, id, Point::new(1.0, 1.0), RED, 1.0, &settings).unwrap());
        let layer = canvas.layer(id).unwrap();
        assert!(!layer.image.as_ref().unwrap().is_mutable());
        assert_eq!(layer.version, 0);
        assert!(history.is_empty());
    }

    #[test]
    fn layer_stroke_on_pending_layer_is_noop() {
        let mut canvas = CanvasState::new(10.0, 10.0);
        let layer = Layer::new("p", LayerKind::Asset, None, crate::canvas::LayerMetadata::with_dpi(96.0));
        let id = layer.id;
        canvas.layers.push(layer);
        let mut history = LayerHistoryStore::default();
        let done = stroke_layer(
            &mut canvas,
            &mut history,
            id,
            &[Point::new(1.0, 1.0)],
            &style(2.0, 1.0),
            StrokeMode::Paint,
            &EngineSettings::default(),
        )
        .unwrap();
        assert!(!done);
        assert!(history.is_empty());
    }
}
