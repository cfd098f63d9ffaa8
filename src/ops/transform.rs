use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::canvas::{Adjustments, CanvasState, Layer, LayerId, MIN_LAYER_SCALE, blend_over};
use crate::components::history::LayerHistoryStore;
use crate::error::SnapshotError;
use crate::geometry::{self, LayerTransform, Point};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlipAxis {
    Horizontal,
    Vertical,
}

// ============================================================================
// RENDERING A LAYER INTO A WORLD-ALIGNED BUFFER
// ============================================================================

/// Composite `layer` (opacity, placement, flips and adjustments applied)
/// into `dst`, whose pixel (0, 0) covers world `[origin, origin + 1)`.
/// Uses the highest-resolution pixels the layer has.
pub fn render_layer_into(dst: &mut RgbaImage, origin: (f64, f64), layer: &Layer) {
    if !layer.visible || layer.opacity <= 0.0 {
        return;
    }
    let Some(src) = layer.best_pixels() else { return };
    render_image_into(dst, origin, src, &layer.transform(), &layer.adjustments, layer.opacity);
}

/// Same as [`render_layer_into`] for an explicit source buffer whose size may
/// differ from the transform's native size (display proxies).
pub fn render_image_into(
    dst: &mut RgbaImage,
    origin: (f64, f64),
    src: &RgbaImage,
    t: &LayerTransform,
    adjustments: &Adjustments,
    opacity: f32,
) {
    if src.width() == 0 || src.height() == 0 || t.width <= 0.0 || t.height <= 0.0 {
        return;
    }
    let rx = src.width() as f64 / t.width;
    let ry = src.height() as f64 / t.height;

    let left = t.x - t.width * t.scale / 2.0 - origin.0;
    let top = t.y - t.height * t.scale / 2.0 - origin.1;
    let aligned = t.rotation == 0.0
        && !adjustments.flip_h
        && !adjustments.flip_v
        && (t.scale / rx - 1.0).abs() < 1e-9
        && (t.scale / ry - 1.0).abs() < 1e-9
        && (left - left.round()).abs() < 1e-9
        && (top - top.round()).abs() < 1e-9;

    if aligned {
        blit(dst, src, left.round() as i64, top.round() as i64, adjustments, opacity);
    } else {
        resample(dst, origin, src, t, (rx, ry), adjustments, opacity);
    }
}

/// Exact integer copy for unrotated, unscaled, pixel-aligned sources.
fn blit(dst: &mut RgbaImage, src: &RgbaImage, ox: i64, oy: i64, adjustments: &Adjustments, opacity: f32) {
    let (dw, dh) = (dst.width() as i64, dst.height() as i64);
    for (sx, sy, px) in src.enumerate_pixels() {
        let (dx, dy) = (sx as i64 + ox, sy as i64 + oy);
        if dx < 0 || dy < 0 || dx >= dw || dy >= dh || px[3] == 0 {
            continue;
        }
        let under = *dst.get_pixel(dx as u32, dy as u32);
        dst.put_pixel(dx as u32, dy as u32, blend_over(under, adjustments.apply(*px), opacity));
    }
}

/// Inverse-mapped bilinear resampling, one rayon task per destination row.
fn resample(
    dst: &mut RgbaImage,
    origin: (f64, f64),
    src: &RgbaImage,
    t: &LayerTransform,
    ratio: (f64, f64),
    adjustments: &Adjustments,
    opacity: f32,
) {
    let Some(bounds) = geometry::BoundingBox::from_points(&geometry::world_corners(t)) else { return };
    let dst_w = dst.width() as usize;
    let (sw, sh) = (src.width() as f64, src.height() as f64);
    let col_start = ((bounds.min_x - origin.0).floor().max(0.0) as usize).min(dst_w);
    let col_end = ((bounds.max_x - origin.0).ceil().max(0.0) as usize).min(dst_w);
    let row_start = (bounds.min_y - origin.1).floor();
    let row_end = (bounds.max_y - origin.1).ceil();

    dst.as_mut().par_chunks_mut(dst_w * 4).enumerate().for_each(|(j, row)| {
        let jf = j as f64;
        if jf < row_start || jf > row_end {
            return;
        }
        for i in col_start..col_end {
            let world = Point::new(origin.0 + i as f64 + 0.5, origin.1 + jf + 0.5);
            let mut local = geometry::world_to_layer(world, t);
            if adjustments.flip_h {
                local.x = t.width - local.x;
            }
            if adjustments.flip_v {
                local.y = t.height - local.y;
            }
            let sx = local.x * ratio.0;
            let sy = local.y * ratio.1;
            if sx < 0.0 || sy < 0.0 || sx >= sw || sy >= sh {
                continue;
            }
            let px = bilinear_sample(src, (sx - 0.5) as f32, (sy - 0.5) as f32);
            if px[3] == 0 {
                continue;
            }
            let o = i * 4;
            let under = Rgba([row[o], row[o + 1], row[o + 2], row[o + 3]]);
            let out = blend_over(under, adjustments.apply(px), opacity);
            row[o..o + 4].copy_from_slice(&out.0);
        }
    });
}

/// Bilinear sample with edge clamping, interpolating alpha-weighted colour
/// so transparent neighbours do not darken edges.
fn bilinear_sample(img: &RgbaImage, x: f32, y: f32) -> Rgba<u8> {
    let max_x = img.width() as i32 - 1;
    let max_y = img.height() as i32 - 1;
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let sample = |sx: i32, sy: i32| -> [f32; 4] {
        let p = img.get_pixel(sx.clamp(0, max_x) as u32, sy.clamp(0, max_y) as u32);
        let a = p[3] as f32;
        [p[0] as f32 * a, p[1] as f32 * a, p[2] as f32 * a, a]
    };

    let tl = sample(x0, y0);
    let tr = sample(x0 + 1, y0);
    let bl = sample(x0, y0 + 1);
    let br = sample(x0 + 1, y0 + 1);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    let mut acc = [0.0f32; 4];
    for c in 0..4 {
        let top = lerp(tl[c], tr[c], fx);
        let bot = lerp(bl[c], br[c], fx);
        acc[c] = lerp(top, bot, fy);
    }
    let a = acc[3];
    if a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    Rgba([
        (acc[0] / a).round().clamp(0.0, 255.0) as u8,
        (acc[1] / a).round().clamp(0.0, 255.0) as u8,
        (acc[2] / a).round().clamp(0.0, 255.0) as u8,
        a.round().clamp(0.0, 255.0) as u8,
    ])
}

// ============================================================================
// LAYER TRANSFORMS
// ============================================================================

pub fn flip_layer(
    canvas: &mut CanvasState,
    layer_history: &mut LayerHistoryStore,
    id: LayerId,
    axis: FlipAxis,
) -> Result<bool, SnapshotError> {
    layer_history.edit_layer(canvas, id, "Flip", |layer| {
        match axis {
            FlipAxis::Horizontal => layer.adjustments.flip_h = !layer.adjustments.flip_h,
            FlipAxis::Vertical => layer.adjustments.flip_v = !layer.adjustments.flip_v,
        }
        true
    })
}

/// Rotate by `degrees` around the layer centre.
pub fn rotate_layer_by(
    canvas: &mut CanvasState,
    layer_history: &mut LayerHistoryStore,
    id: LayerId,
    degrees: f64,
) -> Result<bool, SnapshotError> {
    if degrees == 0.0 || !degrees.is_finite() {
        return Ok(false);
    }
    layer_history.edit_layer(canvas, id, "Rotate", |layer| {
        layer.rotation += degrees.to_radians();
        true
    })
}

/// Begin an interactive resize.  `mouse` is in screen space.
pub fn start_layer_resize(canvas: &mut CanvasState, id: LayerId, mouse: Point) -> bool {
    let Some((scale, center)) = canvas.layer(id).map(|l| (l.scale, Point::new(l.x, l.y))) else { return false };
    let center = canvas.workspace.world_to_screen(center);
    let anchor = &mut canvas.workspace.transform_start;
    anchor.scale = scale;
    anchor.mouse = mouse;
    anchor.layer_center = center;
    true
}

/// Scale follows the ratio of the pointer's distance from the layer centre
/// now versus at the start of the drag.
pub fn update_layer_resize(canvas: &mut CanvasState, id: LayerId, mouse: Point) -> bool {
    let anchor = canvas.workspace.transform_start;
    let start_dist = anchor.mouse.distance(anchor.layer_center);
    if start_dist <= f64::EPSILON {
        return false;
    }
    let Some(layer) = canvas.layer_mut(id) else { return false };
    let ratio = mouse.distance(anchor.layer_center) / start_dist;
    layer.scale = (anchor.scale * ratio).max(MIN_LAYER_SCALE);
    true
}

/// Begin an interactive rotation; `angle` is the pointer angle in radians.
pub fn start_layer_rotation(canvas: &mut CanvasState, id: LayerId, angle: f64) -> bool {
    let Some(rotation) = canvas.layer(id).map(|l| l.rotation) else { return false };
    let anchor = &mut canvas.workspace.transform_start;
    anchor.rotation = angle;
    anchor.layer_rotation = rotation;
    true
}

pub fn update_layer_rotation(canvas: &mut CanvasState, id: LayerId, angle: f64) -> bool {
    let anchor = canvas.workspace.transform_start;
    let Some(layer) = canvas.layer_mut(id) else { return false };
    layer.rotation = anchor.layer_rotation + (angle - anchor.rotation);
    true
}
