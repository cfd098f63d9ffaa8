//! Selection tools: rectangle and freehand lasso drags, and the flood-fill
//! magic wand, all producing world-space regions on [`CanvasState`].

use crate::canvas::{CanvasState, ViewMode, WandMask};
use crate::geometry::{BoundingBox, Point, join_rings};
use crate::ops::flood::{flood_fill_mask, simplify_closed, trace_contours};
use crate::settings::EngineSettings;

// ============================================================================
// RECTANGLE
// ============================================================================

pub fn start_rect_selection(canvas: &mut CanvasState, p: Point) {
    canvas.clear_selection();
    let rect = &mut canvas.selection.rect;
    rect.dragging = true;
    rect.start = p;
    rect.end = p;
}

pub fn update_rect_selection(canvas: &mut CanvasState, p: Point) {
    if !canvas.selection.rect.dragging {
        return;
    }
    let rect = &mut canvas.selection.rect;
    rect.end = p;
    rect.width = (rect.end.x - rect.start.x).abs();
    rect.height = (rect.end.y - rect.start.y).abs();
    let (w, h) = (rect.width, rect.height);
    update_selection_dims(canvas, w, h);
}

pub fn end_rect_selection(canvas: &mut CanvasState, p: Point) {
    if !canvas.selection.rect.dragging {
        return;
    }
    update_rect_selection(canvas, p);
    let rect = &mut canvas.selection.rect;
    rect.dragging = false;
    if canvas.workspace.view_mode == ViewMode::Edit && rect.width * rect.height > 0.0 {
        canvas.workspace.selection_menu = Some(p);
    }
}

// ============================================================================
// LASSO
// ============================================================================

pub fn start_lasso(canvas: &mut CanvasState, p: Point) {
    canvas.clear_selection();
    let lasso = &mut canvas.selection.lasso;
    lasso.drawing = true;
    lasso.points.push(p);
    lasso.bounds = Some(BoundingBox::at(p));
}

pub fn update_lasso(canvas: &mut CanvasState, p: Point) {
    let lasso = &mut canvas.selection.lasso;
    if !lasso.drawing {
        return;
    }
    lasso.points.push(p);
    let bounds = lasso.bounds.get_or_insert(BoundingBox::at(p));
    bounds.include(p);
    let (w, h) = (bounds.width(), bounds.height());
    update_selection_dims(canvas, w, h);
}

pub fn end_lasso(canvas: &mut CanvasState) {
    let lasso = &mut canvas.selection.lasso;
    if !lasso.drawing {
        return;
    }
    lasso.drawing = false;
    if canvas.workspace.view_mode == ViewMode::Edit && lasso.points.len() > 2 {
        canvas.workspace.selection_menu = lasso.points.last().copied();
    }
}

// ============================================================================
// MAGIC WAND
// ============================================================================

/// Select the region around world point `p` on the selected layer.
///
/// With `accumulate` the new region is OR-ed into the mask kept from the
/// previous click, sampled against that click's reference colour.  Every
/// region of the combined mask is traced and the rings are joined into one
/// even-odd path, so bounds and dimensions span all of them.  Returns
/// whether a selection exists afterwards.
pub fn magic_wand(canvas: &mut CanvasState, p: Point, accumulate: bool, settings: &EngineSettings) -> bool {
    let keep_or_clear = |canvas: &mut CanvasState| {
        if !accumulate {
            canvas.clear_selection();
        }
        canvas.selection.is_active()
    };

    let Some(layer) = canvas.selected_layer() else { return keep_or_clear(canvas) };
    if !layer.visible {
        return keep_or_clear(canvas);
    }
    let Some(img) = layer.pixels() else { return keep_or_clear(canvas) };
    let (w, h) = img.dimensions();
    let (rx, ry) = layer.working_ratio();
    let local = layer.world_to_layer(p);
    let (sx, sy) = ((local.x * rx).floor(), (local.y * ry).floor());
    if sx < 0.0 || sy < 0.0 || sx >= w as f64 || sy >= h as f64 {
        return keep_or_clear(canvas);
    }
    let seed = (sx as u32, sy as u32);
    let seed_px = img.get_pixel(seed.0, seed.1);
    if seed_px[3] == 0 {
        return keep_or_clear(canvas);
    }

    let previous = canvas
        .selection
        .wand
        .as_ref()
        .filter(|m| accumulate && m.layer_id == layer.id && m.width == w && m.height == h);
    let reference = previous.map_or([seed_px[0], seed_px[1], seed_px[2]], |m| m.reference);

    let (mut mask, bounds) = flood_fill_mask(img, seed, reference, settings.wand_tolerance);
    if bounds.is_none() {
        return keep_or_clear(canvas);
    }
    if let Some(prev) = previous {
        for (m, old) in mask.iter_mut().zip(&prev.mask) {
            *m |= *old;
        }
    }

    let to_world = |&(x, y): &(f64, f64)| layer.layer_to_world(Point::new(x / rx, y / ry));
    let outlines: Vec<Vec<Point>> = trace_contours(&mask, w, h)
        .iter()
        .map(|ring| {
            let simplified = simplify_closed(ring, settings.simplify_epsilon);
            let mut world: Vec<Point> = if simplified.len() > 2 {
                simplified.iter().map(&to_world).collect()
            } else {
                // Too small to trace: fall back to the region's pixel box.
                ring_box(ring).iter().map(&to_world).collect()
            };
            world.dedup();
            world
        })
        .collect();
    let path = join_rings(&outlines);
    if path.len() < 3 {
        return keep_or_clear(canvas);
    }

    let wand = WandMask { layer_id: layer.id, reference, width: w, height: h, mask, outlines };
    let bounds = BoundingBox::from_points(&path);

    canvas.clear_selection();
    canvas.selection.lasso.points = path;
    canvas.selection.lasso.bounds = bounds;
    canvas.selection.wand = Some(wand);
    if let Some(b) = bounds {
        update_selection_dims(canvas, b.width(), b.height());
    }
    if canvas.workspace.view_mode == ViewMode::Edit {
        canvas.workspace.selection_menu = Some(p);
    }
    canvas.selection.is_active()
}

/// Pixel-edge box around a ring of pixel centres.
fn ring_box(ring: &[(f64, f64)]) -> [(f64, f64); 4] {
    let (mut x0, mut y0) = (f64::INFINITY, f64::INFINITY);
    let (mut x1, mut y1) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for &(x, y) in ring {
        x0 = x0.min(x - 0.5);
        y0 = y0.min(y - 0.5);
        x1 = x1.max(x + 0.5);
        y1 = y1.max(y + 0.5);
    }
    [(x0, y0), (x1, y0), (x1, y1), (x0, y1)]
}

// ============================================================================
// DIMENSIONS
// ============================================================================

/// Express a world-space selection size in the reference layer's pixels and
/// in centimetres at that layer's DPI.  The reference is the selected layer,
/// else the visible mockup.
pub fn update_selection_dims(canvas: &mut CanvasState, world_w: f64, world_h: f64) {
    let reference = canvas.selected_layer().or_else(|| canvas.mockup_layer());
    let (scale, dpi) = reference.map_or((1.0, 0.0), |l| (l.scale, l.metadata.dpi));

    let dims = &mut canvas.selection.dims;
    dims.px_w = world_w / scale;
    dims.px_h = world_h / scale;
    if dpi > 0.0 {
        dims.cm_w = dims.px_w * 2.54 / dpi;
        dims.cm_h = dims.px_h * 2.54 / dpi;
    } else {
        dims.cm_w = 0.0;
        dims.cm_h = 0.0;
    }
}
