use std::sync::Arc;

use image::imageops::FilterType;
use image::{Rgba, RgbaImage};

use crate::canvas::{CanvasState, Layer, LayerId, LayerImage, LayerKind, downscale_to_fit};
use crate::components::history::{DocumentHistory, LayerHistoryStore, LayerSnapshot};
use crate::error::SnapshotError;
use crate::geometry::{BoundingBox, Point};
use crate::ops::canvas_ops::{insert_layer, place_layer};
use crate::ops::flood::polygon_mask;
use crate::settings::EngineSettings;

/// Pixels lifted out of a layer by a selection path.
#[derive(Clone, Debug)]
pub struct ExtractedRegion {
    pub image: RgbaImage,
    /// World position of the trimmed buffer's centre; a layer placed here
    /// with `scale` and `rotation` overlays the source exactly.
    pub center: Point,
    pub scale: f64,
    pub rotation: f64,
    pub dpi: f64,
}

/// In-engine clipboard filled by [`copy_selection`].
#[derive(Clone, Debug)]
pub struct ClipboardContent {
    pub image: Arc<RgbaImage>,
    pub dpi: f64,
    pub scale: f64,
    pub rotation: f64,
}

/// Copy the pixels of `layer` whose centres fall inside the world-space
/// polygon `path`, trimmed to the path's bounds.  Reads the highest
/// resolution available.  `None` when the path is degenerate, misses the
/// layer, or covers only transparent pixels.
pub fn extract_region(layer: &Layer, path: &[Point]) -> Option<ExtractedRegion> {
    let src = layer.best_pixels()?;
    let (ow, oh) = (layer.metadata.original_width as f64, layer.metadata.original_height as f64);
    if ow <= 0.0 || oh <= 0.0 {
        return None;
    }
    let (rx, ry) = (src.width() as f64 / ow, src.height() as f64 / oh);
    let (x0, y0, x1, y1, polygon) = path_window(layer, path, (rx, ry), src.dimensions())?;
    let (tw, th) = (x1 - x0, y1 - y0);

    let mask = polygon_mask(&polygon, (x0 as f64, y0 as f64), tw, th);
    if !mask.iter().any(|&m| m) {
        return None;
    }
    let mut image = RgbaImage::new(tw, th);
    for (i, _) in mask.iter().enumerate().filter(|(_, m)| **m) {
        let (tx, ty) = (i as u32 % tw, i as u32 / tw);
        image.put_pixel(tx, ty, *src.get_pixel(x0 + tx, y0 + ty));
    }

    let local_center = Point::new((x0 + x1) as f64 / 2.0 / rx, (y0 + y1) as f64 / 2.0 / ry);
    Some(ExtractedRegion {
        image,
        center: layer.layer_to_world(local_center),
        scale: layer.scale / rx,
        rotation: layer.rotation,
        dpi: layer.metadata.dpi,
    })
}

/// Project a world path into a buffer with the given pixels-per-layer-unit
/// ratio and clip its bounds to the buffer.  Returns the pixel window
/// `[x0, x1) × [y0, y1)` and the polygon in buffer pixels.
fn path_window(
    layer: &Layer,
    path: &[Point],
    ratio: (f64, f64),
    dims: (u32, u32),
) -> Option<(u32, u32, u32, u32, Vec<Point>)> {
    if path.len() < 3 {
        return None;
    }
    let polygon: Vec<Point> = path
        .iter()
        .map(|p| {
            let l = layer.world_to_layer(*p);
            Point::new(l.x * ratio.0, l.y * ratio.1)
        })
        .collect();
    let bounds = BoundingBox::from_points(&polygon)?;
    if bounds.is_degenerate() {
        return None;
    }
    let x0 = bounds.min_x.floor().max(0.0) as u32;
    let y0 = bounds.min_y.floor().max(0.0) as u32;
    let x1 = (bounds.max_x.ceil().max(0.0) as u32).min(dims.0);
    let y1 = (bounds.max_y.ceil().max(0.0) as u32).min(dims.1);
    if x0 >= x1 || y0 >= y1 {
        return None;
    }
    Some((x0, y0, x1, y1, polygon))
}

/// Make the pixels inside `path` fully transparent on the working buffer.
/// Returns whether anything was cleared.
pub fn clear_region(layer: &mut Layer, path: &[Point]) -> bool {
    let ratio = layer.working_ratio();
    let Some(dims) = layer.pixels().map(|img| img.dimensions()) else { return false };
    let Some((x0, y0, x1, y1, polygon)) = path_window(layer, path, ratio, dims) else { return false };
    let (tw, th) = (x1 - x0, y1 - y0);
    let mask = polygon_mask(&polygon, (x0 as f64, y0 as f64), tw, th);
    let Some(buf) = layer.ensure_mutable() else { return false };
    let mut cleared = false;
    for (i, _) in mask.iter().enumerate().filter(|(_, m)| **m) {
        let px = buf.get_pixel_mut(x0 + i as u32 % tw, y0 + i as u32 / tw);
        if px[3] != 0 {
            cleared = true;
        }
        *px = Rgba([0, 0, 0, 0]);
    }
    cleared
}

fn region_layer(name: String, kind: LayerKind, region: ExtractedRegion, settings: &EngineSettings) -> Layer {
    let ExtractedRegion { image, center, scale, rotation, dpi } = region;
    let mut layer = Layer::from_pixels(name, kind, image, dpi);
    layer.x = center.x;
    layer.y = center.y;
    layer.scale = scale;
    layer.rotation = rotation;
    layer.low_res_proxy = layer
        .pixels()
        .and_then(|img| downscale_to_fit(img, settings.low_res_proxy_size, FilterType::Triangle))
        .map(Arc::new);
    layer.refresh_thumbnail(settings.thumbnail_size);
    layer
}

/// The selected layer and the active selection polygon, if both exist.
fn selected_with_path(canvas: &CanvasState) -> Option<(LayerId, Vec<Point>)> {
    let layer = canvas.selected_layer()?;
    let path = canvas.selection.path()?;
    Some((layer.id, path))
}

// ============================================================================
// OPERATIONS
// ============================================================================

/// Copy the selection on the selected layer into `clipboard`.  The
/// selection is cleared afterwards.
pub fn copy_selection(canvas: &mut CanvasState, clipboard: &mut Option<ClipboardContent>) -> bool {
    let Some((id, path)) = selected_with_path(canvas) else { return false };
    let Some(region) = canvas.layer(id).and_then(|l| extract_region(l, &path)) else { return false };
    *clipboard = Some(ClipboardContent {
        image: Arc::new(region.image),
        dpi: region.dpi,
        scale: region.scale,
        rotation: region.rotation,
    });
    canvas.clear_selection();
    true
}

/// Add the clipboard as a new pattern layer at the document centre.
pub fn paste_selection(
    canvas: &mut CanvasState,
    doc_history: &mut DocumentHistory,
    layer_history: &mut LayerHistoryStore,
    clipboard: Option<&ClipboardContent>,
    settings: &EngineSettings,
) -> Result<Option<LayerId>, SnapshotError> {
    let Some(content) = clipboard else { return Ok(None) };
    let doc = canvas.workspace.document;
    let region = ExtractedRegion {
        image: RgbaImage::clone(&content.image),
        center: Point::new(doc.width / 2.0, doc.height / 2.0),
        scale: content.scale,
        rotation: content.rotation,
        dpi: content.dpi,
    };
    let layer = region_layer("Pasted Selection".into(), LayerKind::Pattern, region, settings);
    insert_layer(canvas, doc_history, layer_history, layer, None, "Paste Selection").map(Some)
}

/// Copy the selection into a new layer directly above its source, placed
/// over the pixels it came from.
pub fn duplicate_selection(
    canvas: &mut CanvasState,
    doc_history: &mut DocumentHistory,
    layer_history: &mut LayerHistoryStore,
    settings: &EngineSettings,
) -> Result<Option<LayerId>, SnapshotError> {
    let Some((id, path)) = selected_with_path(canvas) else { return Ok(None) };
    let Some(index) = canvas.index_of(id) else { return Ok(None) };
    let source = &canvas.layers[index];
    let Some(region) = extract_region(source, &path) else { return Ok(None) };
    let layer = region_layer(format!("{} copy", source.name), source.kind, region, settings);
    canvas.clear_selection();
    insert_layer(canvas, doc_history, layer_history, layer, Some(index + 1), "Duplicate Selection").map(Some)
}

/// Like [`duplicate_selection`], but the selected pixels are also cleared
/// from the source layer (one Layer History entry on the source).
pub fn cut_selection(
    canvas: &mut CanvasState,
    doc_history: &mut DocumentHistory,
    layer_history: &mut LayerHistoryStore,
    settings: &EngineSettings,
) -> Result<Option<LayerId>, SnapshotError> {
    let Some((id, path)) = selected_with_path(canvas) else { return Ok(None) };
    let Some(index) = canvas.index_of(id) else { return Ok(None) };
    let source = &canvas.layers[index];
    let Some(region) = extract_region(source, &path) else { return Ok(None) };
    let layer = region_layer(format!("{} cutout", source.name), source.kind, region, settings);
    let before = LayerSnapshot::capture(source)?;

    doc_history.commit(canvas, "Cut Selection")?;
    let source = &mut canvas.layers[index];
    if clear_region(source, &path) {
        source.mark_raster_changed(settings.thumbnail_size, settings.low_res_proxy_size);
        layer_history.commit(source, &before, "Cut")?;
    }
    canvas.clear_selection();
    place_layer(canvas, layer_history, layer, Some(index + 1), "Cut Selection").map(Some)
}

/// Replace the selected layer's pixels with the selected region, keeping
/// its world placement.
pub fn crop_to_selection(
    canvas: &mut CanvasState,
    layer_history: &mut LayerHistoryStore,
    settings: &EngineSettings,
) -> Result<bool, SnapshotError> {
    let Some((id, path)) = selected_with_path(canvas) else { return Ok(false) };
    let Some(layer) = canvas.layer(id) else { return Ok(false) };
    let Some(region) = extract_region(layer, &path) else { return Ok(false) };

    let committed = layer_history.edit_layer(canvas, id, "Crop", |layer| {
        let (w, h) = region.image.dimensions();
        layer.low_res_proxy = downscale_to_fit(&region.image, settings.low_res_proxy_size, FilterType::Triangle).map(Arc::new);
        layer.image = Some(LayerImage::Owned(region.image));
        layer.full_res = None;
        layer.metadata.original_width = w;
        layer.metadata.original_height = h;
        layer.x = region.center.x;
        layer.y = region.center.y;
        layer.scale = region.scale;
        layer.version += 1;
        layer.refresh_thumbnail(settings.thumbnail_size);
        true
    })?;
    canvas.clear_selection();
    Ok(committed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::selection::{end_rect_selection, start_rect_selection};

    fn setup() -> (CanvasState, DocumentHistory, LayerHistoryStore, EngineSettings, LayerId) {
        let mut canvas = CanvasState::new(200.0, 100.0);
        let img = RgbaImage::from_fn(20, 10, |x, y| Rgba([x as u8 * 10, y as u8 * 10, 50, 255]));
        let mut layer = Layer::from_pixels("photo", LayerKind::Asset, img, 300.0);
        // top-left at world (0, 0)
        layer.x = 10.0;
        layer.y = 5.0;
        let id = layer.id;
        canvas.layers.push(layer);
        canvas.selected = Some(id);
        (canvas, DocumentHistory::default(), LayerHistoryStore::default(), EngineSettings::default(), id)
    }

    fn select_rect(canvas: &mut CanvasState, a: (f64, f64), b: (f64, f64)) {
        start_rect_selection(canvas, Point::new(a.0, a.1));
        end_rect_selection(canvas, Point::new(b.0, b.1));
    }

    #[test]
    fn extract_trims_to_path_bounds() {
        let (mut canvas, .., id) = setup();
        select_rect(&mut canvas, (2.0, 3.0), (6.0, 5.0));
        let path = canvas.selection.path().unwrap();
        let region = extract_region(canvas.layer(id).unwrap(), &path).unwrap();
        assert_eq!(region.image.dimensions(), (4, 2));
        assert_eq!(region.image.get_pixel(0, 0), &Rgba([20, 30, 50, 255]));
        assert_eq!(region.center, Point::new(4.0, 4.0));
        assert_eq!(region.dpi, 300.0);
    }

    #[test]
    fn degenerate_path_extracts_nothing() {
        let (canvas, .., id) = setup();
        let line = [Point::new(1.0, 1.0), Point::new(5.0, 1.0), Point::new(9.0, 1.0)];
        assert!(extract_region(canvas.layer(id).unwrap(), &line).is_none());
    }

    #[test]
    fn copy_then_paste_at_document_centre() {
        let (mut canvas, mut doc, mut layers, settings, _) = setup();
        let mut clipboard = None;
        select_rect(&mut canvas, (0.0, 0.0), (5.0, 5.0));
        assert!(copy_selection(&mut canvas, &mut clipboard));
        assert!(!canvas.selection.is_active());

        let pasted = paste_selection(&mut canvas, &mut doc, &mut layers, clipboard.as_ref(), &settings)
            .unwrap()
            .unwrap();
        let layer = canvas.layer(pasted).unwrap();
        assert_eq!((layer.x, layer.y), (100.0, 50.0));
        assert_eq!(layer.kind, LayerKind::Pattern);
        assert_eq!(layer.metadata.original_width, 5);
        assert_eq!(canvas.layers.len(), 2);
    }

    #[test]
    fn cut_clears_source_and_adds_layer_above() {
        let (mut canvas, mut doc, mut layers, settings, id) = setup();
        select_rect(&mut canvas, (0.0, 0.0), (4.0, 4.0));
        let cut = cut_selection(&mut canvas, &mut doc, &mut layers, &settings).unwrap().unwrap();

        assert_eq!(canvas.index_of(cut), Some(1));
        let source = canvas.layer(id).unwrap().pixels().unwrap();
        assert_eq!(source.get_pixel(1, 1)[3], 0);
        assert_eq!(source.get_pixel(4, 4)[3], 255);
        assert_eq!(layers.timeline(id).unwrap().entries().len(), 2);
        assert_eq!(doc.entries().len(), 1);

        let piece = canvas.layer(cut).unwrap();
        assert_eq!((piece.x, piece.y), (2.0, 2.0));
        assert_eq!(piece.pixels().unwrap().get_pixel(1, 1), &Rgba([10, 10, 50, 255]));
    }

    #[test]
    fn crop_keeps_world_placement() {
        let (mut canvas, _, mut layers, settings, id) = setup();
        select_rect(&mut canvas, (10.0, 2.0), (16.0, 8.0));
        assert!(crop_to_selection(&mut canvas, &mut layers, &settings).unwrap());
        let layer = canvas.layer(id).unwrap();
        assert_eq!((layer.metadata.original_width, layer.metadata.original_height), (6, 6));
        assert_eq!((layer.x, layer.y), (13.0, 5.0));
        // world (10, 2) still shows source pixel (10, 2)
        assert_eq!(layer.pixels().unwrap().get_pixel(0, 0), &Rgba([100, 20, 50, 255]));
    }

    #[test]
    fn nothing_happens_without_selection() {
        let (mut canvas, mut doc, mut layers, settings, _) = setup();
        assert!(duplicate_selection(&mut canvas, &mut doc, &mut layers, &settings).unwrap().is_none());
        assert!(doc.entries().is_empty());
    }
}
