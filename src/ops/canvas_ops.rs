use std::sync::Arc;

use image::RgbaImage;
use image::imageops::FilterType;
use uuid::Uuid;

use crate::canvas::{
    Adjustments, AdjustmentsPatch, CanvasState, Layer, LayerId, LayerImage, LayerKind, LayerProperties,
    downscale_to_fit,
};
use crate::components::history::{DocumentHistory, LayerHistoryStore, LayerSnapshot};
use crate::error::SnapshotError;
use crate::geometry::BoundingBox;
use crate::ops::transform::render_image_into;
use crate::settings::EngineSettings;

/// Insert a finished layer (decoded, pasted, extracted) and select it.
/// `at` is the stack index, `None` for the top.  The document is captured
/// first and the new layer gets its own first history entry.
pub fn insert_layer(
    canvas: &mut CanvasState,
    doc_history: &mut DocumentHistory,
    layer_history: &mut LayerHistoryStore,
    layer: Layer,
    at: Option<usize>,
    label: &str,
) -> Result<LayerId, SnapshotError> {
    doc_history.commit(canvas, label)?;
    place_layer(canvas, layer_history, layer, at, label)
}

/// [`insert_layer`] for callers that already captured the document.
pub fn place_layer(
    canvas: &mut CanvasState,
    layer_history: &mut LayerHistoryStore,
    layer: Layer,
    at: Option<usize>,
    label: &str,
) -> Result<LayerId, SnapshotError> {
    let id = layer.id;
    let index = at.unwrap_or(canvas.layers.len()).min(canvas.layers.len());
    canvas.layers.insert(index, layer);
    canvas.selected = Some(id);
    layer_history.record(&canvas.layers[index], label)?;
    log_info!("layers: inserted \"{}\" at {} ({})", canvas.layers[index].name, index, label);
    Ok(id)
}

/// Remove a layer.  The selection moves to the layer now occupying its
/// slot, or the new top when it was the top.
pub fn delete_layer(
    canvas: &mut CanvasState,
    doc_history: &mut DocumentHistory,
    layer_history: &mut LayerHistoryStore,
    id: LayerId,
) -> Result<bool, SnapshotError> {
    let Some(index) = canvas.index_of(id) else { return Ok(false) };
    doc_history.commit(canvas, "Delete Layer")?;
    canvas.layers.remove(index);
    layer_history.clear(id);
    if canvas.selected == Some(id) {
        canvas.selected = if canvas.layers.is_empty() {
            None
        } else {
            Some(canvas.layers[index.min(canvas.layers.len() - 1)].id)
        };
    }
    if canvas.selection.wand.as_ref().is_some_and(|w| w.layer_id == id) {
        canvas.clear_selection();
    }
    Ok(true)
}

/// Move a layer from stack index `from` to `to` (both clamped into range).
pub fn move_layer(
    canvas: &mut CanvasState,
    doc_history: &mut DocumentHistory,
    from: usize,
    to: usize,
) -> Result<bool, SnapshotError> {
    let len = canvas.layers.len();
    if from >= len {
        return Ok(false);
    }
    let to = to.min(len - 1);
    if from == to {
        return Ok(false);
    }
    doc_history.commit(canvas, "Reorder Layers")?;
    let layer = canvas.layers.remove(from);
    canvas.layers.insert(to, layer);
    Ok(true)
}

pub fn bring_forward(canvas: &mut CanvasState, doc_history: &mut DocumentHistory, id: LayerId) -> Result<bool, SnapshotError> {
    match canvas.index_of(id) {
        Some(i) if i + 1 < canvas.layers.len() => move_layer(canvas, doc_history, i, i + 1),
        _ => Ok(false),
    }
}

pub fn send_backward(canvas: &mut CanvasState, doc_history: &mut DocumentHistory, id: LayerId) -> Result<bool, SnapshotError> {
    match canvas.index_of(id) {
        Some(i) if i > 0 => move_layer(canvas, doc_history, i, i - 1),
        _ => Ok(false),
    }
}

/// Deep copy placed `duplicate_offset` down-right of the source, directly above it.
pub fn duplicate_layer(
    canvas: &mut CanvasState,
    doc_history: &mut DocumentHistory,
    layer_history: &mut LayerHistoryStore,
    id: LayerId,
    settings: &EngineSettings,
) -> Result<Option<LayerId>, SnapshotError> {
    let Some(index) = canvas.index_of(id) else { return Ok(None) };
    let source = &canvas.layers[index];
    if source.is_pending() {
        return Ok(None);
    }
    let mut copy = source.clone();
    copy.id = Uuid::new_v4();
    copy.name = format!("{} copy", source.name);
    copy.x += settings.duplicate_offset;
    copy.y += settings.duplicate_offset;
    if let Some(LayerImage::Owned(img)) = &source.image {
        // Owned pixels are mutable in place; the copy must not alias them.
        copy.image = Some(LayerImage::Owned(img.clone()));
    }
    insert_layer(canvas, doc_history, layer_history, copy, Some(index + 1), "Duplicate Layer").map(Some)
}

/// Flatten the layer at `id` onto the one below it.
///
/// Both layers are composited (opacity, placement, flips and adjustments
/// baked) into a buffer covering the union of their world bounds at one
/// pixel per world unit.  The lower layer survives with that buffer, unit
/// scale, no rotation and default adjustments; the upper one is removed
/// along with its history.  A hidden layer contributes no pixels, though
/// its bounds still shape the merged buffer.
pub fn merge_down(
    canvas: &mut CanvasState,
    doc_history: &mut DocumentHistory,
    layer_history: &mut LayerHistoryStore,
    id: LayerId,
    settings: &EngineSettings,
) -> Result<bool, SnapshotError> {
    let Some(upper_idx) = canvas.index_of(id) else { return Ok(false) };
    if upper_idx == 0 {
        return Ok(false);
    }
    let lower_idx = upper_idx - 1;
    let (lower, upper) = (&canvas.layers[lower_idx], &canvas.layers[upper_idx]);
    let (Some(lower_bounds), Some(upper_bounds)) = (lower.world_bounds(), upper.world_bounds()) else {
        return Ok(false);
    };
    if lower.best_pixels().is_none() || upper.best_pixels().is_none() {
        return Ok(false);
    }

    let union: BoundingBox = lower_bounds.union(&upper_bounds);
    let x0 = union.min_x.floor();
    let y0 = union.min_y.floor();
    let w = (union.max_x.ceil() - x0) as u32;
    let h = (union.max_y.ceil() - y0) as u32;
    if w == 0 || h == 0 {
        return Ok(false);
    }

    let mut merged = RgbaImage::new(w, h);
    for layer in [lower, upper].into_iter().filter(|l| l.visible) {
        if let Some(src) = layer.best_pixels() {
            render_image_into(&mut merged, (x0, y0), src, &layer.transform(), &layer.adjustments, layer.opacity);
        }
    }

    let before = LayerSnapshot::capture(lower)?;
    doc_history.commit(canvas, "Merge Down")?;

    let upper = canvas.layers.remove(upper_idx);
    layer_history.clear(upper.id);
    canvas.clear_selection();

    let survivor = &mut canvas.layers[lower_idx];
    survivor.low_res_proxy = downscale_to_fit(&merged, settings.low_res_proxy_size, FilterType::Triangle).map(Arc::new);
    survivor.image = Some(LayerImage::Owned(merged));
    survivor.full_res = None;
    survivor.metadata.original_width = w;
    survivor.metadata.original_height = h;
    survivor.x = x0 + w as f64 / 2.0;
    survivor.y = y0 + h as f64 / 2.0;
    survivor.scale = 1.0;
    survivor.rotation = 0.0;
    survivor.opacity = 1.0;
    survivor.adjustments = Adjustments::default();
    survivor.version += 1;
    survivor.refresh_thumbnail(settings.thumbnail_size);
    layer_history.commit(survivor, &before, "Merge Down")?;

    let survivor_id = survivor.id;
    canvas.selected = Some(survivor_id);
    log_info!("layers: merged \"{}\" down into {}×{} buffer", upper.name, w, h);
    Ok(true)
}

/// Rescale the mockup to fit `width × height` document pixels, centre it and
/// make that the document size.
pub fn resize_mockup(
    canvas: &mut CanvasState,
    doc_history: &mut DocumentHistory,
    width: f64,
    height: f64,
) -> Result<bool, SnapshotError> {
    if !(width > 0.0 && height > 0.0) {
        return Ok(false);
    }
    let Some(index) = canvas.layers.iter().position(|l| l.kind == LayerKind::Mockup && !l.is_pending()) else {
        return Ok(false);
    };
    doc_history.commit(canvas, "Resize Mockup")?;
    let mockup = &mut canvas.layers[index];
    let (ow, oh) = (mockup.metadata.original_width as f64, mockup.metadata.original_height as f64);
    mockup.scale = (width / ow).min(height / oh);
    mockup.x = width / 2.0;
    mockup.y = height / 2.0;
    canvas.workspace.document.width = width;
    canvas.workspace.document.height = height;
    Ok(true)
}

pub fn set_layer_properties(
    canvas: &mut CanvasState,
    layer_history: &mut LayerHistoryStore,
    id: LayerId,
    props: &LayerProperties,
) -> Result<bool, SnapshotError> {
    layer_history.edit_layer(canvas, id, "Properties", |layer| {
        layer.set_properties(props);
        true
    })
}

pub fn set_layer_adjustments(
    canvas: &mut CanvasState,
    layer_history: &mut LayerHistoryStore,
    id: LayerId,
    patch: &AdjustmentsPatch,
) -> Result<bool, SnapshotError> {
    layer_history.edit_layer(canvas, id, "Adjustments", |layer| {
        layer.set_adjustments(patch);
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    struct Fixture {
        canvas: CanvasState,
        doc: DocumentHistory,
        layers: LayerHistoryStore,
        settings: EngineSettings,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                canvas: CanvasState::new(100.0, 100.0),
                doc: DocumentHistory::default(),
                layers: LayerHistoryStore::default(),
                settings: EngineSettings::default(),
            }
        }

        fn push(&mut self, name: &str, img: RgbaImage, x: f64, y: f64) -> LayerId {
            let mut layer = Layer::from_pixels(name, LayerKind::Asset, img, 96.0);
            layer.x = x;
            layer.y = y;
            let id = layer.id;
            self.canvas.layers.push(layer);
            id
        }

        fn names(&self) -> Vec<String> {
            self.canvas.layers.iter().map(|l| l.name.clone()).collect()
        }
    }

    fn solid(w: u32, h: u32, c: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba(c))
    }

    #[test]
    fn delete_moves_selection_to_neighbor() {
        let mut f = Fixture::new();
        let a = f.push("a", solid(2, 2, [1; 4]), 1.0, 1.0);
        let b = f.push("b", solid(2, 2, [2; 4]), 1.0, 1.0);
        let c = f.push("c", solid(2, 2, [3; 4]), 1.0, 1.0);
        f.canvas.selected = Some(b);
        assert!(delete_layer(&mut f.canvas, &mut f.doc, &mut f.layers, b).unwrap());
        assert_eq!(f.canvas.selected, Some(c));
        f.canvas.selected = Some(c);
        delete_layer(&mut f.canvas, &mut f.doc, &mut f.layers, c).unwrap();
        assert_eq!(f.canvas.selected, Some(a));
        assert_eq!(f.doc.entries().len(), 2);
    }

    #[test]
    fn reorder_operations() {
        let mut f = Fixture::new();
        let a = f.push("a", solid(1, 1, [1; 4]), 0.0, 0.0);
        f.push("b", solid(1, 1, [1; 4]), 0.0, 0.0);
        let c = f.push("c", solid(1, 1, [1; 4]), 0.0, 0.0);
        assert!(bring_forward(&mut f.canvas, &mut f.doc, a).unwrap());
        assert_eq!(f.names(), vec!["b", "a", "c"]);
        assert!(!bring_forward(&mut f.canvas, &mut f.doc, c).unwrap());
        assert!(send_backward(&mut f.canvas, &mut f.doc, c).unwrap());
        assert_eq!(f.names(), vec!["b", "c", "a"]);
        assert!(move_layer(&mut f.canvas, &mut f.doc, 2, 0).unwrap());
        assert_eq!(f.names(), vec!["a", "b", "c"]);
        assert_eq!(f.doc.entries().len(), 3);
    }

    #[test]
    fn duplicate_is_offset_and_above_source() {
        let mut f = Fixture::new();
        let base = f.push("base", solid(4, 4, [9; 4]), 100.0, 100.0);
        f.push("top", solid(4, 4, [9; 4]), 0.0, 0.0);
        let dup = duplicate_layer(&mut f.canvas, &mut f.doc, &mut f.layers, base, &f.settings).unwrap().unwrap();
        let layer = f.canvas.layer(dup).unwrap();
        assert_eq!((layer.x, layer.y), (120.0, 120.0));
        assert_eq!(f.canvas.index_of(dup), Some(1));
        assert_eq!(f.canvas.selected, Some(dup));
        assert_eq!(f.doc.entries().len(), 1);
        assert_eq!(f.layers.timeline(dup).unwrap().entries().len(), 1);
    }

    #[test]
    fn merge_down_is_pixel_exact_for_aligned_layers() {
        let mut f = Fixture::new();
        let mut lower_img = solid(4, 4, [10, 20, 30, 255]);
        lower_img.put_pixel(3, 3, Rgba([1, 2, 3, 255]));
        f.push("lower", lower_img.clone(), 2.0, 2.0);
        let upper_img = solid(2, 2, [200, 100, 50, 255]);
        let upper = f.push("upper", upper_img, 5.0, 5.0);

        assert!(merge_down(&mut f.canvas, &mut f.doc, &mut f.layers, upper, &f.settings).unwrap());
        assert_eq!(f.canvas.layers.len(), 1);
        let merged = &f.canvas.layers[0];
        assert_eq!((merged.metadata.original_width, merged.metadata.original_height), (6, 6));
        assert_eq!((merged.x, merged.y, merged.scale), (3.0, 3.0, 1.0));
        let px = merged.pixels().unwrap();
        assert_eq!(px.get_pixel(0, 0), lower_img.get_pixel(0, 0));
        assert_eq!(px.get_pixel(3, 3), &Rgba([1, 2, 3, 255]));
        assert_eq!(px.get_pixel(4, 4), &Rgba([200, 100, 50, 255]));
        assert_eq!(px.get_pixel(5, 5), &Rgba([200, 100, 50, 255]));
        assert_eq!(px.get_pixel(5, 0)[3], 0);
        assert!(f.layers.timeline(upper).is_none());
        assert_eq!(f.doc.entries().len(), 1);
    }

    #[test]
    fn merge_down_skips_hidden_upper_pixels() {
        let mut f = Fixture::new();
        f.push("lower", solid(4, 4, [10, 20, 30, 255]), 2.0, 2.0);
        let upper = f.push("upper", solid(4, 4, [200, 100, 50, 255]), 2.0, 2.0);
        f.canvas.layer_mut(upper).unwrap().visible = false;

        assert!(merge_down(&mut f.canvas, &mut f.doc, &mut f.layers, upper, &f.settings).unwrap());
        let px = f.canvas.layers[0].pixels().unwrap();
        assert_eq!(px.get_pixel(1, 1), &Rgba([10, 20, 30, 255]));
        assert_eq!(px.get_pixel(3, 3), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn merge_down_on_bottom_layer_is_noop() {
        let mut f = Fixture::new();
        let only = f.push("only", solid(2, 2, [1; 4]), 1.0, 1.0);
        assert!(!merge_down(&mut f.canvas, &mut f.doc, &mut f.layers, only, &f.settings).unwrap());
        assert!(f.doc.entries().is_empty());
    }

    #[test]
    fn property_changes_are_tracked() {
        let mut f = Fixture::new();
        let id = f.push("l", solid(2, 2, [1; 4]), 1.0, 1.0);
        let props = LayerProperties { opacity: Some(0.5), ..Default::default() };
        assert!(set_layer_properties(&mut f.canvas, &mut f.layers, id, &props).unwrap());
        // Same value again: nothing new to record.
        assert!(!set_layer_properties(&mut f.canvas, &mut f.layers, id, &props).unwrap());
        let patch = AdjustmentsPatch { sepia: Some(40.0), ..Default::default() };
        assert!(set_layer_adjustments(&mut f.canvas, &mut f.layers, id, &patch).unwrap());
        assert_eq!(f.layers.timeline(id).unwrap().entries().len(), 3);
    }

    #[test]
    fn resize_mockup_sets_document() {
        let mut f = Fixture::new();
        let mut mockup = Layer::from_pixels("m", LayerKind::Mockup, solid(400, 200, [5; 4]), 96.0);
        mockup.x = 200.0;
        mockup.y = 100.0;
        let id = mockup.id;
        f.canvas.layers.push(mockup);
        assert!(resize_mockup(&mut f.canvas, &mut f.doc, 200.0, 100.0).unwrap());
        let m = f.canvas.layer(id).unwrap();
        assert_eq!((m.scale, m.x, m.y), (0.5, 100.0, 50.0));
        assert_eq!(f.canvas.workspace.document.width, 200.0);
    }
}
