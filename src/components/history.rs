use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use image::RgbaImage;
use image::imageops::FilterType;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::canvas::{
    Adjustments, CanvasState, DocumentSize, Layer, LayerId, LayerImage, LayerKind, LayerMetadata, ViewMode,
    downscale_to_fit,
};
use crate::error::{DecodeError, SnapshotError};
use crate::geometry::Point;
use crate::io::{decode_png_data_url, encode_png_data_url};
use crate::settings::EngineSettings;

/// Label of the entry seeded with a layer's state before its first edit.
pub const INITIAL_LABEL: &str = "Initial";

// ============================================================================
// SNAPSHOTS
// ============================================================================

/// Everything needed to rebuild one layer: scalar state plus its
/// best-resolution pixels as a PNG data URL.  `version` is deliberately absent so that two
/// captures of an unchanged layer serialize identically.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerSnapshot {
    pub id: LayerId,
    pub name: String,
    pub kind: LayerKind,
    pub visible: bool,
    pub opacity: f32,
    pub source: Option<String>,
    pub x: f64,
    pub y: f64,
    pub scale: f64,
    pub rotation: f64,
    pub metadata: LayerMetadata,
    pub adjustments: Adjustments,
    /// `None` for a layer that had no pixels (still decoding).
    pub image: Option<String>,
}

impl LayerSnapshot {
    pub fn capture(layer: &Layer) -> Result<Self, DecodeError> {
        let image = layer.best_pixels().map(encode_png_data_url).transpose()?;
        Ok(Self {
            id: layer.id,
            name: layer.name.clone(),
            kind: layer.kind,
            visible: layer.visible,
            opacity: layer.opacity,
            source: layer.source.clone(),
            x: layer.x,
            y: layer.y,
            scale: layer.scale,
            rotation: layer.rotation,
            metadata: layer.metadata,
            adjustments: layer.adjustments,
            image,
        })
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn decode_pixels(&self) -> Result<Option<RgbaImage>, DecodeError> {
        self.image.as_deref().map(decode_png_data_url).transpose()
    }

    /// Overwrite `layer` with this state.  Restoration never records history.
    /// Pixels larger than `max_display_size` come back as the full-resolution
    /// buffer behind a fresh display proxy, the same split a decode makes.
    pub fn apply_to(&self, layer: &mut Layer, pixels: Option<RgbaImage>, settings: &EngineSettings) {
        layer.id = self.id;
        layer.name = self.name.clone();
        layer.kind = self.kind;
        layer.visible = self.visible;
        layer.opacity = self.opacity;
        layer.source = self.source.clone();
        layer.x = self.x;
        layer.y = self.y;
        layer.scale = self.scale;
        layer.rotation = self.rotation;
        layer.metadata = self.metadata;
        layer.adjustments = self.adjustments;

        layer.low_res_proxy = pixels
            .as_ref()
            .and_then(|img| downscale_to_fit(img, settings.low_res_proxy_size, FilterType::Triangle))
            .map(Arc::new);
        let display = pixels
            .as_ref()
            .and_then(|img| downscale_to_fit(img, settings.max_display_size, FilterType::Triangle));
        match (pixels, display) {
            (Some(full), Some(proxy)) => {
                layer.full_res = Some(Arc::new(full));
                layer.image = Some(LayerImage::Shared(Arc::new(proxy)));
            }
            (pixels, _) => {
                layer.full_res = None;
                layer.image = pixels.map(|img| LayerImage::Shared(Arc::new(img)));
            }
        }
        layer.version += 1;
        layer.refresh_thumbnail(settings.thumbnail_size);
    }

    fn to_layer(&self, pixels: Option<RgbaImage>, previous_version: u64, settings: &EngineSettings) -> Layer {
        let mut layer = Layer::new(self.name.clone(), self.kind, self.source.clone(), self.metadata);
        layer.version = previous_version;
        self.apply_to(&mut layer, pixels, settings);
        layer
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSnapshot {
    pub pan: Point,
    pub zoom: f64,
    pub view_mode: ViewMode,
    pub document: DocumentSize,
}

/// The whole document: every layer (pixels included) plus the workspace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub layers: Vec<LayerSnapshot>,
    pub selected: Option<LayerId>,
    pub workspace: WorkspaceSnapshot,
}

impl DocumentSnapshot {
    /// Encodes every layer's pixels in parallel.
    pub fn capture(canvas: &CanvasState) -> Result<Self, DecodeError> {
        let layers = canvas
            .layers
            .par_iter()
            .map(LayerSnapshot::capture)
            .collect::<Result<Vec<_>, _>>()?;
        let ws = &canvas.workspace;
        Ok(Self {
            layers,
            selected: canvas.selected,
            workspace: WorkspaceSnapshot {
                pan: ws.pan,
                zoom: ws.zoom,
                view_mode: ws.view_mode,
                document: ws.document,
            },
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub label: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// JSON-serialized snapshot.
    pub state: String,
}

impl HistoryEntry {
    fn new(label: impl Into<String>, state: String) -> Self {
        Self { label: label.into(), timestamp: now_millis(), state }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// LAYER HISTORY
// ============================================================================

/// One layer's timeline.  Each entry is a full state; `cursor` points at the
/// entry matching the layer as it is now.
#[derive(Clone, Debug, Default)]
pub struct LayerHistory {
    entries: Vec<HistoryEntry>,
    cursor: usize,
}

impl LayerHistory {
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    fn push(&mut self, entry: HistoryEntry, max: usize) {
        if !self.entries.is_empty() {
            self.entries.truncate(self.cursor + 1);
        }
        self.entries.push(entry);
        while self.entries.len() > max.max(1) {
            self.entries.remove(0);
        }
        self.cursor = self.entries.len() - 1;
    }
}

/// Per-layer timelines keyed by layer id.  Created on first commit, removed
/// with the layer.
#[derive(Clone, Debug)]
pub struct LayerHistoryStore {
    timelines: HashMap<LayerId, LayerHistory>,
    max_history_size: usize,
}

impl Default for LayerHistoryStore {
    fn default() -> Self {
        Self::new(50)
    }
}

impl LayerHistoryStore {
    pub fn new(max_history_size: usize) -> Self {
        Self { timelines: HashMap::new(), max_history_size }
    }

    pub fn timeline(&self, id: LayerId) -> Option<&LayerHistory> {
        self.timelines.get(&id)
    }

    /// Record the change from `before` to the layer's current state.  Nothing
    /// is stored when the two serialize identically.  Returns whether an
    /// entry was added.
    pub fn commit(&mut self, layer: &Layer, before: &LayerSnapshot, label: &str) -> Result<bool, SnapshotError> {
        let before_json = before.to_json()?;
        let after_json = LayerSnapshot::capture(layer)?.to_json()?;
        if before_json == after_json {
            return Ok(false);
        }

        let max = self.max_history_size;
        let timeline = self.timelines.entry(layer.id).or_default();
        let matches_cursor = timeline
            .entries
            .get(timeline.cursor)
            .is_some_and(|e| e.state == before_json);
        if !matches_cursor {
            let seed_label = if timeline.entries.is_empty() { INITIAL_LABEL } else { "Restore point" };
            timeline.push(HistoryEntry::new(seed_label, before_json), max);
        }
        timeline.push(HistoryEntry::new(label, after_json), max);
        Ok(true)
    }

    /// Run `edit` on layer `id` and commit the result under `label`.  `edit`
    /// returns `false` when it decided there was nothing to do.
    pub fn edit_layer<F>(&mut self, canvas: &mut CanvasState, id: LayerId, label: &str, edit: F) -> Result<bool, SnapshotError>
    where
        F: FnOnce(&mut Layer) -> bool,
    {
        let Some(layer) = canvas.layer_mut(id) else { return Ok(false) };
        let before = LayerSnapshot::capture(layer)?;
        if !edit(layer) {
            return Ok(false);
        }
        self.commit(layer, &before, label)
    }

    /// Append the layer's current state unconditionally (new layers).
    pub fn record(&mut self, layer: &Layer, label: &str) -> Result<(), SnapshotError> {
        let json = LayerSnapshot::capture(layer)?.to_json()?;
        let max = self.max_history_size;
        self.timelines.entry(layer.id).or_default().push(HistoryEntry::new(label, json), max);
        Ok(())
    }

    /// Step back one entry.  Returns the label that was undone.
    pub fn undo(
        &mut self,
        canvas: &mut CanvasState,
        id: LayerId,
        settings: &EngineSettings,
    ) -> Result<Option<String>, SnapshotError> {
        let Some(timeline) = self.timelines.get(&id) else { return Ok(None) };
        if !timeline.can_undo() {
            return Ok(None);
        }
        let undone = timeline.entries[timeline.cursor].label.clone();
        let target = timeline.cursor - 1;
        Ok(self.restore(canvas, id, target, settings)?.then_some(undone))
    }

    /// Step forward one entry.  Returns the label that was redone.
    pub fn redo(
        &mut self,
        canvas: &mut CanvasState,
        id: LayerId,
        settings: &EngineSettings,
    ) -> Result<Option<String>, SnapshotError> {
        let Some(timeline) = self.timelines.get(&id) else { return Ok(None) };
        if !timeline.can_redo() {
            return Ok(None);
        }
        let target = timeline.cursor + 1;
        let redone = timeline.entries[target].label.clone();
        Ok(self.restore(canvas, id, target, settings)?.then_some(redone))
    }

    /// Jump straight to entry `index`.
    pub fn revert_to(
        &mut self,
        canvas: &mut CanvasState,
        id: LayerId,
        index: usize,
        settings: &EngineSettings,
    ) -> Result<bool, SnapshotError> {
        let len = self.timelines.get(&id).map_or(0, |t| t.entries.len());
        if index >= len {
            return Err(SnapshotError::OutOfRange { index, len });
        }
        self.restore(canvas, id, index, settings)
    }

    fn restore(
        &mut self,
        canvas: &mut CanvasState,
        id: LayerId,
        index: usize,
        settings: &EngineSettings,
    ) -> Result<bool, SnapshotError> {
        let Some(timeline) = self.timelines.get_mut(&id) else { return Ok(false) };
        let Some(layer) = canvas.layer_mut(id) else { return Ok(false) };
        let snapshot = LayerSnapshot::from_json(&timeline.entries[index].state)?;
        let pixels = snapshot.decode_pixels()?;
        snapshot.apply_to(layer, pixels, settings);
        timeline.cursor = index;
        Ok(true)
    }

    pub fn clear(&mut self, id: LayerId) {
        self.timelines.remove(&id);
    }

    /// Drop timelines whose layer no longer exists.
    pub fn retain_layers(&mut self, live: &HashSet<LayerId>) {
        self.timelines.retain(|id, _| live.contains(id));
    }

    pub fn len(&self) -> usize {
        self.timelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timelines.is_empty()
    }
}

// ============================================================================
// DOCUMENT HISTORY
// ============================================================================

#[derive(Clone, Debug)]
pub struct RestoreFailure {
    pub layer_id: LayerId,
    pub name: String,
    pub error: DecodeError,
}

/// Outcome of a document restore.  Layers listed here were kept with their
/// scalar state but no pixels.
#[derive(Clone, Debug, Default)]
pub struct RestoreReport {
    pub label: String,
    pub failures: Vec<RestoreFailure>,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Whole-document timeline.  `entries[i]` is the state captured before
/// operation `i`; `pointer` counts how many of those operations are applied.
/// The live state is parked in `tip` when undo first leaves it.
#[derive(Clone, Debug)]
pub struct DocumentHistory {
    entries: Vec<HistoryEntry>,
    pointer: usize,
    tip: Option<String>,
    max_history_size: usize,
}

impl Default for DocumentHistory {
    fn default() -> Self {
        Self::new(50)
    }
}

impl DocumentHistory {
    pub fn new(max_history_size: usize) -> Self {
        Self { entries: Vec::new(), pointer: 0, tip: None, max_history_size }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn pointer(&self) -> usize {
        self.pointer
    }

    pub fn can_undo(&self) -> bool {
        self.pointer > 0
    }

    pub fn can_redo(&self) -> bool {
        self.pointer < self.entries.len()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.pointer.checked_sub(1).map(|i| self.entries[i].label.as_str())
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.entries.get(self.pointer).map(|e| e.label.as_str())
    }

    /// Capture the document as it is now, before a structural operation
    /// labelled `label`.  Any redo branch is discarded.
    pub fn commit(&mut self, canvas: &CanvasState, label: &str) -> Result<(), SnapshotError> {
        let json = serde_json::to_string(&DocumentSnapshot::capture(canvas)?)?;
        self.entries.truncate(self.pointer);
        self.entries.push(HistoryEntry::new(label, json));
        self.tip = None;
        while self.entries.len() > self.max_history_size.max(1) {
            self.entries.remove(0);
        }
        self.pointer = self.entries.len();
        Ok(())
    }

    pub fn undo(
        &mut self,
        canvas: &mut CanvasState,
        layer_history: &mut LayerHistoryStore,
        settings: &EngineSettings,
    ) -> Result<Option<RestoreReport>, SnapshotError> {
        if !self.can_undo() {
            return Ok(None);
        }
        self.goto(self.pointer - 1, canvas, layer_history, settings).map(Some)
    }

    pub fn redo(
        &mut self,
        canvas: &mut CanvasState,
        layer_history: &mut LayerHistoryStore,
        settings: &EngineSettings,
    ) -> Result<Option<RestoreReport>, SnapshotError> {
        if !self.can_redo() {
            return Ok(None);
        }
        self.goto(self.pointer + 1, canvas, layer_history, settings).map(Some)
    }

    /// Restore the state before operation `index` (or the live tip for
    /// `index == entries().len()`).
    pub fn revert_to(
        &mut self,
        index: usize,
        canvas: &mut CanvasState,
        layer_history: &mut LayerHistoryStore,
        settings: &EngineSettings,
    ) -> Result<RestoreReport, SnapshotError> {
        if index > self.entries.len() {
            return Err(SnapshotError::OutOfRange { index, len: self.entries.len() });
        }
        self.goto(index, canvas, layer_history, settings)
    }

    fn goto(
        &mut self,
        target: usize,
        canvas: &mut CanvasState,
        layer_history: &mut LayerHistoryStore,
        settings: &EngineSettings,
    ) -> Result<RestoreReport, SnapshotError> {
        if self.pointer == self.entries.len() && target < self.pointer {
            self.tip = Some(serde_json::to_string(&DocumentSnapshot::capture(canvas)?)?);
        }

        let (label, state) = if target < self.entries.len() {
            let e = &self.entries[target];
            (e.label.clone(), e.state.as_str())
        } else {
            match &self.tip {
                Some(tip) => (String::from("Current"), tip.as_str()),
                None => return Err(SnapshotError::OutOfRange { index: target, len: self.entries.len() }),
            }
        };

        let snapshot: DocumentSnapshot = serde_json::from_str(state)?;
        let mut report = restore_document(&snapshot, canvas, layer_history, settings);
        report.label = label;

        self.pointer = target;
        if self.pointer == self.entries.len() {
            self.tip = None;
        }
        Ok(report)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.pointer = 0;
        self.tip = None;
    }
}

/// Decode every payload first, then swap the whole layer set in one step.
fn restore_document(
    snapshot: &DocumentSnapshot,
    canvas: &mut CanvasState,
    layer_history: &mut LayerHistoryStore,
    settings: &EngineSettings,
) -> RestoreReport {
    let decoded: Vec<Result<Option<RgbaImage>, DecodeError>> =
        snapshot.layers.par_iter().map(LayerSnapshot::decode_pixels).collect();

    let mut report = RestoreReport::default();
    let mut layers = Vec::with_capacity(snapshot.layers.len());
    for (snap, pixels) in snapshot.layers.iter().zip(decoded) {
        let previous_version = canvas.layer(snap.id).map_or(0, |l| l.version);
        let pixels = match pixels {
            Ok(p) => p,
            Err(error) => {
                log_err!("history: layer \"{}\" ({}) failed to restore: {}", snap.name, snap.id, error);
                report.failures.push(RestoreFailure { layer_id: snap.id, name: snap.name.clone(), error });
                None
            }
        };
        layers.push(snap.to_layer(pixels, previous_version, settings));
    }

    canvas.layers = layers;
    canvas.selected = snapshot.selected.filter(|id| canvas.index_of(*id).is_some());
    let ws = &mut canvas.workspace;
    ws.pan = snapshot.workspace.pan;
    ws.zoom = snapshot.workspace.zoom;
    ws.view_mode = snapshot.workspace.view_mode;
    ws.document = snapshot.workspace.document;
    canvas.clear_selection();

    let live: HashSet<LayerId> = canvas.layers.iter().map(|l| l.id).collect();
    layer_history.retain_layers(&live);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn settings() -> EngineSettings {
        EngineSettings::default()
    }

    fn canvas_with_layer(color: [u8; 4]) -> (CanvasState, LayerId) {
        let mut canvas = CanvasState::new(100.0, 100.0);
        let layer = Layer::from_pixels("base", LayerKind::Asset, RgbaImage::from_pixel(4, 4, Rgba(color)), 96.0);
        let id = layer.id;
        canvas.layers.push(layer);
        (canvas, id)
    }

    fn paint(canvas: &mut CanvasState, id: LayerId, color: [u8; 4]) {
        let layer = canvas.layer_mut(id).unwrap();
        let buf = layer.ensure_mutable().unwrap();
        buf.put_pixel(0, 0, Rgba(color));
        layer.mark_raster_changed(32, 1000);
    }

    fn pixel(canvas: &CanvasState, id: LayerId) -> Rgba<u8> {
        *canvas.layer(id).unwrap().pixels().unwrap().get_pixel(0, 0)
    }

    #[test]
    fn restored_snapshot_keeps_full_resolution_behind_proxy() {
        let mut small = settings();
        small.max_display_size = 8;
        let full = Arc::new(RgbaImage::from_pixel(16, 16, Rgba([40, 50, 60, 255])));
        let mut layer = Layer::new("big", LayerKind::Mockup, None, LayerMetadata::with_dpi(96.0));
        layer.metadata.original_width = 16;
        layer.metadata.original_height = 16;
        layer.full_res = Some(Arc::clone(&full));
        layer.image = Some(LayerImage::Shared(Arc::new(RgbaImage::from_pixel(8, 8, Rgba([40, 50, 60, 255])))));

        let snap = LayerSnapshot::capture(&layer).unwrap();
        let pixels = snap.decode_pixels().unwrap();
        assert_eq!(pixels.as_ref().map(|p| p.dimensions()), Some((16, 16)));

        let mut restored = Layer::new("other", LayerKind::Asset, None, LayerMetadata::with_dpi(72.0));
        snap.apply_to(&mut restored, pixels, &small);
        assert_eq!(restored.full_res.as_ref().map(|f| f.dimensions()), Some((16, 16)));
        assert_eq!(restored.pixels().map(|p| p.dimensions()), Some((8, 8)));
        assert_eq!(restored.working_ratio(), (0.5, 0.5));
    }

    #[test]
    fn unchanged_layer_commits_nothing() {
        let (canvas, id) = canvas_with_layer([1, 2, 3, 255]);
        let mut store = LayerHistoryStore::default();
        let layer = canvas.layer(id).unwrap();
        let before = LayerSnapshot::capture(layer).unwrap();
        assert!(!store.commit(layer, &before, "Paint").unwrap());
        assert!(store.timeline(id).is_none());
    }

    #[test]
    fn first_commit_seeds_initial_entry() {
        let (mut canvas, id) = canvas_with_layer([1, 2, 3, 255]);
        let mut store = LayerHistoryStore::default();
        let before = LayerSnapshot::capture(canvas.layer(id).unwrap()).unwrap();
        paint(&mut canvas, id, [9, 9, 9, 255]);
        assert!(store.commit(canvas.layer(id).unwrap(), &before, "Paint").unwrap());

        let timeline = store.timeline(id).unwrap();
        let labels: Vec<_> = timeline.entries().iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec![INITIAL_LABEL, "Paint"]);
        assert_eq!(timeline.cursor(), 1);

        assert_eq!(store.undo(&mut canvas, id, &settings()).unwrap().as_deref(), Some("Paint"));
        assert_eq!(pixel(&canvas, id), Rgba([1, 2, 3, 255]));
        assert_eq!(store.redo(&mut canvas, id, &settings()).unwrap().as_deref(), Some("Paint"));
        assert_eq!(pixel(&canvas, id), Rgba([9, 9, 9, 255]));
    }

    #[test]
    fn commit_after_undo_drops_redo_branch() {
        let (mut canvas, id) = canvas_with_layer([0, 0, 0, 255]);
        let mut store = LayerHistoryStore::default();
        for c in [10u8, 20] {
            let before = LayerSnapshot::capture(canvas.layer(id).unwrap()).unwrap();
            paint(&mut canvas, id, [c, c, c, 255]);
            store.commit(canvas.layer(id).unwrap(), &before, "Paint").unwrap();
        }
        store.undo(&mut canvas, id, &settings()).unwrap();
        let before = LayerSnapshot::capture(canvas.layer(id).unwrap()).unwrap();
        paint(&mut canvas, id, [77, 77, 77, 255]);
        store.commit(canvas.layer(id).unwrap(), &before, "Fill").unwrap();

        let timeline = store.timeline(id).unwrap();
        assert_eq!(timeline.entries().len(), 3);
        assert!(!timeline.can_redo());
        assert_eq!(timeline.entries()[2].label, "Fill");
    }

    #[test]
    fn restore_bumps_version() {
        let (mut canvas, id) = canvas_with_layer([0, 0, 0, 255]);
        let mut store = LayerHistoryStore::default();
        let before = LayerSnapshot::capture(canvas.layer(id).unwrap()).unwrap();
        paint(&mut canvas, id, [5, 5, 5, 255]);
        store.commit(canvas.layer(id).unwrap(), &before, "Paint").unwrap();
        let v = canvas.layer(id).unwrap().version;
        store.undo(&mut canvas, id, &settings()).unwrap();
        assert!(canvas.layer(id).unwrap().version > v);
    }

    #[test]
    fn history_is_capped() {
        let (mut canvas, id) = canvas_with_layer([0, 0, 0, 255]);
        let mut store = LayerHistoryStore::new(3);
        for c in 1..=6u8 {
            let before = LayerSnapshot::capture(canvas.layer(id).unwrap()).unwrap();
            paint(&mut canvas, id, [c, 0, 0, 255]);
            store.commit(canvas.layer(id).unwrap(), &before, "Paint").unwrap();
        }
        let timeline = store.timeline(id).unwrap();
        assert_eq!(timeline.entries().len(), 3);
        assert_eq!(timeline.cursor(), 2);
    }

    #[test]
    fn document_undo_redo_round_trip() {
        let (mut canvas, first) = canvas_with_layer([1, 1, 1, 255]);
        let mut doc = DocumentHistory::default();
        let mut layers = LayerHistoryStore::default();

        doc.commit(&canvas, "Add Layer").unwrap();
        let second = Layer::from_pixels("top", LayerKind::Asset, RgbaImage::from_pixel(2, 2, Rgba([7, 7, 7, 255])), 96.0);
        let second_id = second.id;
        canvas.layers.push(second);
        canvas.selected = Some(second_id);

        let report = doc.undo(&mut canvas, &mut layers, &settings()).unwrap().unwrap();
        assert!(report.is_clean());
        assert_eq!(canvas.layers.len(), 1);
        assert_eq!(canvas.layers[0].id, first);
        assert_eq!(canvas.selected, None);
        assert!(doc.can_redo());

        doc.redo(&mut canvas, &mut layers, &settings()).unwrap().unwrap();
        assert_eq!(canvas.layers.len(), 2);
        assert_eq!(canvas.selected, Some(second_id));
        assert_eq!(pixel(&canvas, second_id), Rgba([7, 7, 7, 255]));
        assert!(!doc.can_redo());
    }

    #[test]
    fn broken_payload_is_reported_not_dropped() {
        let (canvas, id) = canvas_with_layer([1, 1, 1, 255]);
        let mut snapshot = DocumentSnapshot::capture(&canvas).unwrap();
        snapshot.layers[0].image = Some("data:image/png;base64,@@@".into());

        let mut target = CanvasState::new(10.0, 10.0);
        let mut layers = LayerHistoryStore::default();
        let report = restore_document(&snapshot, &mut target, &mut layers, &settings());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].layer_id, id);
        assert_eq!(target.layers.len(), 1);
        assert!(target.layers[0].is_pending());
        assert_eq!(target.workspace.document.width, 100.0);
    }
}
