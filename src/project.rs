use std::collections::HashMap;
use std::time::{Duration, Instant};

use image::Rgba;
use uuid::Uuid;

use crate::canvas::{
    AdjustmentsPatch, CanvasState, Layer, LayerId, LayerKind, LayerMetadata, LayerProperties, ToolKind,
};
use crate::components::history::{DocumentHistory, HistoryEntry, LayerHistoryStore, LayerSnapshot, RestoreReport};
use crate::components::selection;
use crate::error::{DecodeError, SnapshotError};
use crate::geometry::Point;
use crate::io::{AssetResolver, DecodeLimits, DecodeOutcome, DecodeService, DecodeTicket, DecodedImage};
use crate::ops::canvas_ops;
use crate::ops::clipboard::{self, ClipboardContent};
use crate::ops::paint::{self, StrokeMode, StrokeStyle};
use crate::ops::transform::{self, FlipAxis};
use crate::settings::EngineSettings;

/// What the caller knows about a layer before its pixels are decoded.
#[derive(Clone, Debug)]
pub struct NewLayer {
    pub name: String,
    pub kind: LayerKind,
    pub source: Option<String>,
    /// Overrides the DPI found in the encoded bytes.
    pub dpi: Option<f64>,
    /// World position of the layer centre.  `None` centres it in the
    /// document (a mockup then also defines the document size) and frames it.
    pub initial_position: Option<Point>,
}

impl NewLayer {
    pub fn new(name: impl Into<String>, kind: LayerKind) -> Self {
        Self { name: name.into(), kind, source: None, dpi: None, initial_position: None }
    }

    pub fn at(mut self, position: Point) -> Self {
        self.initial_position = Some(position);
        self
    }
}

/// Result of one finished decode job.
#[derive(Debug)]
pub enum DecodeEvent {
    Added { ticket: DecodeTicket, layer_id: LayerId },
    Failed { ticket: DecodeTicket, name: String, error: DecodeError },
}

struct PendingLayer {
    layer: Layer,
    dpi_override: Option<f64>,
    initial_position: Option<Point>,
}

/// Single open document: the canvas, both undo timelines, the decode
/// service and the in-engine clipboard.  Every user intent is a method here.
pub struct Project {
    pub id: Uuid,
    /// Display name
    pub name: String,
    pub canvas: CanvasState,
    pub layer_history: LayerHistoryStore,
    pub document_history: DocumentHistory,
    pub settings: EngineSettings,
    pub is_dirty: bool,

    decoder: DecodeService,
    /// Layers whose decode has not reported yet; not part of the stack.
    pending: HashMap<DecodeTicket, PendingLayer>,
    clipboard: Option<ClipboardContent>,
    /// Pre-drag state of the layer being resized or rotated.
    pending_transform: Option<(LayerId, LayerSnapshot)>,
}

impl Project {
    pub fn new(name: impl Into<String>, width: f64, height: f64) -> Self {
        Self::with_settings(name, width, height, EngineSettings::default())
    }

    pub fn with_settings(name: impl Into<String>, width: f64, height: f64, settings: EngineSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            canvas: CanvasState::new(width, height),
            layer_history: LayerHistoryStore::new(settings.max_history_steps),
            document_history: DocumentHistory::new(settings.max_history_steps),
            settings,
            is_dirty: false,
            decoder: DecodeService::new(),
            pending: HashMap::new(),
            clipboard: None,
            pending_transform: None,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    pub fn display_title(&self) -> String {
        if self.is_dirty { format!("{}*", self.name) } else { self.name.clone() }
    }

    fn touched<T>(&mut self, result: Result<T, SnapshotError>, changed: impl Fn(&T) -> bool) -> Result<T, SnapshotError> {
        match &result {
            Ok(v) if changed(v) => self.is_dirty = true,
            Err(e) => {
                log_err!("history: {}", e);
            }
            _ => {}
        }
        result
    }

    // ========================================================================
    // ADDING LAYERS
    // ========================================================================

    /// Queue `bytes` for decoding.  The layer joins the stack only when the
    /// decode succeeds (see [`Project::poll_decodes`]).
    pub fn add_layer_from_bytes(&mut self, request: NewLayer, bytes: Vec<u8>) -> DecodeTicket {
        let metadata = LayerMetadata::with_dpi(request.dpi.unwrap_or(self.settings.default_dpi));
        let layer = Layer::new(request.name, request.kind, request.source, metadata);
        let ticket = self.decoder.submit(bytes, DecodeLimits::from(&self.settings));
        log_info!("decode: queued \"{}\" as ticket {}", layer.name, ticket.0);
        self.pending.insert(
            ticket,
            PendingLayer { layer, dpi_override: request.dpi, initial_position: request.initial_position },
        );
        ticket
    }

    /// Add a stored asset.  The asset lives in the `<kind>s` bucket; the
    /// resolved URL becomes the layer's source handle.
    pub fn add_asset_layer(
        &mut self,
        resolver: &dyn AssetResolver,
        name: impl Into<String>,
        kind: LayerKind,
        file_path: &str,
        bytes: Vec<u8>,
    ) -> DecodeTicket {
        let bucket = match kind {
            LayerKind::Mockup => "mockups",
            LayerKind::Asset => "assets",
            LayerKind::Pattern => "patterns",
        };
        let mut request = NewLayer::new(name, kind);
        request.source = Some(resolver.resolve(bucket, file_path));
        self.add_layer_from_bytes(request, bytes)
    }

    /// Layers still waiting on their decode.
    pub fn pending_layers(&self) -> usize {
        self.pending.len()
    }

    /// Collect every decode that already finished, without blocking.
    pub fn poll_decodes(&mut self) -> Vec<DecodeEvent> {
        let mut events = Vec::new();
        while let Some(outcome) = self.decoder.try_next() {
            if let Some(event) = self.finish_decode(outcome) {
                events.push(event);
            }
        }
        events
    }

    /// Block until every queued decode reported or `timeout` passed.
    pub fn wait_for_decodes(&mut self, timeout: Duration) -> Vec<DecodeEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();
        while !self.pending.is_empty() && Instant::now() < deadline {
            let Some(outcome) = self.decoder.wait_next(deadline) else { break };
            if let Some(event) = self.finish_decode(outcome) {
                events.push(event);
            }
        }
        events
    }

    fn finish_decode(&mut self, outcome: DecodeOutcome) -> Option<DecodeEvent> {
        let ticket = outcome.ticket();
        let pending = self.pending.remove(&ticket)?;
        match outcome {
            DecodeOutcome::Decoded { image, .. } => {
                let name = pending.layer.name.clone();
                match self.insert_decoded(pending, image) {
                    Ok(layer_id) => Some(DecodeEvent::Added { ticket, layer_id }),
                    Err(e) => {
                        log_err!("decode: could not add \"{}\": {}", name, e);
                        Some(DecodeEvent::Failed { ticket, name, error: DecodeError::Payload(e.to_string()) })
                    }
                }
            }
            DecodeOutcome::Failed { error, .. } => {
                log_err!("decode: \"{}\" failed: {}", pending.layer.name, error);
                Some(DecodeEvent::Failed { ticket, name: pending.layer.name, error })
            }
        }
    }

    fn insert_decoded(&mut self, pending: PendingLayer, image: DecodedImage) -> Result<LayerId, SnapshotError> {
        let PendingLayer { mut layer, dpi_override, initial_position } = pending;
        let (w, h) = (image.width as f64, image.height as f64);
        layer.attach_decoded(image, self.settings.thumbnail_size);
        if let Some(dpi) = dpi_override {
            layer.metadata.dpi = dpi;
        }

        self.document_history.commit(&self.canvas, "Add Layer")?;
        match initial_position {
            Some(p) => {
                layer.x = p.x;
                layer.y = p.y;
            }
            None => {
                if layer.kind == LayerKind::Mockup {
                    self.canvas.workspace.document.width = w;
                    self.canvas.workspace.document.height = h;
                }
                let doc = self.canvas.workspace.document;
                layer.x = doc.width / 2.0;
                layer.y = doc.height / 2.0;
            }
        }
        let id = canvas_ops::place_layer(&mut self.canvas, &mut self.layer_history, layer, None, "Add Layer")?;
        if initial_position.is_none() {
            self.canvas.frame_layer(id);
        }
        self.is_dirty = true;
        Ok(id)
    }

    // ========================================================================
    // LAYER STACK
    // ========================================================================

    pub fn select_layer(&mut self, id: Option<LayerId>) {
        self.canvas.select_layer(id);
    }

    pub fn delete_layer(&mut self, id: LayerId) -> Result<bool, SnapshotError> {
        let r = canvas_ops::delete_layer(&mut self.canvas, &mut self.document_history, &mut self.layer_history, id);
        if matches!(r, Ok(true)) && self.pending_transform.as_ref().is_some_and(|(p, _)| *p == id) {
            self.pending_transform = None;
        }
        self.touched(r, |c| *c)
    }

    pub fn move_layer(&mut self, from: usize, to: usize) -> Result<bool, SnapshotError> {
        let r = canvas_ops::move_layer(&mut self.canvas, &mut self.document_history, from, to);
        self.touched(r, |c| *c)
    }

    pub fn bring_forward(&mut self, id: LayerId) -> Result<bool, SnapshotError> {
        let r = canvas_ops::bring_forward(&mut self.canvas, &mut self.document_history, id);
        self.touched(r, |c| *c)
    }

    pub fn send_backward(&mut self, id: LayerId) -> Result<bool, SnapshotError> {
        let r = canvas_ops::send_backward(&mut self.canvas, &mut self.document_history, id);
        self.touched(r, |c| *c)
    }

    pub fn duplicate_layer(&mut self, id: LayerId) -> Result<Option<LayerId>, SnapshotError> {
        let r = canvas_ops::duplicate_layer(
            &mut self.canvas,
            &mut self.document_history,
            &mut self.layer_history,
            id,
            &self.settings,
        );
        self.touched(r, Option::is_some)
    }

    pub fn merge_down(&mut self, id: LayerId) -> Result<bool, SnapshotError> {
        let r = canvas_ops::merge_down(
            &mut self.canvas,
            &mut self.document_history,
            &mut self.layer_history,
            id,
            &self.settings,
        );
        self.touched(r, |c| *c)
    }

    pub fn resize_mockup(&mut self, width: f64, height: f64) -> Result<bool, SnapshotError> {
        let r = canvas_ops::resize_mockup(&mut self.canvas, &mut self.document_history, width, height);
        self.touched(r, |c| *c)
    }

    // ========================================================================
    // LAYER PROPERTIES & TRANSFORMS
    // ========================================================================

    pub fn set_layer_properties(&mut self, id: LayerId, props: &LayerProperties) -> Result<bool, SnapshotError> {
        let r = canvas_ops::set_layer_properties(&mut self.canvas, &mut self.layer_history, id, props);
        self.touched(r, |c| *c)
    }

    pub fn set_layer_adjustments(&mut self, id: LayerId, patch: &AdjustmentsPatch) -> Result<bool, SnapshotError> {
        let r = canvas_ops::set_layer_adjustments(&mut self.canvas, &mut self.layer_history, id, patch);
        self.touched(r, |c| *c)
    }

    pub fn flip_layer(&mut self, id: LayerId, axis: FlipAxis) -> Result<bool, SnapshotError> {
        let r = transform::flip_layer(&mut self.canvas, &mut self.layer_history, id, axis);
        self.touched(r, |c| *c)
    }

    pub fn rotate_layer_by(&mut self, id: LayerId, degrees: f64) -> Result<bool, SnapshotError> {
        let r = transform::rotate_layer_by(&mut self.canvas, &mut self.layer_history, id, degrees);
        self.touched(r, |c| *c)
    }

    /// Begin a resize drag; `mouse` is in screen space.
    pub fn start_layer_resize(&mut self, id: LayerId, mouse: Point) -> Result<bool, SnapshotError> {
        self.begin_transform(id)?;
        Ok(transform::start_layer_resize(&mut self.canvas, id, mouse))
    }

    pub fn update_layer_resize(&mut self, id: LayerId, mouse: Point) -> bool {
        transform::update_layer_resize(&mut self.canvas, id, mouse)
    }

    /// Begin a rotate drag; `angle` is the pointer angle around the layer centre.
    pub fn start_layer_rotation(&mut self, id: LayerId, angle: f64) -> Result<bool, SnapshotError> {
        self.begin_transform(id)?;
        Ok(transform::start_layer_rotation(&mut self.canvas, id, angle))
    }

    pub fn update_layer_rotation(&mut self, id: LayerId, angle: f64) -> bool {
        transform::update_layer_rotation(&mut self.canvas, id, angle)
    }

    fn begin_transform(&mut self, id: LayerId) -> Result<(), SnapshotError> {
        self.pending_transform = match self.canvas.layer(id) {
            Some(layer) => Some((id, LayerSnapshot::capture(layer)?)),
            None => None,
        };
        Ok(())
    }

    /// Finish a resize or rotate drag with one "Transform" entry.
    pub fn end_layer_transform(&mut self) -> Result<bool, SnapshotError> {
        let Some((id, before)) = self.pending_transform.take() else { return Ok(false) };
        let Some(layer) = self.canvas.layer(id) else { return Ok(false) };
        let r = self.layer_history.commit(layer, &before, "Transform");
        self.touched(r, |c| *c)
    }

    // ========================================================================
    // SELECTION
    // ========================================================================

    pub fn start_rect_selection(&mut self, p: Point) {
        selection::start_rect_selection(&mut self.canvas, p);
    }

    pub fn update_rect_selection(&mut self, p: Point) {
        selection::update_rect_selection(&mut self.canvas, p);
    }

    pub fn end_rect_selection(&mut self, p: Point) {
        selection::end_rect_selection(&mut self.canvas, p);
    }

    pub fn start_lasso(&mut self, p: Point) {
        selection::start_lasso(&mut self.canvas, p);
    }

    pub fn update_lasso(&mut self, p: Point) {
        selection::update_lasso(&mut self.canvas, p);
    }

    pub fn end_lasso(&mut self) {
        selection::end_lasso(&mut self.canvas);
    }

    /// Magic-wand select on the selected layer at world point `p`.
    pub fn magic_wand(&mut self, p: Point, accumulate: bool) -> bool {
        selection::magic_wand(&mut self.canvas, p, accumulate, &self.settings)
    }

    /// Recompute the selection's pixel and centimetre size from a world extent.
    pub fn update_selection_dims(&mut self, world_w: f64, world_h: f64) {
        selection::update_selection_dims(&mut self.canvas, world_w, world_h);
    }

    pub fn clear_selection(&mut self) {
        self.canvas.clear_selection();
    }

    pub fn selection_path(&self) -> Option<Vec<Point>> {
        self.canvas.selection.path()
    }

    // ========================================================================
    // CLIPBOARD & EXTRACTION
    // ========================================================================

    pub fn copy_selection(&mut self) -> bool {
        clipboard::copy_selection(&mut self.canvas, &mut self.clipboard)
    }

    pub fn has_clipboard(&self) -> bool {
        self.clipboard.is_some()
    }

    pub fn paste_selection(&mut self) -> Result<Option<LayerId>, SnapshotError> {
        let r = clipboard::paste_selection(
            &mut self.canvas,
            &mut self.document_history,
            &mut self.layer_history,
            self.clipboard.as_ref(),
            &self.settings,
        );
        self.touched(r, Option::is_some)
    }

    pub fn duplicate_selection(&mut self) -> Result<Option<LayerId>, SnapshotError> {
        let r = clipboard::duplicate_selection(
            &mut self.canvas,
            &mut self.document_history,
            &mut self.layer_history,
            &self.settings,
        );
        self.touched(r, Option::is_some)
    }

    pub fn cut_selection(&mut self) -> Result<Option<LayerId>, SnapshotError> {
        let r = clipboard::cut_selection(
            &mut self.canvas,
            &mut self.document_history,
            &mut self.layer_history,
            &self.settings,
        );
        self.touched(r, Option::is_some)
    }

    pub fn crop_to_selection(&mut self) -> Result<bool, SnapshotError> {
        let r = clipboard::crop_to_selection(&mut self.canvas, &mut self.layer_history, &self.settings);
        self.touched(r, |c| *c)
    }

    // ========================================================================
    // PAINT
    // ========================================================================

    /// Paint a stroke; `points` are in layer space.
    pub fn paint_stroke(&mut self, id: LayerId, points: &[Point], style: &StrokeStyle) -> Result<bool, SnapshotError> {
        let r = paint::stroke_layer(
            &mut self.canvas,
            &mut self.layer_history,
            id,
            points,
            style,
            StrokeMode::Paint,
            &self.settings,
        );
        self.touched(r, |c| *c)
    }

    /// Erase along a stroke; `points` are in layer space.
    pub fn erase_stroke(&mut self, id: LayerId, points: &[Point], width: f32, opacity: f32) -> Result<bool, SnapshotError> {
        let style = StrokeStyle { color: Rgba([0, 0, 0, 0]), width, opacity };
        let r = paint::stroke_layer(
            &mut self.canvas,
            &mut self.layer_history,
            id,
            points,
            &style,
            StrokeMode::Erase,
            &self.settings,
        );
        self.touched(r, |c| *c)
    }

    /// Bucket fill from a layer-space seed.
    pub fn bucket_fill(&mut self, id: LayerId, seed: Point, color: Rgba<u8>, opacity: f32) -> Result<bool, SnapshotError> {
        let r = paint::fill_layer(&mut self.canvas, &mut self.layer_history, id, seed, color, opacity, &self.settings);
        self.touched(r, |c| *c)
    }

    // ========================================================================
    // HISTORY
    // ========================================================================

    pub fn layer_history_entries(&self, id: LayerId) -> &[HistoryEntry] {
        self.layer_history.timeline(id).map(|t| t.entries()).unwrap_or(&[])
    }

    pub fn undo_layer(&mut self, id: LayerId) -> Result<Option<String>, SnapshotError> {
        let r = self.layer_history.undo(&mut self.canvas, id, &self.settings);
        self.touched(r, Option::is_some)
    }

    pub fn redo_layer(&mut self, id: LayerId) -> Result<Option<String>, SnapshotError> {
        let r = self.layer_history.redo(&mut self.canvas, id, &self.settings);
        self.touched(r, Option::is_some)
    }

    pub fn revert_layer_to(&mut self, id: LayerId, index: usize) -> Result<bool, SnapshotError> {
        let r = self.layer_history.revert_to(&mut self.canvas, id, index, &self.settings);
        self.touched(r, |c| *c)
    }

    pub fn undo_document(&mut self) -> Result<Option<RestoreReport>, SnapshotError> {
        let r = self.document_history.undo(&mut self.canvas, &mut self.layer_history, &self.settings);
        self.pending_transform = None;
        self.touched(r, Option::is_some)
    }

    pub fn redo_document(&mut self) -> Result<Option<RestoreReport>, SnapshotError> {
        let r = self.document_history.redo(&mut self.canvas, &mut self.layer_history, &self.settings);
        self.pending_transform = None;
        self.touched(r, Option::is_some)
    }

    pub fn revert_document_to(&mut self, index: usize) -> Result<RestoreReport, SnapshotError> {
        let r = self.document_history.revert_to(index, &mut self.canvas, &mut self.layer_history, &self.settings);
        self.pending_transform = None;
        self.touched(r, |_| true)
    }

    // ========================================================================
    // WORKSPACE
    // ========================================================================

    pub fn set_active_tool(&mut self, tool: ToolKind) {
        self.canvas.set_active_tool(tool);
    }

    pub fn toggle_view_mode(&mut self) {
        self.canvas.toggle_view_mode();
    }

    pub fn set_viewport(&mut self, width: f64, height: f64) {
        self.canvas.workspace.viewport = (width > 0.0 && height > 0.0).then_some((width, height));
    }

    pub fn frame_layer(&mut self, id: LayerId) {
        self.canvas.frame_layer(id);
    }

    pub fn screen_to_world(&self, p: Point) -> Point {
        self.canvas.workspace.screen_to_world(p)
    }

    pub fn world_to_screen(&self, p: Point) -> Point {
        self.canvas.workspace.world_to_screen(p)
    }
}
