use std::sync::Arc;

use image::{imageops, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::{self, BoundingBox, LayerTransform, Point};
use crate::io::DecodedImage;

pub type LayerId = Uuid;

/// Smallest scale an interactive resize may produce.
pub const MIN_LAYER_SCALE: f64 = 0.01;

// ============================================================================
// LAYER DATA
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Mockup,
    Asset,
    Pattern,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerMetadata {
    /// Native width in the layer's own pixel space (0 until decoded).
    pub original_width: u32,
    /// Native height in the layer's own pixel space (0 until decoded).
    pub original_height: u32,
    pub dpi: f64,
}

impl LayerMetadata {
    pub fn with_dpi(dpi: f64) -> Self {
        Self { original_width: 0, original_height: 0, dpi }
    }
}

/// Non-destructive adjustment record, applied at render time.
/// Percentages follow CSS filter conventions (100 = unchanged for
/// saturate / contrast / brightness, 0 = unchanged for the rest).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Adjustments {
    pub grayscale: f32,
    pub sepia: f32,
    pub saturate: f32,
    pub contrast: f32,
    pub brightness: f32,
    pub invert: f32,
    pub flip_h: bool,
    pub flip_v: bool,
}

impl Default for Adjustments {
    fn default() -> Self {
        Self {
            grayscale: 0.0,
            sepia: 0.0,
            saturate: 100.0,
            contrast: 100.0,
            brightness: 100.0,
            invert: 0.0,
            flip_h: false,
            flip_v: false,
        }
    }
}

/// Partial update for [`Adjustments`]; `None` fields are left alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct AdjustmentsPatch {
    pub grayscale: Option<f32>,
    pub sepia: Option<f32>,
    pub saturate: Option<f32>,
    pub contrast: Option<f32>,
    pub brightness: Option<f32>,
    pub invert: Option<f32>,
    pub flip_h: Option<bool>,
    pub flip_v: Option<bool>,
}

impl Adjustments {
    pub fn merge(&mut self, patch: &AdjustmentsPatch) {
        if let Some(v) = patch.grayscale { self.grayscale = v; }
        if let Some(v) = patch.sepia { self.sepia = v; }
        if let Some(v) = patch.saturate { self.saturate = v; }
        if let Some(v) = patch.contrast { self.contrast = v; }
        if let Some(v) = patch.brightness { self.brightness = v; }
        if let Some(v) = patch.invert { self.invert = v; }
        if let Some(v) = patch.flip_h { self.flip_h = v; }
        if let Some(v) = patch.flip_v { self.flip_v = v; }
    }

    /// True when the colour part of the record leaves pixels untouched.
    pub fn is_color_identity(&self) -> bool {
        self.grayscale == 0.0
            && self.sepia == 0.0
            && self.saturate == 100.0
            && self.contrast == 100.0
            && self.brightness == 100.0
            && self.invert == 0.0
    }

    /// Bake the colour adjustments into one pixel.  Alpha is untouched.
    /// Filters run in CSS order: grayscale, sepia, saturate, contrast,
    /// brightness, invert.
    pub fn apply(&self, px: Rgba<u8>) -> Rgba<u8> {
        if self.is_color_identity() {
            return px;
        }
        let mut c = [px[0] as f32 / 255.0, px[1] as f32 / 255.0, px[2] as f32 / 255.0];

        let clamp3 = |c: &mut [f32; 3]| {
            for v in c.iter_mut() {
                *v = v.clamp(0.0, 1.0);
            }
        };
        let matrix = |c: [f32; 3], m: [[f32; 3]; 3]| -> [f32; 3] {
            [
                m[0][0] * c[0] + m[0][1] * c[1] + m[0][2] * c[2],
                m[1][0] * c[0] + m[1][1] * c[1] + m[1][2] * c[2],
                m[2][0] * c[0] + m[2][1] * c[1] + m[2][2] * c[2],
            ]
        };

        if self.grayscale > 0.0 {
            let k = 1.0 - (self.grayscale / 100.0).clamp(0.0, 1.0);
            c = matrix(c, [
                [0.2126 + 0.7874 * k, 0.7152 - 0.7152 * k, 0.0722 - 0.0722 * k],
                [0.2126 - 0.2126 * k, 0.7152 + 0.2848 * k, 0.0722 - 0.0722 * k],
                [0.2126 - 0.2126 * k, 0.7152 - 0.7152 * k, 0.0722 + 0.9278 * k],
            ]);
            clamp3(&mut c);
        }
        if self.sepia > 0.0 {
            let k = 1.0 - (self.sepia / 100.0).clamp(0.0, 1.0);
            c = matrix(c, [
                [0.393 + 0.607 * k, 0.769 - 0.769 * k, 0.189 - 0.189 * k],
                [0.349 - 0.349 * k, 0.686 + 0.314 * k, 0.168 - 0.168 * k],
                [0.272 - 0.272 * k, 0.534 - 0.534 * k, 0.131 + 0.869 * k],
            ]);
            clamp3(&mut c);
        }
        if self.saturate != 100.0 {
            let s = (self.saturate / 100.0).max(0.0);
            c = matrix(c, [
                [0.213 + 0.787 * s, 0.715 - 0.715 * s, 0.072 - 0.072 * s],
                [0.213 - 0.213 * s, 0.715 + 0.285 * s, 0.072 - 0.072 * s],
                [0.213 - 0.213 * s, 0.715 - 0.715 * s, 0.072 + 0.928 * s],
            ]);
            clamp3(&mut c);
        }
        if self.contrast != 100.0 {
            let k = (self.contrast / 100.0).max(0.0);
            for v in c.iter_mut() {
                *v = (*v - 0.5) * k + 0.5;
            }
            clamp3(&mut c);
        }
        if self.brightness != 100.0 {
            let k = (self.brightness / 100.0).max(0.0);
            for v in c.iter_mut() {
                *v *= k;
            }
            clamp3(&mut c);
        }
        if self.invert > 0.0 {
            let k = (self.invert / 100.0).clamp(0.0, 1.0);
            for v in c.iter_mut() {
                *v = *v * (1.0 - k) + (1.0 - *v) * k;
            }
        }

        Rgba([
            (c[0] * 255.0).round().clamp(0.0, 255.0) as u8,
            (c[1] * 255.0).round().clamp(0.0, 255.0) as u8,
            (c[2] * 255.0).round().clamp(0.0, 255.0) as u8,
            px[3],
        ])
    }
}

/// Partial update for a layer's placement and display flags.
#[derive(Clone, Debug, Default)]
pub struct LayerProperties {
    pub name: Option<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub scale: Option<f64>,
    pub rotation: Option<f64>,
    pub visible: Option<bool>,
    pub opacity: Option<f32>,
}

/// A layer's working pixels: either a read-only decoded handle shared with
/// other buffers, or a buffer this layer owns and may mutate.
#[derive(Clone, Debug)]
pub enum LayerImage {
    Shared(Arc<RgbaImage>),
    Owned(RgbaImage),
}

impl LayerImage {
    pub fn image(&self) -> &RgbaImage {
        match self {
            LayerImage::Shared(img) => img,
            LayerImage::Owned(img) => img,
        }
    }

    pub fn width(&self) -> u32 {
        self.image().width()
    }

    pub fn height(&self) -> u32 {
        self.image().height()
    }

    pub fn is_mutable(&self) -> bool {
        matches!(self, LayerImage::Owned(_))
    }
}

#[derive(Clone, Debug)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub kind: LayerKind,
    pub visible: bool,
    pub opacity: f32,
    /// Working-resolution pixels (`None` while the decode is pending).
    pub image: Option<LayerImage>,
    /// Full-resolution backing pixels, when distinct from or shared with `image`.
    pub full_res: Option<Arc<RgbaImage>>,
    /// Small proxy used while dragging.
    pub low_res_proxy: Option<Arc<RgbaImage>>,
    /// Opaque source handle (resolved asset URL, file name, …).
    pub source: Option<String>,
    pub x: f64,
    pub y: f64,
    pub scale: f64,
    pub rotation: f64,
    pub metadata: LayerMetadata,
    pub adjustments: Adjustments,
    /// Bumped on every raster mutation; renderers key caches on it.
    pub version: u64,
    pub thumbnail: Option<Arc<RgbaImage>>,
}

impl Layer {
    pub fn new(name: impl Into<String>, kind: LayerKind, source: Option<String>, metadata: LayerMetadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            visible: true,
            opacity: 1.0,
            image: None,
            full_res: None,
            low_res_proxy: None,
            source,
            x: 0.0,
            y: 0.0,
            scale: 1.0,
            rotation: 0.0,
            metadata: LayerMetadata { original_width: 0, original_height: 0, ..metadata },
            adjustments: Adjustments::default(),
            version: 0,
            thumbnail: None,
        }
    }

    /// Build a layer directly from pixels this engine produced (cut-outs,
    /// merges).  The buffer is owned and immediately mutable.
    pub fn from_pixels(name: impl Into<String>, kind: LayerKind, pixels: RgbaImage, dpi: f64) -> Self {
        let mut layer = Self::new(name, kind, None, LayerMetadata::with_dpi(dpi));
        layer.metadata.original_width = pixels.width();
        layer.metadata.original_height = pixels.height();
        layer.image = Some(LayerImage::Owned(pixels));
        layer
    }

    /// Populate the buffers once the decode service reports success.
    pub fn attach_decoded(&mut self, decoded: DecodedImage, thumbnail_size: u32) {
        let working = decoded.display_proxy.clone().unwrap_or_else(|| Arc::clone(&decoded.full));
        self.image = Some(LayerImage::Shared(working));
        self.full_res = Some(decoded.full);
        self.low_res_proxy = decoded.interaction_proxy;
        self.metadata.original_width = decoded.width;
        self.metadata.original_height = decoded.height;
        self.metadata.dpi = decoded.dpi;
        self.refresh_thumbnail(thumbnail_size);
    }

    pub fn is_pending(&self) -> bool {
        self.image.is_none()
    }

    pub fn pixels(&self) -> Option<&RgbaImage> {
        self.image.as_ref().map(LayerImage::image)
    }

    /// The highest-resolution pixels available.
    pub fn best_pixels(&self) -> Option<&RgbaImage> {
        match &self.full_res {
            Some(full) => Some(full.as_ref()),
            None => self.pixels(),
        }
    }

    /// Replace a shared handle with an owned copy so it can be mutated.
    /// Returns `None` while the layer has no pixels yet.
    pub fn ensure_mutable(&mut self) -> Option<&mut RgbaImage> {
        if let Some(LayerImage::Shared(shared)) = &self.image {
            let owned = RgbaImage::clone(shared);
            self.image = Some(LayerImage::Owned(owned));
        }
        match &mut self.image {
            Some(LayerImage::Owned(img)) => Some(img),
            _ => None,
        }
    }

    pub fn transform(&self) -> LayerTransform {
        LayerTransform {
            x: self.x,
            y: self.y,
            scale: self.scale,
            rotation: self.rotation,
            width: self.metadata.original_width as f64,
            height: self.metadata.original_height as f64,
        }
    }

    pub fn world_to_layer(&self, p: Point) -> Point {
        geometry::world_to_layer(p, &self.transform())
    }

    pub fn layer_to_world(&self, p: Point) -> Point {
        geometry::layer_to_world(p, &self.transform())
    }

    /// World-space axis-aligned bounds; `None` while pending.
    pub fn world_bounds(&self) -> Option<BoundingBox> {
        if self.metadata.original_width == 0 || self.metadata.original_height == 0 {
            return None;
        }
        BoundingBox::from_points(&geometry::world_corners(&self.transform()))
    }

    /// Working-buffer pixels per layer-space unit on each axis.  Below 1.0
    /// when the working buffer is a downscaled display proxy.
    pub fn working_ratio(&self) -> (f64, f64) {
        match self.pixels() {
            Some(img) if self.metadata.original_width > 0 && self.metadata.original_height > 0 => (
                img.width() as f64 / self.metadata.original_width as f64,
                img.height() as f64 / self.metadata.original_height as f64,
            ),
            _ => (1.0, 1.0),
        }
    }

    pub fn set_properties(&mut self, props: &LayerProperties) {
        if let Some(name) = &props.name { self.name = name.clone(); }
        if let Some(x) = props.x { self.x = x; }
        if let Some(y) = props.y { self.y = y; }
        if let Some(scale) = props.scale
            && scale.is_finite()
        {
            self.scale = scale.max(MIN_LAYER_SCALE);
        }
        if let Some(rotation) = props.rotation { self.rotation = rotation; }
        if let Some(visible) = props.visible { self.visible = visible; }
        if let Some(opacity) = props.opacity { self.opacity = opacity.clamp(0.0, 1.0); }
    }

    pub fn set_adjustments(&mut self, patch: &AdjustmentsPatch) {
        self.adjustments.merge(patch);
    }

    /// Bookkeeping after the working buffer changed: bump the version, drop
    /// the now-stale full-resolution copy, rebuild the proxy and thumbnail.
    pub fn mark_raster_changed(&mut self, thumbnail_size: u32, low_res_size: u32) {
        self.version += 1;
        self.full_res = None;
        if self.low_res_proxy.is_some() {
            self.low_res_proxy = self
                .pixels()
                .and_then(|img| downscale_to_fit(img, low_res_size, imageops::FilterType::Triangle))
                .map(Arc::new);
        }
        self.refresh_thumbnail(thumbnail_size);
    }

    /// Regenerate the thumbnail from the working buffer.  Never a history event.
    pub fn refresh_thumbnail(&mut self, max_edge: u32) {
        self.thumbnail = self.pixels().map(|img| {
            let thumb = downscale_to_fit(img, max_edge, imageops::FilterType::Triangle)
                .unwrap_or_else(|| img.clone());
            Arc::new(thumb)
        });
    }
}

/// Size that fits `(w, h)` inside a `max_edge` square keeping the aspect
/// ratio, or `None` when it already fits.
pub fn fit_within(w: u32, h: u32, max_edge: u32) -> Option<(u32, u32)> {
    if w <= max_edge && h <= max_edge {
        return None;
    }
    let ratio = (max_edge as f64 / w as f64).min(max_edge as f64 / h as f64);
    Some((
        ((w as f64 * ratio).round() as u32).max(1),
        ((h as f64 * ratio).round() as u32).max(1),
    ))
}

/// Downscaled copy bounded by `max_edge`, or `None` when no scaling is needed.
pub fn downscale_to_fit(img: &RgbaImage, max_edge: u32, filter: imageops::FilterType) -> Option<RgbaImage> {
    let (nw, nh) = fit_within(img.width(), img.height(), max_edge)?;
    Some(imageops::resize(img, nw, nh, filter))
}

/// Source-over compositing of `src` (scaled by `opacity`) onto `dst`.
pub fn blend_over(dst: Rgba<u8>, src: Rgba<u8>, opacity: f32) -> Rgba<u8> {
    let sa = src[3] as f32 / 255.0 * opacity.clamp(0.0, 1.0);
    if sa <= 0.0 {
        return dst;
    }
    if sa >= 1.0 || dst[3] == 0 {
        return Rgba([src[0], src[1], src[2], (sa * 255.0).round() as u8]);
    }
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    let inv = 1.0 / out_a;
    let mix = |s: u8, d: u8| -> u8 {
        ((s as f32 * sa + d as f32 * da * (1.0 - sa)) * inv).round().clamp(0.0, 255.0) as u8
    };
    Rgba([
        mix(src[0], dst[0]),
        mix(src[1], dst[1]),
        mix(src[2], dst[2]),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

// ============================================================================
// SELECTION STATE
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct RectSelection {
    /// A drag is in progress.
    pub dragging: bool,
    pub start: Point,
    pub end: Point,
    pub width: f64,
    pub height: f64,
}

impl RectSelection {
    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.start.x, self.start.y),
            Point::new(self.end.x, self.start.y),
            Point::new(self.end.x, self.end.y),
            Point::new(self.start.x, self.end.y),
        ]
    }
}

/// Freehand or wand-derived polygon in world space.
#[derive(Clone, Debug, Default)]
pub struct LassoPath {
    /// Freehand drawing is in progress.
    pub drawing: bool,
    pub points: Vec<Point>,
    pub bounds: Option<BoundingBox>,
}

/// Per-pixel flood-fill result kept while the user adds more wand regions.
#[derive(Clone, Debug)]
pub struct WandMask {
    pub layer_id: LayerId,
    pub reference: [u8; 3],
    pub width: u32,
    pub height: u32,
    pub mask: Vec<bool>,
    /// One world-space ring per selected region, without joining bridges.
    pub outlines: Vec<Vec<Point>>,
}

/// Selection size in layer pixels and physical centimetres.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SelectionDims {
    pub px_w: f64,
    pub px_h: f64,
    pub cm_w: f64,
    pub cm_h: f64,
}

#[derive(Clone, Debug, Default)]
pub struct Selection {
    pub rect: RectSelection,
    pub lasso: LassoPath,
    pub wand: Option<WandMask>,
    pub dims: SelectionDims,
}

impl Selection {
    pub fn is_active(&self) -> bool {
        self.lasso.points.len() > 2 || self.rect.width > 0.0
    }

    /// The selected region as a closed polygon in world space.
    pub fn path(&self) -> Option<Vec<Point>> {
        if self.lasso.points.len() > 2 {
            Some(self.lasso.points.clone())
        } else if self.rect.width > 0.0 {
            Some(self.rect.corners().to_vec())
        } else {
            None
        }
    }

    /// Closed rings to draw: one per wand region, else the single path.
    pub fn outlines(&self) -> Vec<Vec<Point>> {
        match &self.wand {
            Some(wand) if !wand.outlines.is_empty() => wand.outlines.clone(),
            _ => self.path().into_iter().collect(),
        }
    }

    pub fn clear(&mut self) {
        *self = Selection::default();
    }
}

// ============================================================================
// WORKSPACE
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Edit,
    Preview,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ToolKind {
    #[default]
    Move,
    RectSelect,
    Lasso,
    MagicWand,
    Brush,
    Eraser,
    Fill,
}

impl ToolKind {
    pub fn is_selection_tool(self) -> bool {
        matches!(self, ToolKind::RectSelect | ToolKind::Lasso | ToolKind::MagicWand)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentSize {
    pub width: f64,
    pub height: f64,
}

/// Anchors captured when an interactive resize / rotate drag begins.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransformAnchor {
    pub scale: f64,
    pub rotation: f64,
    pub layer_rotation: f64,
    pub mouse: Point,
    pub layer_center: Point,
}

#[derive(Clone, Debug)]
pub struct Workspace {
    pub pan: Point,
    pub zoom: f64,
    pub view_mode: ViewMode,
    pub document: DocumentSize,
    /// Size of the host drawing surface in screen pixels, when known.
    pub viewport: Option<(f64, f64)>,
    /// Where the selection context menu is shown, if it is.
    pub selection_menu: Option<Point>,
    pub transform_start: TransformAnchor,
    pub active_tool: ToolKind,
}

impl Workspace {
    pub fn new(document_width: f64, document_height: f64) -> Self {
        Self {
            pan: Point::default(),
            zoom: 1.0,
            view_mode: ViewMode::Edit,
            document: DocumentSize { width: document_width, height: document_height },
            viewport: None,
            selection_menu: None,
            transform_start: TransformAnchor::default(),
            active_tool: ToolKind::Move,
        }
    }

    pub fn screen_to_world(&self, p: Point) -> Point {
        Point::new((p.x - self.pan.x) / self.zoom, (p.y - self.pan.y) / self.zoom)
    }

    pub fn world_to_screen(&self, p: Point) -> Point {
        Point::new(p.x * self.zoom + self.pan.x, p.y * self.zoom + self.pan.y)
    }
}

// ============================================================================
// CANVAS STATE
// ============================================================================

/// Everything the engine edits: the ordered layer stack (last = top), the
/// selected layer, the workspace and the transient selection.
#[derive(Clone, Debug)]
pub struct CanvasState {
    pub layers: Vec<Layer>,
    pub selected: Option<LayerId>,
    pub workspace: Workspace,
    pub selection: Selection,
}

impl CanvasState {
    pub fn new(document_width: f64, document_height: f64) -> Self {
        Self {
            layers: Vec::new(),
            selected: None,
            workspace: Workspace::new(document_width, document_height),
            selection: Selection::default(),
        }
    }

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    pub fn selected_layer(&self) -> Option<&Layer> {
        self.selected.and_then(|id| self.layer(id))
    }

    /// The first visible mockup layer.
    pub fn mockup_layer(&self) -> Option<&Layer> {
        self.layers.iter().find(|l| l.kind == LayerKind::Mockup && l.visible)
    }

    /// Selecting an unknown id is ignored.
    pub fn select_layer(&mut self, id: Option<LayerId>) {
        match id {
            Some(id) if self.index_of(id).is_none() => {}
            other => self.selected = other,
        }
    }

    pub fn set_active_tool(&mut self, tool: ToolKind) {
        self.workspace.active_tool = tool;
        if !tool.is_selection_tool() {
            self.clear_selection();
        }
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
        self.workspace.selection_menu = None;
    }

    /// Fit a layer into the viewport (80 % padding, zoom capped at 2×).
    pub fn frame_layer(&mut self, id: LayerId) {
        let Some((vw, vh)) = self.workspace.viewport else { return };
        let Some(layer) = self.layer(id) else { return };
        if layer.metadata.original_width == 0 || vw <= 0.0 || vh <= 0.0 {
            return;
        }
        let padding = 0.8;
        let lw = layer.metadata.original_width as f64 * layer.scale;
        let lh = layer.metadata.original_height as f64 * layer.scale;
        let zoom = ((vw * padding) / lw).min((vh * padding) / lh).min(2.0);
        let (lx, ly) = (layer.x, layer.y);
        self.workspace.zoom = zoom;
        self.workspace.pan = Point::new(vw / 2.0 - lx * zoom, vh / 2.0 - ly * zoom);
    }

    pub fn toggle_view_mode(&mut self) {
        self.workspace.view_mode = match self.workspace.view_mode {
            ViewMode::Edit => ViewMode::Preview,
            ViewMode::Preview => ViewMode::Edit,
        };
        if self.workspace.view_mode == ViewMode::Edit
            && let Some(id) = self.selected
        {
            self.frame_layer(id);
        }
    }
}
