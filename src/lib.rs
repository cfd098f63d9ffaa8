//! MockupFE editing engine.
//!
//! A layered raster-composition core: layers placed in a pannable/zoomable
//! world, rectangle / lasso / magic-wand selections, software paint and fill
//! operators, merge / duplicate / cut-out compositing, and two independent
//! undo timelines (per layer and whole document).
//!
//! Callers drive everything through [`project::Project`]; the free functions
//! under [`ops`] and [`components`] take their collaborators explicitly and
//! can be used on their own.

#![allow(clippy::too_many_arguments)]

#[macro_use]
pub mod logger;
pub mod canvas;
pub mod components;
pub mod error;
pub mod geometry;
pub mod io;
pub mod ops;
pub mod project;
pub mod settings;

pub use canvas::{CanvasState, Layer, LayerId, LayerKind};
pub use error::{DecodeError, SnapshotError};
pub use geometry::{BoundingBox, Point};
pub use project::Project;
pub use settings::EngineSettings;
