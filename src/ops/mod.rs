pub mod canvas_ops;
pub mod clipboard;
pub mod flood;
pub mod paint;
pub mod transform;
