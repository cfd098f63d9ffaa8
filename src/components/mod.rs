pub mod history;
pub mod selection;
