pub mod json_loader;

pub use json_loader::{load_detections, load_manuscript_structure, save_manuscript_structure};
