pub mod detection;
pub mod figure;
pub mod loaders;
pub mod panel;

pub use detection::{Detection, PanelLabelGuess, PanelMatch};
pub use figure::{Figure, ManuscriptStructure, TokenUsage};
pub use loaders::{load_detections, load_manuscript_structure, save_manuscript_structure};
pub use panel::{BBox, ConflictRecord, Panel};
