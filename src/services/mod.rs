pub mod caption_matcher;
pub mod detection_source;
pub mod label_allocator;
pub mod llm_service;
pub mod reconciler;

pub use caption_matcher::{parse_panel_response, CaptionMatcher, LlmCaptionMatcher};
pub use detection_source::{DetectionSource, JsonDetectionSource};
pub use label_allocator::{next_label, UsedLabels, UNKNOWN_LABEL};
pub use llm_service::LlmService;
pub use reconciler::{reconcile, ConflictPolicy, PanelReconciler, ReconcileOptions, Reconciliation};
