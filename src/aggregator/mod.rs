/// Path and message normalization, signatures
pub mod normalize;

/// Error classification and status precedence
pub mod classifier;

/// Within-run grouping by signature
pub mod error_groups;

pub use classifier::{extract_status, is_error, ErrorKey, StatusSource};
pub use error_groups::{ErrorAggregator, ErrorGroup};
pub use normalize::{extract_pattern, normalize_path, signature};
