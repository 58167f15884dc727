//! Parquet I/O for calcium-imaging datasets.
//!
//! A dataset is one Parquet file holding one row per ROI: the raw
//! fluorescence trace and its binary spike labels. Dataset attributes
//! (at minimum `name`) live in the Arrow schema metadata.

pub mod error;
pub mod reader;
pub mod synthetic;
pub mod types;
pub mod writer;

pub use error::DatasetError;
pub use reader::{normalize_traces, DatasetReader};
pub use types::{Dataset, DatasetAttrs, DatasetSummary, RoiRecord};
pub use writer::DatasetWriter;
