//! Per-cell quad catalogs
//!
//! The producer side turns external star catalogs into raw per-cell star files
//! ([extract]) and those into density-stratified quad catalogs ([build],
//! [writer]). At solve time catalogs are only read ([reader], [set]).

pub mod build;
pub mod extract;
pub mod format;
pub mod reader;
pub mod set;
pub mod writer;

pub use build::{build_catalog, build_cell_passes, catalog_file_name, BuildStats};
pub use extract::{extract_shards, parse_catalog_row, read_star_file, CellStreams, ExtractStats, RowLayout};
pub use format::{FieldValue, FileDescriptor, PassInfo, QuadRecord, StarRecord};
pub use reader::{CatalogReader, PassRecords};
pub use set::CatalogSet;
pub use writer::{CatalogWriter, PassData};
