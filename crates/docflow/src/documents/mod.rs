//! Documents: task directories, their sidecars, parsed results and exports

pub mod blocks;
mod export;
mod metadata;
mod registry;
mod resources;
mod results;

pub use blocks::{parse_block, Block, BlockResolver, BlockStats, DetailItem, DocumentDetails};
pub use export::{ExportContent, ExportFormat, ExportItem, ExportOutcome, ExportRequest, Exporter, EXPORT_DIR};
pub use metadata::{read_metadata, write_metadata, DocumentMetadata, ElementCounts, METADATA_FILE};
pub use registry::{
    format_size, remove_dir_if_exists, scan_docx_files, sort_task_ids, DocumentRegistry,
    DocumentStatistics, DocumentStatus, DocumentSummary, RenameOutcome, PARSED_MARKER_SUFFIX,
};
pub use resources::{list_resources, ResourceEntry, TaskResources, ROOT_GROUP};
pub use results::{load_result, locate_result, sync_metadata, MissingResult, ParsedResult};
