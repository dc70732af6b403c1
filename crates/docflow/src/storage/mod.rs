//! Shared filesystem layout

mod layout;

pub use layout::{
    encode_query, encode_segment, ensure_component, first_file, StorageLayout, GENERATED_SCHEMA_DIR, OUTPUT_DIR,
    SAVED_SCHEMA_DIR, SAVE_DIR, UPLOAD_DIR,
};
