//! Storage name generation for DEPOT.
//!
//! Files are persisted under internally generated names decoupled from the
//! user-visible display name. A re-upload of the same display name gets a
//! fresh storage name, so readers of the previous version keep a valid file
//! until they finish.

use std::path::Path;

use uuid::Uuid;

/// Extract the file extension from a filename.
///
/// Returns "bin" if no extension is found.
fn extract_extension(filename: &str) -> &str {
    Path::new(filename)
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("bin")
}

/// Generate a new UUID-based storage name, preserving the display name's
/// extension.
pub fn generate_storage_name(display_name: &str) -> String {
    let uuid = Uuid::new_v4();
    let ext = extract_extension(display_name);
    format!("{uuid}.{ext}")
}

/// Generate a unique name for an in-flight upload in the scratch directory.
pub fn generate_temp_name() -> String {
    format!("{}.part", Uuid::new_v4())
}
