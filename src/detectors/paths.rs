//! Path taxonomy detectors.
//!
//! Pure case-insensitive substring matches against the full request path.

use crate::patterns::{ADMIN_PATHS, DOCS_PATHS, INTERNAL_PATHS, OPENAPI_PATHS};

fn matches_any(path: &str, taxonomy: &[&str]) -> bool {
    let path = path.to_lowercase();
    taxonomy.iter().any(|needle| path.contains(needle))
}

/// Documentation surface (`/docs`, `/swagger`, ...).
pub fn is_docs_path(path: &str) -> bool {
    matches_any(path, DOCS_PATHS)
}

/// Machine-readable schema surface (`/openapi.json`, `/api/schema`, ...).
pub fn is_openapi_path(path: &str) -> bool {
    matches_any(path, OPENAPI_PATHS)
}

/// Administrative surface (`/admin`, `/dashboard`, ...).
pub fn is_admin_path(path: &str) -> bool {
    matches_any(path, ADMIN_PATHS)
}

/// Internal/dangerous surface (`/shell`, `/.env`, ...).
pub fn is_internal_path(path: &str) -> bool {
    matches_any(path, INTERNAL_PATHS)
}
