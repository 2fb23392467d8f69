//! npm package names.
//!
//! Scoped names (`@scope/name`) cannot be used as a single path component,
//! so on disk they are written as `scope__name`, the same convention
//! DefinitelyTyped uses for its `types/` directory.

const SCOPE_SEPARATOR: &str = "__";

/// Whether `name` is a scoped package name.
pub fn is_scoped(name: &str) -> bool {
    name.starts_with('@') && name.contains('/')
}

/// `@scope/name` → `scope__name`; other names are returned unchanged.
pub fn escape_package_name(name: &str) -> String {
    match name.strip_prefix('@').and_then(|rest| rest.split_once('/')) {
        Some((scope, package)) => format!("{scope}{SCOPE_SEPARATOR}{package}"),
        None => name.to_string(),
    }
}

/// `scope__name` → `@scope/name`; other names are returned unchanged.
pub fn unescape_package_name(name: &str) -> String {
    match name.split_once(SCOPE_SEPARATOR) {
        Some((scope, package)) => format!("@{scope}/{package}"),
        None => name.to_string(),
    }
}
