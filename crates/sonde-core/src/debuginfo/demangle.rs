//! Symbol demangling and DWARF error mapping.
//!
//! - **Rust**: legacy (`_ZN...E`) and v0 (`_R...`) schemes via `rustc_demangle`
//! - **C**: left as is
//!
//! Itanium C++ names are not demangled; they are shown raw.

use rustc_demangle::try_demangle;

use crate::error::SondeError;

/// Demangled form of `raw`, or `None` if it is not a Rust symbol.
///
/// The trailing `::h<hash>` of legacy symbols is kept; lookups strip it
/// separately.
pub(crate) fn demangle(raw: &str) -> Option<String>
{
    if !(raw.starts_with("_R") || raw.starts_with("_ZN") || raw.starts_with("__ZN")) {
        return None;
    }
    try_demangle(raw).ok().map(|symbol| symbol.to_string())
}

/// Map a gimli error to a [`SondeError`] naming the object and what was being read.
///
/// Unknown versions and forms are a format mismatch, everything else is a
/// malformed image.
pub(crate) fn map_dwarf_error(object: &str, context: &str, err: gimli::Error) -> SondeError
{
    match err {
        gimli::Error::UnknownVersion(_) | gimli::Error::UnknownForm(_) => SondeError::UnsupportedDebugFormat {
            object: object.to_string(),
            reason: format!("{context}: {err}"),
        },
        _ => SondeError::MalformedImage {
            object: object.to_string(),
            reason: format!("{context}: {err}"),
        },
    }
}
