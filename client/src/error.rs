//! Error reporting helpers

use std::error::Error;
use std::fmt::Write;

/// Render an error followed by every error in its `source()` chain,
/// separated by `": "`.
pub fn error_chain(err: &(dyn Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let _ = write!(rendered, ": {}", cause);
        source = cause.source();
    }
    rendered
}
