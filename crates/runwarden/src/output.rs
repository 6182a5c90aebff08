//! Output formats.

pub(crate) mod json;
pub(crate) mod oneline;
pub(crate) mod plain;
pub(crate) mod sarif;
