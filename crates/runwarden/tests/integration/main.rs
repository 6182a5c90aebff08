/// Helpers.
mod common;
/// Command line surface tests.
mod cli;
/// Configuration discovery tests.
mod config;
/// End-to-end scans of the fixtures under `test-data/`.
mod scan;
