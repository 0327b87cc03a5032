//! End-to-end tests that cross module boundaries. Unit tests live next to
//! the code they cover.

mod fixtures;
mod sandbox;
pub(crate) mod utils;
