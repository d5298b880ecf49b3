//! Shared test utilities for the dap-client workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Sample DDS, DAS and DMR documents
//! - Hand-rolled XDR and DAP4 chunk generators
//! - Temporary file helpers for the file-opening paths
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{dods_response, COADS_DDS};
//! ```

pub mod fixtures;
pub mod generators;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;

use std::io::Write;
use std::path::PathBuf;

use tempfile::TempDir;

/// Writes `contents` to `name` inside a fresh temporary directory.
///
/// The directory is removed when the returned [`TempDir`] is dropped, so
/// keep it alive for as long as the path is used.
///
/// # Example
///
/// ```
/// use test_utils::write_temp_file;
///
/// let (_dir, path) = write_temp_file("sample.dds", b"Dataset { } x;");
/// assert!(path.exists());
/// ```
pub fn write_temp_file(name: &str, contents: &[u8]) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).expect("failed to create temp file");
    file.write_all(contents).expect("failed to write temp file");
    (dir, path)
}

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Element-wise approximate equality of two float slices.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_all_approx_eq;
///
/// assert_all_approx_eq!(&[1.0, 2.0001], &[1.0, 2.0], 0.001);
/// ```
#[macro_export]
macro_rules! assert_all_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left = $left;
        let right = $right;
        assert_eq!(left.len(), right.len(), "length mismatch");
        for (l, r) in left.iter().zip(right.iter()) {
            $crate::assert_approx_eq!(*l, *r, $epsilon);
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assert_approx_eq_passes() {
        assert_approx_eq!(1.0001, 1.0, 0.001);
        assert_approx_eq!(0.0, 0.0, 0.0001);
        assert_approx_eq!(-5.5, -5.500001, 0.0001);
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn test_assert_approx_eq_fails() {
        assert_approx_eq!(1.1, 1.0, 0.001);
    }

    #[test]
    fn test_assert_all_approx_eq() {
        assert_all_approx_eq!(vec![1.0, 2.0001], vec![1.0, 2.0], 0.001);
    }

    #[test]
    fn test_write_temp_file() {
        let (dir, path) = write_temp_file("coads.dds", COADS_DDS.as_bytes());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), COADS_DDS);
        drop(dir);
        assert!(!path.exists());
    }
}
