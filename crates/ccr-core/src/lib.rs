//! Foundational low-level utilities shared across ccr-console crates.
//!
//! Provides the atomic file-write helper used when the cluster configuration is
//! rewritten.

pub mod atomic_io;

pub use atomic_io::write_text_atomic;

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;

    use super::*;

    #[test]
    fn unit_write_text_atomic_writes_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("clusters.tf");
        write_text_atomic(&path, "variable \"clusters\" {}\n").expect("write");
        let contents = read_to_string(&path).expect("read");
        assert_eq!(contents, "variable \"clusters\" {}\n");
    }

    #[test]
    fn unit_write_text_atomic_replaces_existing_file_and_leaves_no_temp_files() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("clusters.tf");
        std::fs::write(&path, "old").expect("seed");
        write_text_atomic(&path, "new").expect("write");
        assert_eq!(read_to_string(&path).expect("read"), "new");
        let entries = std::fs::read_dir(tempdir.path())
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn regression_write_text_atomic_rejects_directory_destination() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let error = write_text_atomic(tempdir.path(), "data").expect_err("directory");
        assert!(error.to_string().contains("is a directory"));
    }
}
