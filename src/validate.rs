//! Image-root validation and blob-directory accounting, supplementing the
//! pipeline with the checks `original_source/.../_common.py` runs before
//! any mutating command touches an image directory.

use std::path::Path;

const OCI_LAYOUT_CONTENTS: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;

/// Returns true if `image_root` looks like a valid, already-initialized
/// OTA image directory: has an `oci-layout` sentinel with the expected
/// contents, an `index.json`, and a `blobs/sha256` resource directory.
pub fn check_if_valid_ota_image(image_root: &Path) -> bool {
    let oci_layout = image_root.join("oci-layout");
    let index_json = image_root.join("index.json");
    let resource_dir = image_root.join("blobs").join("sha256");

    let layout_ok = std::fs::read_to_string(&oci_layout)
        .map(|s| s.trim() == OCI_LAYOUT_CONTENTS)
        .unwrap_or(false);

    layout_ok && index_json.is_file() && resource_dir.is_dir()
}

/// Count blobs and total bytes directly in `dir` (non-recursive), skipping
/// reserved-prefix temp files.
pub fn count_blobs_in_dir(dir: &Path) -> std::io::Result<(u64, u64)> {
    let mut count = 0u64;
    let mut size = 0u64;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(".tmp-") {
            continue;
        }
        let meta = entry.metadata()?;
        if meta.is_file() {
            count += 1;
            size += meta.len();
        }
    }
    Ok((count, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_directory_missing_oci_layout() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!check_if_valid_ota_image(dir.path()));
    }

    #[test]
    fn accepts_well_formed_image_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("oci-layout"), OCI_LAYOUT_CONTENTS).unwrap();
        std::fs::write(dir.path().join("index.json"), "{}").unwrap();
        std::fs::create_dir_all(dir.path().join("blobs").join("sha256")).unwrap();
        assert!(check_if_valid_ota_image(dir.path()));
    }

    #[test]
    fn count_blobs_in_dir_skips_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc123"), b"hello").unwrap();
        std::fs::write(dir.path().join(".tmp-staging"), b"ignore me").unwrap();
        let (count, size) = count_blobs_in_dir(dir.path()).unwrap();
        assert_eq!(count, 1);
        assert_eq!(size, 5);
    }
}
