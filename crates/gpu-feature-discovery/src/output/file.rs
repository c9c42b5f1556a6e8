use std::fs;
use std::io::Write;
use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use tempfile::NamedTempFile;

use super::OutputError;
use crate::lm::Labels;

/// Writes `labels` as sorted `key=value` lines.
///
/// The content goes to a temporary file in the target directory which is
/// then renamed over `path`, so readers never see a partial file.
pub fn write_labels(path: &Path, labels: &Labels) -> Result<(), Report<OutputError>> {
    let error = || OutputError::WriteFailed {
        path: path.to_path_buf(),
    };

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).change_context_lazy(error)?;

    let mut tmp = NamedTempFile::new_in(dir).change_context_lazy(error)?;
    tmp.write_all(labels.to_string().as_bytes())
        .change_context_lazy(error)?;
    tmp.flush().change_context_lazy(error)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))
            .change_context_lazy(error)?;
    }

    tmp.persist(path)
        .map_err(|e| e.error)
        .change_context_lazy(error)?;

    tracing::debug!("Wrote {} labels to {:?}", labels.len(), path);
    Ok(())
}

/// Removes the feature file. A missing file is not an error.
pub fn remove_labels(path: &Path) -> Result<(), Report<OutputError>> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Report::new(e).change_context(OutputError::RemoveFailed {
            path: path.to_path_buf(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use tempfile::tempdir;

    use super::*;

    fn labels() -> Labels {
        [
            ("nvidia.com/gpu.product", "NVIDIA-A100-SXM4-40GB"),
            ("nvidia.com/gpu.count", "8"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn write_sorted_lines() {
        let dir = tempdir().expect("should create temp dir");
        let path = dir.path().join("features.d").join("gfd");

        write_labels(&path, &labels()).expect("should write labels");

        let content = fs::read_to_string(&path).expect("should read output");
        assert_eq!(
            content,
            "nvidia.com/gpu.count=8\nnvidia.com/gpu.product=NVIDIA-A100-SXM4-40GB\n"
        );
    }

    #[test]
    fn overwrite_existing_file() {
        let dir = tempdir().expect("should create temp dir");
        let path = dir.path().join("gfd");
        fs::write(&path, "stale=1\n").expect("should seed file");

        write_labels(&path, &labels()).expect("should write labels");

        let content = fs::read_to_string(&path).expect("should read output");
        assert!(!content.contains("stale"));
        // only the target remains, no leftover temp files
        assert_eq!(fs::read_dir(dir.path()).expect("should list dir").count(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempdir().expect("should create temp dir");
        let path = dir.path().join("gfd");
        write_labels(&path, &labels()).expect("should write labels");

        remove_labels(&path).expect("should remove");
        assert!(!path.exists());
        remove_labels(&path).expect("missing file is fine");
    }
}
