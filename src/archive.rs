//! Tar packaging of the work directory for upload into a container.
//!
//! The engine's archive endpoint consumes a tar stream. Whether the
//! directory itself or only its contents are packaged follows the trailing
//! separator of the path as the user typed it: `dir/` and `dir/.` copy
//! contents, `dir` copies the directory.

use std::io;
use std::path::Path;

/// True when the raw path ends in a separator or a `.` component, meaning
/// the directory's contents are copied rather than the directory itself.
pub fn copies_contents(raw: &str) -> bool {
    raw == "." || raw.ends_with('/') || raw.ends_with("/.")
}

/// Package `dir` as a tar archive for the engine's archive-upload endpoint.
pub fn tar_work_dir(dir: &Path, contents_only: bool) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);

    if contents_only {
        builder.append_dir_all(".", dir)?;
    } else {
        let name = dir
            .file_name()
            .map(Path::new)
            .unwrap_or_else(|| Path::new("."));
        builder.append_dir_all(name, dir)?;
    }

    builder.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_paths(archive: &[u8]) -> Vec<String> {
        let mut archive = tar::Archive::new(archive);
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect()
    }

    #[test]
    fn trailing_separator_semantics() {
        assert!(copies_contents("."));
        assert!(copies_contents("./"));
        assert!(copies_contents("/tmp/foo/"));
        assert!(copies_contents("/tmp/foo/."));
        assert!(!copies_contents("/tmp/foo"));
        assert!(!copies_contents("foo"));
    }

    #[test]
    fn contents_mode_puts_files_at_archive_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();

        let archive = tar_work_dir(dir.path(), true).unwrap();
        let paths = entry_paths(&archive);

        assert!(
            paths.iter().any(|p| p.ends_with("a.txt") && !p.contains("tmp")),
            "expected a.txt at archive root, got {:?}",
            paths
        );
    }

    #[test]
    fn directory_mode_nests_files_under_the_directory_name() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("project");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("a.txt"), "hi").unwrap();

        let archive = tar_work_dir(&sub, false).unwrap();
        let paths = entry_paths(&archive);

        assert!(
            paths.iter().any(|p| p.ends_with("project/a.txt")),
            "expected project/a.txt, got {:?}",
            paths
        );
    }
}
