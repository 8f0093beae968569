use std::path::{Path, PathBuf};

pub mod csv_table;

/// Resolves `file_path` against `base_dir` unless it is absolute or explicitly relative to the
/// working directory (`./...`).
pub fn resolve_path(base_dir: &Path, file_path: &Path) -> PathBuf {
    if file_path.is_absolute() || file_path.starts_with("./") {
        return file_path.to_path_buf();
    }
    base_dir.join(file_path)
}

#[cfg(test)]
mod tests {
    use super::resolve_path;
    use std::path::{Path, PathBuf};

    #[test]
    fn relative_paths_are_joined() {
        assert_eq!(
            resolve_path(Path::new("/data"), Path::new("households.csv")),
            PathBuf::from("/data/households.csv")
        );
        assert_eq!(
            resolve_path(Path::new("/data"), Path::new("./households.csv")),
            PathBuf::from("./households.csv")
        );
        assert_eq!(
            resolve_path(Path::new("/data"), Path::new("/other/households.csv")),
            PathBuf::from("/other/households.csv")
        );
    }
}
