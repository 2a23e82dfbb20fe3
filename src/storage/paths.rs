// Storage path utilities.
// Resolves platform directories for persisted client state and configuration.

use std::path::PathBuf;

use directories::ProjectDirs;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "mediacms")
}

/// Base directory for persisted client state (~/.local/share/mediacms on Linux).
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Path to the key-value storage file.
pub fn storage_path() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join("storage.json"))
}

/// Path to the default configuration file.
pub fn config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        // Path construction only; home may be missing in sandboxes
        if let Some(path) = storage_path() {
            assert!(path.ends_with("storage.json"));
        }
        if let Some(path) = config_path() {
            assert!(path.ends_with("config.toml"));
        }
    }
}
