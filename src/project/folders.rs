// Project folder layout
// Versioned per-project directories under the user data dir, with
// subfolders consumed by the export layer

use std::fs;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to get app data directory")]
    NoAppDataDir,
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Subfolders created inside every project directory
const PROJECT_SUBDIRS: [&str; 3] = ["stems", "midi", "analysis"];

/// Name of the project document inside a project directory
pub const PROJECT_FILE: &str = "project.json";

/// App data directory for stemlab
pub fn app_data_dir() -> StorageResult<PathBuf> {
    let data_dir = dirs::data_dir().ok_or(StorageError::NoAppDataDir)?;
    let lab_dir = data_dir.join("stemlab");
    fs::create_dir_all(&lab_dir)?;
    Ok(lab_dir)
}

/// Directory for a named project, created on first use together with its
/// stems/midi/analysis subfolders
pub fn project_dir(name: &str) -> StorageResult<PathBuf> {
    let app_dir = app_data_dir()?;
    let dir = app_dir.join("projects").join(name);
    fs::create_dir_all(&dir)?;
    for sub in PROJECT_SUBDIRS {
        fs::create_dir_all(dir.join(sub))?;
    }
    Ok(dir)
}

/// Path of the project document for a named project
pub fn project_file(name: &str) -> StorageResult<PathBuf> {
    Ok(project_dir(name)?.join(PROJECT_FILE))
}

/// Names of all projects that have a project document on disk
pub fn list_projects() -> StorageResult<Vec<String>> {
    let projects_dir = app_data_dir()?.join("projects");
    if !projects_dir.exists() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(&projects_dir)? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        if entry.path().join(PROJECT_FILE).exists() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }

    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_subdir_names() {
        assert!(PROJECT_SUBDIRS.contains(&"stems"));
        assert!(PROJECT_SUBDIRS.contains(&"midi"));
        assert!(PROJECT_SUBDIRS.contains(&"analysis"));
    }
}
