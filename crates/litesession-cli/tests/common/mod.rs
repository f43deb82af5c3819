use std::path::PathBuf;
use tempfile::TempDir;

/// Scratch directory used as the working directory of one CLI run
pub struct TestDir {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl TestDir {
    /// Create a new temporary directory
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().to_path_buf();
        Self { dir, path }
    }

    /// Path of a file inside the directory
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Path of a file inside the directory, as a string argument
    pub fn file_str(&self, name: &str) -> String {
        self.file(name)
            .to_str()
            .expect("Invalid path")
            .to_string()
    }
}
