use std::io;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::constants::reader::INPUT_EXTENSION;
use crate::errors::RollupError;
use crate::types::ShardName;

/// One shard directory and the outcome of listing its input files.
#[derive(Debug)]
pub struct ShardListing {
    /// Shard directory name (mirrored under the output root).
    pub name: ShardName,
    /// Shard directory path.
    pub path: PathBuf,
    /// Input files in name order, or the error that prevented listing them.
    pub files: Result<Vec<PathBuf>, RollupError>,
}

/// Filesystem view of a TLD-sharded input tree: `root/<shard>/<file>.csv`.
pub struct ShardTree {
    root: PathBuf,
    extension: String,
    follow_links: bool,
}

impl ShardTree {
    /// Create a view rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: INPUT_EXTENSION.to_string(),
            follow_links: true,
        }
    }

    /// Configure the input file extension (without dot).
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Configure symlink traversal (on by default, so symlinked shards and
    /// input files are processed like regular ones).
    pub fn with_follow_symlinks(mut self, follow_links: bool) -> Self {
        self.follow_links = follow_links;
        self
    }

    /// List shard directories in name order.
    ///
    /// Fails only when the root itself cannot be read; a shard that cannot be
    /// listed is returned with its error so callers can continue past it.
    pub fn shards(&self) -> Result<Vec<ShardListing>, RollupError> {
        let mut shards = Vec::new();
        for entry in self.walk(&self.root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => {
                    return Err(RollupError::directory(
                        self.root.to_string_lossy(),
                        io::Error::from(err),
                    ));
                }
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    shards.push(ShardListing {
                        name: shard_name(&path),
                        files: Err(RollupError::directory(
                            path.to_string_lossy(),
                            io::Error::from(err),
                        )),
                        path,
                    });
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let path = entry.path().to_path_buf();
            shards.push(ShardListing {
                name: shard_name(&path),
                files: self.files_in(&path),
                path,
            });
        }
        Ok(shards)
    }

    /// Input files directly inside `shard`, in name order.
    pub fn files_in(&self, shard: &Path) -> Result<Vec<PathBuf>, RollupError> {
        let mut files = Vec::new();
        for entry in self.walk(shard) {
            let entry = entry.map_err(|err| {
                RollupError::directory(shard.to_string_lossy(), io::Error::from(err))
            })?;
            if entry.file_type().is_file() && has_extension(entry.path(), &self.extension) {
                files.push(entry.path().to_path_buf());
            }
        }
        Ok(files)
    }

    fn walk(&self, dir: &Path) -> impl Iterator<Item = walkdir::Result<DirEntry>> {
        WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(self.follow_links)
            .sort_by_file_name()
            .into_iter()
    }
}

/// True if the path has exactly the given extension (case-sensitive).
pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == extension)
}

fn shard_name(path: &Path) -> ShardName {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
