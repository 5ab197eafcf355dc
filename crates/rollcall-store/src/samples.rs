//! Enrollment sample directory.
//!
//! Layout: `<root>/<identity>/<anything>.json`, where each file holds one
//! embedding as a JSON array of numbers, as exported by the embedding model.
//! Folder names are the identities.

use rollcall_core::{Embedding, TrainingSample};
use std::io;
use std::path::{Path, PathBuf};

/// Identity folder names under `root`, sorted. A missing root is an empty roster.
pub fn list_identities(root: &Path) -> io::Result<Vec<String>> {
    let mut identities: Vec<String> = identity_dirs(root)?
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    identities.sort();
    Ok(identities)
}

/// One sample per embedding file, identities in sorted order and files in
/// name order within each identity. Files that cannot be read or parsed come
/// back as failed samples rather than errors.
pub fn scan_samples(root: &Path) -> io::Result<Vec<TrainingSample>> {
    let mut dirs = identity_dirs(root)?;
    dirs.sort();

    let mut samples = Vec::new();
    for (identity, dir) in dirs {
        let files = match embedding_files(&dir) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(%identity, error = %e, "cannot read identity folder");
                samples.push(TrainingSample::failed(identity, format!("{}: {e}", dir.display())));
                continue;
            }
        };
        if files.is_empty() {
            tracing::warn!(%identity, "identity folder has no embedding files");
        }
        for file in files {
            samples.push(read_sample(&identity, &file));
        }
    }

    tracing::info!(root = %root.display(), samples = samples.len(), "scanned sample directory");
    Ok(samples)
}

fn read_sample(identity: &str, path: &Path) -> TrainingSample {
    let parsed = std::fs::read(path)
        .map_err(|e| e.to_string())
        .and_then(|bytes| serde_json::from_slice::<Vec<f32>>(&bytes).map_err(|e| e.to_string()));
    match parsed {
        Ok(values) => TrainingSample::encoded(identity, Embedding::new(values)),
        Err(reason) => TrainingSample::failed(identity, format!("{}: {reason}", path.display())),
    }
}

fn identity_dirs(root: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            tracing::warn!(path = %entry.path().display(), "skipping non-UTF-8 identity folder");
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        dirs.push((name, entry.path()));
    }
    Ok(dirs)
}

fn embedding_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
