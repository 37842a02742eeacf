//! Backup-reuse: index a channel's local archive once, then substitute
//! indexed files for upstream downloads matched by partial-chunk hash.
//!
//! Only the first 64 KiB is hashed (MD5); files at or below that size are
//! cheap to re-fetch and are never hash-matched.

use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tracing::{info, warn};

use crate::rpc::{HASH_CHUNK_SIZE, HASH_SIZE_THRESHOLD};
use crate::store::Store;

/// Archive subtrees scanned for reusable files.
pub const BACKUP_SUBFOLDERS: &[&str] = &["photos", "files", "video_files"];

/// MD5 of the first 64 KiB; None for files at or below the threshold.
pub fn compute_file_hash(path: &Path) -> Option<String> {
    let size = std::fs::metadata(path).ok()?.len();
    if size <= HASH_SIZE_THRESHOLD {
        return None;
    }
    let mut file = std::fs::File::open(path).ok()?;
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    let mut read = 0;
    while read < HASH_CHUNK_SIZE {
        match std::io::Read::read(&mut file, &mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(_) => return None,
        }
    }
    Some(hex::encode(Md5::digest(&buf[..read])))
}

fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk_files(&path, out);
        } else if path.is_file() {
            out.push(path);
        }
    }
}

/// Incrementally index a channel's backup folder. Already-indexed paths are
/// never rehashed. Returns the number of newly indexed files.
pub fn update_backup_hashes(store: &Store, channel_id: i64, backup_path: &str) -> usize {
    let backup_dir = Path::new(backup_path);
    if !backup_dir.exists() {
        warn!("backup path does not exist: {backup_path}");
        return 0;
    }

    if let Err(e) = store.create_backup_hash_table(channel_id) {
        warn!("cannot create backup index for channel {channel_id}: {e}");
        return 0;
    }
    let existing = store.existing_backup_paths(channel_id);
    info!("    backup path: {backup_path}");
    info!("    already indexed: {} files", existing.len());

    let mut new_entries: Vec<(String, i64, Option<String>)> = Vec::new();
    let mut large = 0usize;
    let mut small = 0usize;

    for subfolder in BACKUP_SUBFOLDERS {
        let folder = backup_dir.join(subfolder);
        if !folder.exists() {
            continue;
        }
        let mut files = Vec::new();
        walk_files(&folder, &mut files);
        let mut found = 0usize;
        for file in files {
            let path_str = file.display().to_string();
            if existing.contains(&path_str) {
                continue;
            }
            let Ok(meta) = std::fs::metadata(&file) else {
                continue;
            };
            let hash = compute_file_hash(&file);
            if hash.is_some() {
                large += 1;
            } else {
                small += 1;
            }
            new_entries.push((path_str, meta.len() as i64, hash));
            found += 1;
        }
        if found > 0 {
            info!("      found {found} new files in {subfolder}/");
        }
    }

    if new_entries.is_empty() {
        info!("    no new files to index");
        return 0;
    }
    match store.insert_backup_hashes_batch(channel_id, &new_entries) {
        Ok(n) => {
            info!("    indexed {n} new backup files ({large} large with hash, {small} small)");
            n
        }
        Err(e) => {
            warn!("failed to store backup hashes: {e}");
            0
        }
    }
}

/// Look a remote file's partial hash up in the channel index and, on hit,
/// copy the backup file into the channel's media directory. Returns the
/// relative media path.
pub fn substitute_from_backup(
    store: &Store,
    channel_id: i64,
    chunk_hash: &str,
    media_dir: &Path,
) -> Option<String> {
    let backup_file = store.find_backup_by_hash(channel_id, chunk_hash)?;
    let src = Path::new(&backup_file);
    if !src.exists() {
        warn!("hash matched but backup file missing: {backup_file}");
        return None;
    }
    let name = src.file_name()?.to_string_lossy().to_string();
    let channel_dir = media_dir.join(channel_id.to_string());
    if std::fs::create_dir_all(&channel_dir).is_err() {
        return None;
    }
    let dest = channel_dir.join(&name);
    if !dest.exists() {
        if let Err(e) = std::fs::copy(src, &dest) {
            warn!("failed to copy backup file {backup_file}: {e}");
            return None;
        }
    }
    info!("    copied from backup: {backup_file}");
    Some(format!("{channel_id}/{name}"))
}
