use chanfeed::backup::{compute_file_hash, substitute_from_backup, update_backup_hashes};
use md5::{Digest, Md5};

use crate::common::{TestEnv, seed_channel};

const CHUNK: usize = 64 * 1024;

fn backup_file(env: &TestEnv, subfolder: &str, name: &str, contents: &[u8]) -> std::path::PathBuf {
    let dir = env.config.data_dir.join("archive").join(subfolder);
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn archive_path(env: &TestEnv) -> String {
    env.config.data_dir.join("archive").display().to_string()
}

#[test]
fn indexing_hashes_large_files_only() {
    let env = TestEnv::new();
    let store = env.store();
    seed_channel(store, 100, "A", None);

    let large: Vec<u8> = (0..CHUNK + 500).map(|i| (i % 251) as u8).collect();
    backup_file(&env, "photos", "big.jpg", &large);
    backup_file(&env, "files", "small.txt", b"tiny");
    // Outside the scanned subtrees; must be ignored.
    backup_file(&env, "other", "stray.bin", &large);

    let indexed = update_backup_hashes(store, 100, &archive_path(&env));
    assert_eq!(indexed, 2);

    let expected = hex::encode(Md5::digest(&large[..CHUNK]));
    assert_eq!(store.find_backup_by_hash(100, &expected).is_some(), true);

    // Small files carry no hash: the partial-hash path never matches them.
    let small_hash = hex::encode(Md5::digest(b"tiny"));
    assert!(store.find_backup_by_hash(100, &small_hash).is_none());

    // Incremental: a rescan indexes nothing new.
    assert_eq!(update_backup_hashes(store, 100, &archive_path(&env)), 0);
}

#[test]
fn partial_hash_of_small_file_is_none() {
    let env = TestEnv::new();
    let path = backup_file(&env, "files", "small.bin", &vec![7u8; CHUNK]);
    // Exactly at the threshold: treated as small.
    assert!(compute_file_hash(&path).is_none());

    let big = backup_file(&env, "files", "big.bin", &vec![7u8; CHUNK + 1]);
    assert!(compute_file_hash(&big).is_some());
}

#[test]
fn substitution_copies_identical_bytes() {
    let env = TestEnv::new();
    let store = env.store();
    seed_channel(store, 100, "A", None);

    let contents: Vec<u8> = (0..CHUNK * 2).map(|i| (i % 241) as u8).collect();
    let src = backup_file(&env, "video_files", "clip.mp4", &contents);
    update_backup_hashes(store, 100, &archive_path(&env));

    let chunk_hash = hex::encode(Md5::digest(&contents[..CHUNK]));
    let rel = substitute_from_backup(store, 100, &chunk_hash, &env.config.media_dir())
        .expect("hash should match the indexed backup");
    assert_eq!(rel, "100/clip.mp4");

    let copied = std::fs::read(env.config.media_dir().join(&rel)).unwrap();
    let original = std::fs::read(&src).unwrap();
    assert_eq!(copied, original);
}

#[test]
fn missing_backup_file_fails_the_match() {
    let env = TestEnv::new();
    let store = env.store();
    seed_channel(store, 100, "A", None);

    let contents = vec![9u8; CHUNK + 100];
    let src = backup_file(&env, "photos", "gone.jpg", &contents);
    update_backup_hashes(store, 100, &archive_path(&env));
    std::fs::remove_file(&src).unwrap();

    let chunk_hash = hex::encode(Md5::digest(&contents[..CHUNK]));
    assert!(substitute_from_backup(store, 100, &chunk_hash, &env.config.media_dir()).is_none());
}
