use std::collections::HashMap;

use async_trait::async_trait;
use chanfeed::dedup::{
    self, AiProvider, combine_media_hashes, compute_content_hash, normalize_keywords,
};
use chanfeed::models::MediaType;
use sha2::{Digest, Sha256};

use crate::common::{
    TestEnv, media_message, new_message, seed_channel, seed_dedup_group, test_store,
};

// --- Hash primitives ---

#[test]
fn normalized_summary_hash_is_canonical() {
    assert_eq!(normalize_keywords("b, a, A ,b"), "a,b");
    assert_eq!(compute_content_hash("b, a, A ,b"), compute_content_hash("a,b"));
}

#[test]
fn media_hash_combines_sorted_digests() {
    let h1 = "ff".repeat(32);
    let h2 = "00".repeat(32);
    assert!(h1 > h2);
    let expected = hex::encode(Sha256::digest(format!("{h2}{h1}").as_bytes()));
    assert_eq!(combine_media_hashes(vec![h1.clone(), h2.clone()]), expected);
    // Order of inputs does not matter.
    assert_eq!(combine_media_hashes(vec![h2, h1]), expected);
}

// --- First-writer registry ---

#[test]
fn first_writer_wins() {
    let store = test_store();
    let first = store
        .register_content_hash("deadbeef", 1, 100, 10, Some(1000))
        .unwrap();
    assert!(first.is_none());
    let second = store
        .register_content_hash("deadbeef", 1, 200, 20, Some(2000))
        .unwrap();
    assert_eq!(second, Some((100, 10)));
    // The registrant keeps winning on replay.
    let replay = store
        .register_content_hash("deadbeef", 1, 100, 10, Some(1000))
        .unwrap();
    assert_eq!(replay, Some((100, 10)));
}

#[test]
fn group_scope_isolates_registries() {
    let store = test_store();
    assert!(store
        .register_media_hash("cafe", 1, 100, 10, Some(1000))
        .unwrap()
        .is_none());
    // Same hash under a different group: independent first writer.
    assert!(store
        .register_media_hash("cafe", 2, 200, 20, Some(2000))
        .unwrap()
        .is_none());
    assert_eq!(
        store.register_media_hash("cafe", 1, 300, 30, None).unwrap(),
        Some((100, 10))
    );
    assert_eq!(
        store.register_media_hash("cafe", 2, 300, 30, None).unwrap(),
        Some((200, 20))
    );
}

// --- Media pass ---

fn write_media(env: &TestEnv, rel: &str, contents: &[u8]) {
    let full = env.config.media_dir().join(rel);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(full, contents).unwrap();
}

/// Channel A posts an album of two photos; channel B in the same group
/// posts the same two photos as separate messages. B's messages end up
/// pointing at A's album base.
#[test]
fn album_dedup_across_channels() {
    let env = TestEnv::new();
    let store = env.store();
    let group = seed_dedup_group(store, "news");
    seed_channel(store, 100, "Channel A", Some(group));
    seed_channel(store, 200, "Channel B", Some(group));

    write_media(&env, "100/p1.jpg", b"photo-one");
    write_media(&env, "100/p2.jpg", b"photo-two");
    write_media(&env, "200/q1.jpg", b"photo-one");
    write_media(&env, "200/q2.jpg", b"photo-two");

    let mut a1 = media_message(10, 1000, MediaType::Photo, "100/p1.jpg");
    a1.grouped_id = Some(77);
    let mut a2 = media_message(11, 1000, MediaType::Photo, "100/p2.jpg");
    a2.grouped_id = Some(77);
    store.insert_messages_batch(100, &[a1, a2]).unwrap();

    let b1 = media_message(20, 2000, MediaType::Photo, "200/q1.jpg");
    let b2 = media_message(21, 2001, MediaType::Photo, "200/q2.jpg");
    store.insert_messages_batch(200, &[b1, b2]).unwrap();

    let totals = dedup::run_media_pass(store, &env.config.media_dir(), &env.config);
    assert_eq!(totals.errors, 0);

    // A's album registered first (channel list order) and carries the
    // combined hash on every member.
    let a = store.get_message(100, 10).unwrap();
    assert!(a.media_hash.is_some());
    assert_eq!(a.media_hash_pending, 0);
    let a_sibling = store.get_message(100, 11).unwrap();
    assert_eq!(a_sibling.media_hash, a.media_hash);

    // B's separate reposts of the album's photos both point at the album
    // base.
    for id in [20, 21] {
        let dup = store.get_message(200, id).unwrap();
        assert_eq!(dup.duplicate_of_channel, Some(100), "message {id}");
        assert_eq!(dup.duplicate_of_message, Some(10), "message {id}");
        assert_eq!(dup.media_hash_pending, 0);
    }

    // A full repost of the same album dedups against it too.
    write_media(&env, "200/r1.jpg", b"photo-one");
    write_media(&env, "200/r2.jpg", b"photo-two");
    let mut b3 = media_message(30, 3000, MediaType::Photo, "200/r1.jpg");
    b3.grouped_id = Some(88);
    let mut b4 = media_message(31, 3000, MediaType::Photo, "200/r2.jpg");
    b4.grouped_id = Some(88);
    store.insert_messages_batch(200, &[b3, b4]).unwrap();

    dedup::run_media_pass(store, &env.config.media_dir(), &env.config);
    let dup = store.get_message(200, 30).unwrap();
    assert_eq!(dup.duplicate_of_channel, Some(100));
    assert_eq!(dup.duplicate_of_message, Some(10));
    let dup_sibling = store.get_message(200, 31).unwrap();
    assert_eq!(dup_sibling.duplicate_of_channel, Some(100));
    assert_eq!(dup_sibling.duplicate_of_message, Some(10));
}

#[test]
fn messages_without_media_are_skipped() {
    let env = TestEnv::new();
    let store = env.store();
    let group = seed_dedup_group(store, "g");
    seed_channel(store, 100, "A", Some(group));
    store
        .insert_messages_batch(100, &[new_message(1, 1000, Some("text only"))])
        .unwrap();

    dedup::run_media_pass(store, &env.config.media_dir(), &env.config);
    let m = store.get_message(100, 1).unwrap();
    assert_eq!(m.media_hash_pending, -1);
    assert!(m.media_hash.is_none());
}

// --- Text pass ---

struct ScriptedProvider {
    responses: HashMap<String, String>,
}

impl ScriptedProvider {
    fn new(pairs: &[(&str, &str)]) -> Self {
        ScriptedProvider {
            responses: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "Scripted"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn generate_summary(&self, message_text: &str, _max_retries: u32) -> Option<String> {
        self.responses.get(message_text).cloned()
    }
}

const LONG_A: &str = "Breaking: massive earthquake hits Turkey, thousands feared dead overnight";
const LONG_B: &str = "Earthquake in Turkey kills thousands, rescue efforts underway this morning";

#[tokio::test]
async fn text_pass_marks_cross_channel_duplicates() {
    let env = TestEnv::new();
    let store = env.store();
    let group = seed_dedup_group(store, "news");
    seed_channel(store, 100, "A", Some(group));
    seed_channel(store, 200, "B", Some(group));

    store
        .insert_messages_batch(100, &[new_message(1, 1000, Some(LONG_A))])
        .unwrap();
    store
        .insert_messages_batch(200, &[new_message(5, 2000, Some(LONG_B))])
        .unwrap();

    let provider = ScriptedProvider::new(&[
        (LONG_A, "earthquake, kill, thousands, turkey"),
        (LONG_B, "earthquake, kill, thousands, turkey"),
    ]);
    let totals = dedup::run_text_pass(store, &provider, &env.config).await;
    assert_eq!(totals.duplicates, 1);

    let original = store.get_message(100, 1).unwrap();
    assert!(original.duplicate_of_channel.is_none());
    assert_eq!(original.content_hash_pending, 0);
    let dup = store.get_message(200, 5).unwrap();
    assert_eq!(dup.duplicate_of_channel, Some(100));
    assert_eq!(dup.duplicate_of_message, Some(1));
    assert_eq!(dup.content_hash, original.content_hash);
    assert_eq!(dup.ai_summary.as_deref(), Some("earthquake, kill, thousands, turkey"));
}

#[tokio::test]
async fn tag_exclusion_auto_marks_read_without_registering() {
    let env = TestEnv::new();
    let store = env.store();
    let group = seed_dedup_group(store, "news");
    seed_channel(store, 100, "A", Some(group));
    store.add_tag_exclusion("ad, promo").unwrap();

    store
        .insert_messages_batch(100, &[new_message(1, 1000, Some(LONG_A))])
        .unwrap();

    let provider = ScriptedProvider::new(&[(LONG_A, "ad, deal, promo, sale")]);
    dedup::run_text_pass(store, &provider, &env.config).await;

    let m = store.get_message(100, 1).unwrap();
    assert_eq!(m.read, 1);
    assert!(m.read_at.is_some());
    assert_eq!(m.content_hash_pending, 0);
    assert!(m.ai_summary.is_some());

    // Not registered: a later message with the same summary becomes the
    // first writer, not a duplicate.
    store
        .insert_messages_batch(100, &[new_message(2, 2000, Some(LONG_B))])
        .unwrap();
    let provider = ScriptedProvider::new(&[(LONG_B, "ad, deal, promo, sale")]);
    dedup::run_text_pass(store, &provider, &env.config).await;
    let m2 = store.get_message(100, 2).unwrap();
    assert!(m2.duplicate_of_channel.is_none());
}

#[tokio::test]
async fn promo_and_sparse_summaries_are_skipped() {
    let env = TestEnv::new();
    let store = env.store();
    let group = seed_dedup_group(store, "news");
    seed_channel(store, 100, "A", Some(group));

    store
        .insert_messages_batch(
            100,
            &[
                new_message(1, 1000, Some(LONG_A)),
                new_message(2, 2000, Some(LONG_B)),
            ],
        )
        .unwrap();

    let provider = ScriptedProvider::new(&[(LONG_A, "ad"), (LONG_B, "one, two")]);
    let totals = dedup::run_text_pass(store, &provider, &env.config).await;
    assert_eq!(totals.processed, 0);

    assert_eq!(store.get_message(100, 1).unwrap().content_hash_pending, -1);
    assert_eq!(store.get_message(100, 2).unwrap().content_hash_pending, -1);
}

#[tokio::test]
async fn short_messages_are_bulk_skipped() {
    let env = TestEnv::new();
    let store = env.store();
    let group = seed_dedup_group(store, "news");
    seed_channel(store, 100, "A", Some(group));

    store
        .insert_messages_batch(100, &[new_message(1, 1000, Some("too short"))])
        .unwrap();

    let provider = ScriptedProvider::new(&[]);
    dedup::run_text_pass(store, &provider, &env.config).await;
    assert_eq!(store.get_message(100, 1).unwrap().content_hash_pending, -1);
}

#[tokio::test]
async fn media_pass_duplicates_skip_the_text_pass() {
    let env = TestEnv::new();
    let store = env.store();
    let group = seed_dedup_group(store, "news");
    seed_channel(store, 100, "A", Some(group));

    store
        .insert_messages_batch(100, &[new_message(9, 1000, Some(LONG_A))])
        .unwrap();
    store.mark_as_duplicate(100, 9, 50, 5).unwrap();

    // Provider would panic the test if consulted for this message.
    let provider = ScriptedProvider::new(&[]);
    let totals = dedup::run_text_pass(store, &provider, &env.config).await;
    assert_eq!(totals.errors, 0);
    assert_eq!(store.get_message(100, 9).unwrap().content_hash_pending, -1);
}

#[tokio::test]
async fn provider_failure_leaves_message_pending() {
    let env = TestEnv::new();
    let store = env.store();
    let group = seed_dedup_group(store, "news");
    seed_channel(store, 100, "A", Some(group));

    store
        .insert_messages_batch(100, &[new_message(1, 1000, Some(LONG_A))])
        .unwrap();

    let provider = ScriptedProvider::new(&[]); // no response -> None
    let totals = dedup::run_text_pass(store, &provider, &env.config).await;
    assert_eq!(totals.errors, 1);
    assert_eq!(store.get_message(100, 1).unwrap().content_hash_pending, 1);
}
