use chanfeed::workers::search_index;

use crate::common::{new_message, seed_channel, test_store};

#[test]
fn indexing_covers_the_diff_only() {
    let store = test_store();
    seed_channel(&store, 100, "A", None);
    store
        .insert_messages_batch(
            100,
            &[
                new_message(1, 1000, Some("quantum computing breakthrough")),
                new_message(2, 2000, Some("ordinary tuesday news")),
                new_message(3, 3000, Some("ok")), // below the length floor
            ],
        )
        .unwrap();

    let indexed = search_index::index_channel(&store, 100, false).unwrap();
    assert_eq!(indexed, 2);

    // A second run finds nothing new.
    assert_eq!(search_index::index_channel(&store, 100, false).unwrap(), 0);

    // New message appears in the next diff.
    store
        .insert_messages_batch(100, &[new_message(4, 4000, Some("late arrival story"))])
        .unwrap();
    assert_eq!(search_index::index_channel(&store, 100, false).unwrap(), 1);
}

#[test]
fn trigram_substring_search() {
    let store = test_store();
    seed_channel(&store, 100, "Alpha", None);
    store
        .insert_messages_batch(
            100,
            &[new_message(1, 1000, Some("the quantum computing breakthrough arrived"))],
        )
        .unwrap();
    search_index::index_channel(&store, 100, false).unwrap();

    // Substring match, not word match.
    let hits = store.search_messages("uantum comp", 10, None);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].channel_id, 100);
    assert_eq!(hits[0].message_id, 1);
    assert_eq!(hits[0].channel_title, "Alpha");

    // Queries below three characters never match.
    assert!(store.search_messages("qu", 10, None).is_empty());
}

#[test]
fn channel_filter_scopes_results() {
    let store = test_store();
    seed_channel(&store, 100, "A", None);
    seed_channel(&store, 200, "B", None);
    store
        .insert_messages_batch(100, &[new_message(1, 1000, Some("shared keyword alpha"))])
        .unwrap();
    store
        .insert_messages_batch(200, &[new_message(1, 1000, Some("shared keyword beta"))])
        .unwrap();
    search_index::index_channel(&store, 100, false).unwrap();
    search_index::index_channel(&store, 200, false).unwrap();

    let all = store.search_messages("shared keyword", 10, None);
    assert_eq!(all.len(), 2);

    let only_b = std::collections::HashSet::from([200i64]);
    let hits = store.search_messages("shared keyword", 10, Some(&only_b));
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].channel_id, 200);
}

#[test]
fn deleted_rows_disappear_from_search() {
    let store = test_store();
    seed_channel(&store, 100, "A", None);
    store
        .insert_messages_batch(100, &[new_message(1, 1000, Some("ephemeral content here"))])
        .unwrap();
    search_index::index_channel(&store, 100, false).unwrap();
    assert_eq!(store.search_messages("ephemeral", 10, None).len(), 1);

    store.delete_from_search_index(100, &[1]);
    assert!(store.search_messages("ephemeral", 10, None).is_empty());
}

#[test]
fn rebuild_reindexes_everything() {
    let store = test_store();
    seed_channel(&store, 100, "A", None);
    store.update_channel_active(100, 1).unwrap();
    store
        .insert_messages_batch(100, &[new_message(1, 1000, Some("rebuild target text"))])
        .unwrap();
    search_index::run(&store, false, false).unwrap();
    assert_eq!(store.search_messages("rebuild target", 10, None).len(), 1);

    search_index::run(&store, true, true).unwrap();
    assert_eq!(store.search_messages("rebuild target", 10, None).len(), 1);
    assert_eq!(store.search_index_size(), 1);
}

#[test]
fn fts_query_operators_are_inert() {
    let store = test_store();
    seed_channel(&store, 100, "A", None);
    store
        .insert_messages_batch(100, &[new_message(1, 1000, Some("plain message body"))])
        .unwrap();
    search_index::index_channel(&store, 100, false).unwrap();

    // Would be FTS syntax errors if passed through unquoted.
    assert!(store.search_messages("NOT AND", 10, None).is_empty());
    assert!(store.search_messages("mes*age", 10, None).is_empty());
}
