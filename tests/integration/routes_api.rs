use rocket::http::{ContentType, Status};
use rocket::local::blocking::Client;

use crate::common::{TestEnv, new_message, seed_channel};

fn client(env: &TestEnv) -> Client {
    let rocket = chanfeed::rocket_with_store(env.config.clone(), env.open_store());
    Client::tracked(rocket).expect("valid rocket instance")
}

#[test]
fn health_endpoint() {
    let env = TestEnv::new();
    let client = client(&env);
    let res = client.get("/health").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "ok");
}

#[test]
fn groups_crud() {
    let env = TestEnv::new();
    let client = client(&env);

    let res = client
        .post("/api/groups")
        .header(ContentType::JSON)
        .body(r#"{"name": "tech"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let group_id = body["id"].as_i64().unwrap();

    let res = client
        .post(format!("/api/groups/{group_id}/dedup"))
        .header(ContentType::JSON)
        .body(r#"{"dedup": 1}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.get("/api/groups").dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body[0]["name"], "tech");
    assert_eq!(body[0]["dedup"], 1);

    let res = client.delete(format!("/api/groups/{group_id}")).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let res = client.get("/api/groups").dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[test]
fn exclusions_are_canonicalized_and_unique() {
    let env = TestEnv::new();
    let client = client(&env);

    let res = client
        .post("/api/exclusions")
        .header(ContentType::JSON)
        .body(r#"{"tags": "Promo, ad , promo"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.get("/api/exclusions").dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body[0]["tags"], "ad,promo");

    // An equivalent set conflicts.
    let res = client
        .post("/api/exclusions")
        .header(ContentType::JSON)
        .body(r#"{"tags": "ad, promo"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
}

#[test]
fn unread_feed_and_mark_read() {
    let env = TestEnv::new();
    let group_id = env.store().create_group("news").unwrap();
    seed_channel(env.store(), 100, "Alpha", Some(group_id));
    env.store()
        .insert_messages_batch(
            100,
            &[
                new_message(1, 1000, Some("first post")),
                new_message(2, 2000, Some("second post")),
            ],
        )
        .unwrap();

    let client = client(&env);
    let res = client
        .get(format!("/api/feed/unread?group_id={group_id}"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let feed = body.as_array().unwrap();
    assert_eq!(feed.len(), 2);
    // Oldest first.
    assert_eq!(feed[0]["id"], 1);
    assert_eq!(feed[0]["channel_title"], "Alpha");

    let res = client
        .post("/api/messages/read")
        .header(ContentType::JSON)
        .body(r#"[[100, 1]]"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["updated"], 1);

    let res = client
        .get(format!("/api/feed/unread?group_id={group_id}"))
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body.as_array().unwrap().len(), 1);

    let res = client.get("/api/feed/unread_counts").dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body[0]["unread"], 1);
}

#[test]
fn bookmark_fans_out_to_album_members() {
    let env = TestEnv::new();
    seed_channel(env.store(), 100, "Alpha", None);
    let mut a = new_message(1, 1000, Some("caption"));
    a.grouped_id = Some(7);
    let mut b = new_message(2, 1000, None);
    b.grouped_id = Some(7);
    env.store().insert_messages_batch(100, &[a, b]).unwrap();

    let client = client(&env);
    let res = client
        .post("/api/messages/100/1/bookmark")
        .header(ContentType::JSON)
        .body(r#"{"bookmarked": 1}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    assert_eq!(env.store().get_message(100, 1).unwrap().bookmarked, 1);
    assert_eq!(env.store().get_message(100, 2).unwrap().bookmarked, 1);

    let res = client.get("/api/feed/bookmarks").dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    // One consolidated album, both members listed.
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["album_message_ids"], serde_json::json!([1, 2]));
}

#[test]
fn search_requires_three_characters() {
    let env = TestEnv::new();
    let client = client(&env);
    let res = client.get("/api/search?q=ab").dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn hidden_messages_leave_the_feed() {
    let env = TestEnv::new();
    let group_id = env.store().create_group("news").unwrap();
    seed_channel(env.store(), 100, "Alpha", Some(group_id));
    env.store()
        .insert_messages_batch(100, &[new_message(1, 1000, Some("soon hidden"))])
        .unwrap();

    let client = client(&env);
    let res = client
        .post("/api/messages/100/1/hide")
        .header(ContentType::JSON)
        .body(r#"{"hidden": 1}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client
        .get(format!("/api/feed/unread?group_id={group_id}"))
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body.as_array().unwrap().len(), 0);
}
