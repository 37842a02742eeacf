use rocket::serde::json::Json;
use rocket::{State, get};
use serde::Serialize;

use crate::models::FeedMessage;
use crate::store::Store;

#[get("/api/feed/unread?<group_id>&<limit>&<channel_id>")]
pub fn unread_feed(
    store: &State<Store>,
    group_id: i64,
    limit: Option<usize>,
    channel_id: Option<i64>,
) -> Json<Vec<FeedMessage>> {
    let limit = limit.unwrap_or(100).clamp(1, 500);
    Json(store.unread_feed(group_id, limit, channel_id))
}

#[get("/api/feed/earlier?<group_id>&<before_date>&<limit>&<channel_id>")]
pub fn earlier_feed(
    store: &State<Store>,
    group_id: i64,
    before_date: i64,
    limit: Option<usize>,
    channel_id: Option<i64>,
) -> Json<Vec<FeedMessage>> {
    let limit = limit.unwrap_or(50).clamp(1, 500);
    Json(store.earlier_feed(group_id, before_date, limit, channel_id))
}

#[get("/api/feed/channel/<channel_id>/oldest?<limit>")]
pub fn channel_oldest_feed(
    store: &State<Store>,
    channel_id: i64,
    limit: Option<usize>,
) -> Json<Vec<FeedMessage>> {
    let limit = limit.unwrap_or(50).clamp(1, 500);
    Json(store.channel_feed_oldest(channel_id, limit))
}

#[get("/api/feed/channel/<channel_id>/after?<date>&<limit>")]
pub fn channel_after_feed(
    store: &State<Store>,
    channel_id: i64,
    date: i64,
    limit: Option<usize>,
) -> Json<Vec<FeedMessage>> {
    let limit = limit.unwrap_or(50).clamp(1, 500);
    Json(store.channel_feed_after(channel_id, date, limit))
}

#[get("/api/feed/bookmarks?<limit>")]
pub fn bookmarks_feed(store: &State<Store>, limit: Option<usize>) -> Json<Vec<FeedMessage>> {
    let limit = limit.unwrap_or(100).clamp(1, 500);
    Json(store.bookmarks_feed(limit))
}

#[derive(Serialize)]
pub struct UnreadCount {
    pub group_id: i64,
    pub group_name: String,
    pub unread: usize,
}

#[get("/api/feed/unread_counts")]
pub fn unread_counts(store: &State<Store>) -> Json<Vec<UnreadCount>> {
    Json(
        store
            .unread_counts()
            .into_iter()
            .map(|(group_id, group_name, unread)| UnreadCount {
                group_id,
                group_name,
                unread,
            })
            .collect(),
    )
}

#[derive(Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: i64,
}

#[get("/api/feed/tags?<group_id>")]
pub fn group_tags(store: &State<Store>, group_id: i64) -> Json<Vec<TagCount>> {
    Json(
        store
            .group_tag_counts(group_id)
            .into_iter()
            .map(|(tag, count)| TagCount { tag, count })
            .collect(),
    )
}
