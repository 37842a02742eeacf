use rocket::serde::json::Json;
use rocket::{State, catch, get};
use serde_json::{Value, json};

use crate::models::ChannelStats;
use crate::store::Store;

#[get("/health")]
pub fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

#[get("/api/stats")]
pub fn stats(store: &State<Store>) -> Json<Value> {
    let channels = store.subscribed_channels();
    let per_channel: Vec<Value> = channels
        .iter()
        .map(|c| {
            let s = store.channel_stats(c.id);
            json!({
                "channel_id": c.id,
                "title": c.title,
                "total": s.total,
                "unread": s.unread,
                "bookmarked": s.bookmarked,
            })
        })
        .collect();
    Json(json!({
        "channels": per_channel,
        "search_index_size": store.search_index_size(),
    }))
}

#[get("/api/channels/<channel_id>/stats")]
pub fn channel_stats(store: &State<Store>, channel_id: i64) -> Json<ChannelStats> {
    Json(store.channel_stats(channel_id))
}

#[catch(404)]
pub fn not_found() -> Json<Value> {
    Json(json!({"error": "not found"}))
}
