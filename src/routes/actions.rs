use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, post};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::store::Store;

type ActionResult = Result<Json<Value>, (Status, Json<Value>)>;

fn store_err(e: rusqlite::Error) -> (Status, Json<Value>) {
    (
        Status::InternalServerError,
        Json(json!({"error": e.to_string()})),
    )
}

/// Batch read-marking; each element is `[channel_id, message_id]`.
#[post("/api/messages/read", data = "<pairs>")]
pub fn mark_read(store: &State<Store>, pairs: Json<Vec<(i64, i64)>>) -> ActionResult {
    let updated = store.mark_messages_read(&pairs).map_err(store_err)?;
    Ok(Json(json!({"updated": updated})))
}

#[derive(Deserialize)]
pub struct RatingBody {
    pub rating: i64,
}

#[post("/api/messages/<channel_id>/<message_id>/rating", data = "<body>")]
pub fn set_rating(
    store: &State<Store>,
    channel_id: i64,
    message_id: i64,
    body: Json<RatingBody>,
) -> ActionResult {
    if !(-1..=1).contains(&body.rating) {
        return Err((
            Status::BadRequest,
            Json(json!({"error": "rating must be -1, 0 or 1"})),
        ));
    }
    store
        .update_rating(channel_id, message_id, body.rating)
        .map_err(store_err)?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Deserialize)]
pub struct BookmarkBody {
    pub bookmarked: i64,
}

/// Fans out to every member of the message's album.
#[post("/api/messages/<channel_id>/<message_id>/bookmark", data = "<body>")]
pub fn set_bookmark(
    store: &State<Store>,
    channel_id: i64,
    message_id: i64,
    body: Json<BookmarkBody>,
) -> ActionResult {
    for id in album_member_ids(store, channel_id, message_id) {
        store
            .update_bookmark(channel_id, id, body.bookmarked)
            .map_err(store_err)?;
    }
    Ok(Json(json!({"ok": true})))
}

#[derive(Deserialize)]
pub struct AnchorBody {
    pub anchored: i64,
}

#[post("/api/messages/<channel_id>/<message_id>/anchor", data = "<body>")]
pub fn set_anchor(
    store: &State<Store>,
    channel_id: i64,
    message_id: i64,
    body: Json<AnchorBody>,
) -> ActionResult {
    for id in album_member_ids(store, channel_id, message_id) {
        store
            .update_anchor(channel_id, id, body.anchored)
            .map_err(store_err)?;
    }
    Ok(Json(json!({"ok": true})))
}

#[derive(Deserialize)]
pub struct HiddenBody {
    pub hidden: i64,
}

#[post("/api/messages/<channel_id>/<message_id>/hide", data = "<body>")]
pub fn set_hidden(
    store: &State<Store>,
    channel_id: i64,
    message_id: i64,
    body: Json<HiddenBody>,
) -> ActionResult {
    for id in album_member_ids(store, channel_id, message_id) {
        store
            .update_hidden(channel_id, id, body.hidden)
            .map_err(store_err)?;
    }
    Ok(Json(json!({"ok": true})))
}

/// All album member ids for a message, or just the message itself.
fn album_member_ids(store: &Store, channel_id: i64, message_id: i64) -> Vec<i64> {
    match store.get_message(channel_id, message_id).and_then(|m| m.grouped_id) {
        Some(gid) => {
            let members: Vec<i64> = store
                .album_messages(channel_id, gid)
                .iter()
                .map(|m| m.id)
                .collect();
            if members.is_empty() { vec![message_id] } else { members }
        }
        None => vec![message_id],
    }
}
