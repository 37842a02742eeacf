use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::models::{Channel, Group, TagExclusion};
use crate::store::Store;

type ManageResult = Result<Json<Value>, (Status, Json<Value>)>;

fn store_err(e: rusqlite::Error) -> (Status, Json<Value>) {
    (
        Status::InternalServerError,
        Json(json!({"error": e.to_string()})),
    )
}

#[get("/api/channels")]
pub fn list_channels(store: &State<Store>) -> Json<Vec<Channel>> {
    Json(store.channels_with_groups())
}

#[derive(Deserialize)]
pub struct ActiveBody {
    pub active: i64,
}

#[post("/api/channels/<channel_id>/active", data = "<body>")]
pub fn set_channel_active(
    store: &State<Store>,
    channel_id: i64,
    body: Json<ActiveBody>,
) -> ManageResult {
    store
        .update_channel_active(channel_id, body.active)
        .map_err(store_err)?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Deserialize)]
pub struct GroupAssignBody {
    pub group_id: Option<i64>,
}

#[post("/api/channels/<channel_id>/group", data = "<body>")]
pub fn set_channel_group(
    store: &State<Store>,
    channel_id: i64,
    body: Json<GroupAssignBody>,
) -> ManageResult {
    store
        .update_channel_group(channel_id, body.group_id)
        .map_err(store_err)?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Deserialize)]
pub struct DownloadAllBody {
    pub download_all: i64,
}

#[post("/api/channels/<channel_id>/download_all", data = "<body>")]
pub fn set_channel_download_all(
    store: &State<Store>,
    channel_id: i64,
    body: Json<DownloadAllBody>,
) -> ManageResult {
    store
        .update_channel_download_all(channel_id, body.download_all)
        .map_err(store_err)?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Deserialize)]
pub struct BackupPathBody {
    pub backup_path: Option<String>,
}

#[post("/api/channels/<channel_id>/backup_path", data = "<body>")]
pub fn set_channel_backup_path(
    store: &State<Store>,
    channel_id: i64,
    body: Json<BackupPathBody>,
) -> ManageResult {
    store
        .update_channel_backup_path(channel_id, body.backup_path.as_deref())
        .map_err(store_err)?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Deserialize)]
pub struct MediaKindsBody {
    pub photos: i64,
    pub videos: i64,
    pub documents: i64,
    pub audio: i64,
}

#[post("/api/channels/<channel_id>/media_kinds", data = "<body>")]
pub fn set_channel_media_kinds(
    store: &State<Store>,
    channel_id: i64,
    body: Json<MediaKindsBody>,
) -> ManageResult {
    store
        .update_channel_media_kinds(
            channel_id,
            body.photos,
            body.videos,
            body.documents,
            body.audio,
        )
        .map_err(store_err)?;
    Ok(Json(json!({"ok": true})))
}

// --- Groups ---

#[get("/api/groups")]
pub fn list_groups(store: &State<Store>) -> Json<Vec<Group>> {
    Json(store.all_groups())
}

#[derive(Deserialize)]
pub struct CreateGroupBody {
    pub name: String,
}

#[post("/api/groups", data = "<body>")]
pub fn create_group(store: &State<Store>, body: Json<CreateGroupBody>) -> ManageResult {
    let id = store.create_group(&body.name).map_err(store_err)?;
    Ok(Json(json!({"id": id, "name": body.name})))
}

#[derive(Deserialize)]
pub struct RenameGroupBody {
    pub name: String,
}

#[post("/api/groups/<group_id>/rename", data = "<body>")]
pub fn rename_group(
    store: &State<Store>,
    group_id: i64,
    body: Json<RenameGroupBody>,
) -> ManageResult {
    store.rename_group(group_id, &body.name).map_err(store_err)?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Deserialize)]
pub struct DedupBody {
    pub dedup: i64,
}

#[post("/api/groups/<group_id>/dedup", data = "<body>")]
pub fn set_group_dedup(
    store: &State<Store>,
    group_id: i64,
    body: Json<DedupBody>,
) -> ManageResult {
    store.set_group_dedup(group_id, body.dedup).map_err(store_err)?;
    Ok(Json(json!({"ok": true})))
}

#[delete("/api/groups/<group_id>")]
pub fn delete_group(store: &State<Store>, group_id: i64) -> ManageResult {
    store.delete_group(group_id).map_err(store_err)?;
    Ok(Json(json!({"ok": true})))
}

// --- Tag exclusions ---

#[get("/api/exclusions")]
pub fn list_exclusions(store: &State<Store>) -> Json<Vec<TagExclusion>> {
    Json(store.all_tag_exclusions())
}

#[derive(Deserialize)]
pub struct ExclusionBody {
    pub tags: String,
}

#[post("/api/exclusions", data = "<body>")]
pub fn add_exclusion(store: &State<Store>, body: Json<ExclusionBody>) -> ManageResult {
    match store.add_tag_exclusion(&body.tags) {
        Ok(id) => Ok(Json(json!({"id": id}))),
        Err(rusqlite::Error::SqliteFailure(e, msg))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            let _ = msg;
            Err((
                Status::Conflict,
                Json(json!({"error": "equivalent exclusion already exists"})),
            ))
        }
        Err(e) => Err(store_err(e)),
    }
}

#[delete("/api/exclusions/<id>")]
pub fn delete_exclusion(store: &State<Store>, id: i64) -> ManageResult {
    store.delete_tag_exclusion(id).map_err(store_err)?;
    Ok(Json(json!({"ok": true})))
}
