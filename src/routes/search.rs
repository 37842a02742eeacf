use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, get};
use serde::Serialize;
use serde_json::{Value, json};

use crate::models::SearchHit;
use crate::store::Store;

#[derive(Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub count: usize,
    pub query: String,
}

#[get("/api/search?<q>&<channel_id>&<group_id>&<limit>")]
pub fn search_messages(
    store: &State<Store>,
    q: &str,
    channel_id: Option<i64>,
    group_id: Option<i64>,
    limit: Option<usize>,
) -> Result<Json<SearchResponse>, (Status, Json<Value>)> {
    let query = q.trim();
    if query.len() < crate::store::search::MIN_INDEXED_LENGTH {
        return Err((
            Status::BadRequest,
            Json(json!({"error": "query must be at least 3 characters"})),
        ));
    }
    let limit = limit.unwrap_or(50).clamp(1, 200);

    let allowed: Option<std::collections::HashSet<i64>> = if let Some(group_id) = group_id {
        Some(
            store
                .channels_by_group(group_id)
                .into_iter()
                .map(|c| c.id)
                .collect(),
        )
    } else {
        channel_id.map(|id| std::collections::HashSet::from([id]))
    };

    let results = store.search_messages(query, limit, allowed.as_ref());
    let count = results.len();
    Ok(Json(SearchResponse {
        results,
        count,
        query: query.to_string(),
    }))
}
