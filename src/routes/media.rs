use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, post};
use serde_json::{Value, json};
use tracing::warn;

use crate::client::RpcClient;
use crate::config::Config;
use crate::pause::PauseFlag;
use crate::store::Store;

/// On-demand full download of one message's media. Raises the pause
/// sentinel for exclusive upstream access; the sentinel is cleared on every
/// exit path. The download itself runs unbounded.
#[post("/api/media/download/<channel_id>/<message_id>")]
pub async fn download_media_on_demand(
    store: &State<Store>,
    config: &State<Config>,
    channel_id: i64,
    message_id: i64,
) -> Result<Json<Value>, (Status, Json<Value>)> {
    let Some(channel) = store.get_channel(channel_id) else {
        return Err((
            Status::NotFound,
            Json(json!({"error": "unknown channel"})),
        ));
    };
    let Some(access_hash) = channel.access_hash else {
        return Err((
            Status::BadRequest,
            Json(json!({"error": "channel has no access hash"})),
        ));
    };

    let pause = PauseFlag::new(config.pause_file());
    if let Err(e) = pause.raise() {
        return Err((
            Status::InternalServerError,
            Json(json!({"error": format!("cannot raise pause flag: {e}")})),
        ));
    }

    let result = async {
        let mut client = RpcClient::connect(&config.daemon_addr())
            .await
            .map_err(|e| e.to_string())?;
        client
            .download_media(
                channel_id,
                access_hash,
                message_id,
                &config.media_dir().display().to_string(),
                None,
            )
            .await
            .map_err(|e| e.to_string())
    }
    .await;
    pause.clear();

    match result {
        Ok(download) => match download.path {
            Some(path) => {
                if let Err(e) = store.update_message_media(channel_id, message_id, Some(&path), 0) {
                    warn!("downloaded but failed to record media path: {e}");
                }
                Ok(Json(json!({"path": path})))
            }
            None => Err((
                Status::BadGateway,
                Json(json!({"error": download.error.unwrap_or_else(|| "download failed".to_string())})),
            )),
        },
        Err(e) => Err((Status::BadGateway, Json(json!({"error": e})))),
    }
}
