pub mod backup;
pub mod client;
pub mod config;
pub mod daemon;
pub mod dedup;
pub mod models;
pub mod pause;
pub mod routes;
pub mod rpc;
pub mod store;
pub mod supervisor;
pub mod sync;
pub mod upstream;
pub mod workers;

use config::Config;
use rocket::fs::{FileServer, Options};
use rocket_cors::CorsOptions;
use store::Store;

/// Build the reader API server over an opened store.
pub fn rocket_with_store(config: Config, store: Store) -> rocket::Rocket<rocket::Build> {
    let cors = CorsOptions::default()
        .to_cors()
        .expect("Failed to create CORS");

    let media_dir = config.media_dir();
    let photos_dir = config.photos_dir();
    let telegraph_dir = config.telegraph_dir();
    for dir in [&media_dir, &photos_dir, &telegraph_dir] {
        std::fs::create_dir_all(dir).ok();
    }

    let figment = rocket::Config::figment()
        .merge(("address", config.web_host.clone()))
        .merge(("port", config.web_port));

    rocket::custom(figment)
        .manage(store)
        .manage(config)
        .attach(cors)
        .register("/", rocket::catchers![routes::not_found])
        .mount(
            "/",
            rocket::routes![
                routes::health,
                routes::stats,
                routes::channel_stats,
                routes::unread_feed,
                routes::earlier_feed,
                routes::channel_oldest_feed,
                routes::channel_after_feed,
                routes::bookmarks_feed,
                routes::unread_counts,
                routes::group_tags,
                routes::mark_read,
                routes::set_rating,
                routes::set_bookmark,
                routes::set_anchor,
                routes::set_hidden,
                routes::list_channels,
                routes::set_channel_active,
                routes::set_channel_group,
                routes::set_channel_download_all,
                routes::set_channel_backup_path,
                routes::set_channel_media_kinds,
                routes::list_groups,
                routes::create_group,
                routes::rename_group,
                routes::set_group_dedup,
                routes::delete_group,
                routes::list_exclusions,
                routes::add_exclusion,
                routes::delete_exclusion,
                routes::search_messages,
                routes::download_media_on_demand,
            ],
        )
        .mount("/media", FileServer::new(media_dir, Options::Missing))
        .mount("/photos", FileServer::new(photos_dir, Options::Missing))
        .mount("/telegraph", FileServer::new(telegraph_dir, Options::Missing))
}

/// Reader server against the configured data directory.
pub fn rocket_from_env() -> rocket::Rocket<rocket::Build> {
    let config = Config::from_env();
    let store = Store::open(&config.db_path()).expect("Failed to open store");
    rocket_with_store(config, store)
}
