use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use stream_desk_rs::api;
use stream_desk_rs::batch::{BatchCoordinator, BatchTimings};
use stream_desk_rs::config::Settings;
use stream_desk_rs::context::DeskContext;
use stream_desk_rs::desk_state::DeskState;
use stream_desk_rs::feeds;
use stream_desk_rs::persistence::redb_store::RedbStore;
use stream_desk_rs::persistence::store::PersistenceStore;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let settings = Settings::new().unwrap_or_else(|e| {
        warn!("Failed to load settings, using defaults: {}", e);
        Settings::default()
    });
    let engine = settings.engine();
    let port = settings
        .server
        .as_ref()
        .and_then(|s| s.port)
        .unwrap_or(8085);

    let ctx = DeskContext::new_system();

    let persistence = match RedbStore::new(&engine.db_path) {
        Ok(store) => Some(Arc::new(PersistenceStore::new(Arc::new(store)))),
        Err(e) => {
            warn!("Running without persistence: {}", e);
            None
        }
    };

    let mut desk = DeskState::new(ctx.clone(), engine.staging_debounce_ms, persistence.clone());
    let persisted = persistence
        .as_ref()
        .and_then(|store| store.load_streams().ok())
        .unwrap_or_default();
    if persisted.is_empty() {
        info!("No persisted streams, seeding catalog");
        desk.load(feeds::seed_catalog(&ctx));
    } else {
        desk.load(persisted);
    }

    let desk = Arc::new(RwLock::new(desk));

    let timings = BatchTimings {
        batch_size: engine.batch_size,
        launch_stagger: Duration::from_millis(engine.launch_stagger_ms),
        pause_stagger: Duration::from_millis(engine.pause_stagger_ms),
        launch_latency: Duration::from_millis(engine.launch_latency_ms),
        side_launch_latency: Duration::from_millis(engine.side_launch_latency_ms),
    };
    let coordinator = Arc::new(BatchCoordinator::new(desk.clone(), ctx.clone(), timings));

    // Feed simulator + debounced staging reconciliation
    {
        let desk = desk.clone();
        let ctx = ctx.clone();
        let tick_ms = engine.feed_tick_ms;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
            loop {
                interval.tick().await;
                let mut state = desk.write();
                feeds::tick(&mut state, &ctx);
                state.poll_staging();
            }
        });
    }

    // Staging flags settle faster than the feed tick
    {
        let desk = desk.clone();
        let poll_ms = (engine.staging_debounce_ms as u64 / 3).max(50);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(poll_ms));
            loop {
                interval.tick().await;
                desk.write().poll_staging();
            }
        });
    }

    info!("Stream desk listening on port {}", port);

    let engine_data = web::Data::new(engine);
    let desk_data = web::Data::new(desk);
    let coordinator_data = web::Data::new(coordinator);

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(desk_data.clone())
            .app_data(coordinator_data.clone())
            .app_data(engine_data.clone())
            .configure(api::config)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
