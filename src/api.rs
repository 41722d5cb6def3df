//! HTTP surface over the desk state and batch coordinator. Thin handlers:
//! every operation maps 1:1 onto a desk-state or coordinator entry point.

use actix_web::{web, HttpResponse, Responder};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::batch::{BatchCoordinator, BatchVariant};
use crate::config::EngineConfig;
use crate::desk_state::{DeskError, DeskState, LaunchOutcome};
use crate::model::{PriceMode, PriceSource, Side};
use crate::validation;
use crate::persistence::redb_store::StoreError;
use crate::persistence::store::{DeskUiState, ScannerSettings, SpreadDefaults};
use crate::view::{self, ViewFilter};

pub type SharedDesk = Arc<RwLock<DeskState>>;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn desk_error(e: DeskError) -> HttpResponse {
    match e {
        DeskError::UnknownStream(_) => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": e.to_string() }))
        }
        _ => HttpResponse::Conflict().json(serde_json::json!({ "error": e.to_string() })),
    }
}

fn outcome_response(outcome: LaunchOutcome) -> HttpResponse {
    match outcome {
        LaunchOutcome::Launched => HttpResponse::Ok().json(serde_json::json!({
            "outcome": "launched"
        })),
        LaunchOutcome::Halted(result) => HttpResponse::Ok().json(serde_json::json!({
            "outcome": "halted",
            "validation": result
        })),
        LaunchOutcome::MissingPriceSource => HttpResponse::Ok().json(serde_json::json!({
            "outcome": "missing_price_source"
        })),
        LaunchOutcome::ManualPriceError(side) => HttpResponse::Ok().json(serde_json::json!({
            "outcome": "manual_price_error",
            "side": side
        })),
        LaunchOutcome::Refused => HttpResponse::Ok().json(serde_json::json!({
            "outcome": "refused"
        })),
    }
}

fn parse_side(raw: &str) -> Option<Side> {
    match raw.to_lowercase().as_str() {
        "bid" => Some(Side::Bid),
        "ask" => Some(Side::Ask),
        _ => None,
    }
}

// --- Read endpoints ---

pub async fn get_streams(desk: web::Data<SharedDesk>) -> impl Responder {
    let state = desk.read();
    HttpResponse::Ok().json(serde_json::json!({ "streams": state.streams() }))
}

pub async fn get_filtered_streams(
    desk: web::Data<SharedDesk>,
    filter: web::Json<ViewFilter>,
) -> impl Responder {
    let state = desk.read();
    let projected = view::filter_streams(state.streams(), &filter);
    HttpResponse::Ok().json(serde_json::json!({ "streams": projected }))
}

// --- Single-stream operations ---

pub async fn launch_stream(
    desk: web::Data<SharedDesk>,
    engine: web::Data<EngineConfig>,
    path: web::Path<String>,
) -> impl Responder {
    // Simulated OMS round trip on a point-in-time copy; the launch itself
    // re-validates under the write lock.
    let Some(stream) = desk.read().get_stream(&path).cloned() else {
        return HttpResponse::NotFound()
            .json(serde_json::json!({ "error": format!("Unknown stream: {}", path) }));
    };
    validation::validate_with_latency(
        &stream,
        None,
        Duration::from_millis(engine.launch_latency_ms),
    )
    .await;
    let result = desk.write().launch_stream(&path);
    match result {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => desk_error(e),
    }
}

pub async fn pause_stream(desk: web::Data<SharedDesk>, path: web::Path<String>) -> impl Responder {
    match desk.write().pause_stream(&path) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "outcome": "paused" })),
        Err(e) => desk_error(e),
    }
}

pub async fn revert_stream(desk: web::Data<SharedDesk>, path: web::Path<String>) -> impl Responder {
    match desk.write().revert_staging(&path) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "outcome": "reverted" })),
        Err(e) => desk_error(e),
    }
}

pub async fn delete_stream(desk: web::Data<SharedDesk>, path: web::Path<String>) -> impl Responder {
    match desk.write().delete_stream(&path) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "outcome": "deleted" })),
        Err(e) => desk_error(e),
    }
}

pub async fn dismiss_price_source_banner(
    desk: web::Data<SharedDesk>,
    path: web::Path<String>,
) -> impl Responder {
    match desk.write().dismiss_missing_price_source(&path) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "outcome": "dismissed" })),
        Err(e) => desk_error(e),
    }
}

// --- Side / level operations ---

pub async fn launch_side(
    desk: web::Data<SharedDesk>,
    engine: web::Data<EngineConfig>,
    path: web::Path<(String, String)>,
) -> impl Responder {
    let (stream_id, side_raw) = path.into_inner();
    let Some(side) = parse_side(&side_raw) else {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "side must be bid or ask" }));
    };
    let Some(stream) = desk.read().get_stream(&stream_id).cloned() else {
        return HttpResponse::NotFound()
            .json(serde_json::json!({ "error": format!("Unknown stream: {}", stream_id) }));
    };
    validation::validate_with_latency(
        &stream,
        Some(side),
        Duration::from_millis(engine.side_launch_latency_ms),
    )
    .await;
    match desk.write().relaunch_side(&stream_id, side) {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => desk_error(e),
    }
}

pub async fn pause_side(
    desk: web::Data<SharedDesk>,
    path: web::Path<(String, String)>,
) -> impl Responder {
    let (stream_id, side_raw) = path.into_inner();
    let Some(side) = parse_side(&side_raw) else {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "side must be bid or ask" }));
    };
    match desk.write().pause_side(&stream_id, side) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "outcome": "paused" })),
        Err(e) => desk_error(e),
    }
}

pub async fn launch_level(
    desk: web::Data<SharedDesk>,
    engine: web::Data<EngineConfig>,
    path: web::Path<(String, String, u8)>,
) -> impl Responder {
    let (stream_id, side_raw, level) = path.into_inner();
    let Some(side) = parse_side(&side_raw) else {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "side must be bid or ask" }));
    };
    // Fixed artificial delay for UI feedback; validation itself is sync here
    tokio::time::sleep(Duration::from_millis(engine.side_launch_latency_ms)).await;
    match desk.write().launch_level(&stream_id, side, level) {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => desk_error(e),
    }
}

pub async fn pause_level(
    desk: web::Data<SharedDesk>,
    path: web::Path<(String, String, u8)>,
) -> impl Responder {
    let (stream_id, side_raw, level) = path.into_inner();
    let Some(side) = parse_side(&side_raw) else {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "side must be bid or ask" }));
    };
    match desk.write().pause_level(&stream_id, side, level) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "outcome": "paused" })),
        Err(e) => desk_error(e),
    }
}

// --- Field edits ---

#[derive(Deserialize)]
pub struct PriceSourceBody {
    pub source: PriceSource,
}

pub async fn set_price_source(
    desk: web::Data<SharedDesk>,
    path: web::Path<String>,
    body: web::Json<PriceSourceBody>,
) -> impl Responder {
    match desk
        .write()
        .set_price_source(&path, body.into_inner().source)
    {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "outcome": "updated" })),
        Err(e) => desk_error(e),
    }
}

#[derive(Deserialize)]
pub struct ManualPriceBody {
    #[serde(default)]
    pub side: Option<Side>,
    pub value: Decimal,
}

pub async fn set_manual_price(
    desk: web::Data<SharedDesk>,
    path: web::Path<String>,
    body: web::Json<ManualPriceBody>,
) -> impl Responder {
    let body = body.into_inner();
    match desk.write().set_manual_price(&path, body.side, body.value) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "outcome": "updated" })),
        Err(e) => desk_error(e),
    }
}

// --- Desk settings ---

fn store_error(e: StoreError) -> HttpResponse {
    HttpResponse::InternalServerError().json(serde_json::json!({ "error": e.to_string() }))
}

pub async fn get_ui_state(desk: web::Data<SharedDesk>) -> impl Responder {
    let state = desk.read();
    match state.persistence() {
        Some(store) => match store.load_ui_state() {
            Ok(ui) => HttpResponse::Ok().json(ui),
            Err(e) => store_error(e),
        },
        None => HttpResponse::Ok().json(DeskUiState::default()),
    }
}

pub async fn put_ui_state(
    desk: web::Data<SharedDesk>,
    body: web::Json<DeskUiState>,
) -> impl Responder {
    let state = desk.read();
    match state.persistence() {
        Some(store) => match store.save_ui_state(&body) {
            Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "outcome": "saved" })),
            Err(e) => store_error(e),
        },
        None => HttpResponse::Ok().json(serde_json::json!({ "outcome": "not_persisted" })),
    }
}

pub async fn get_scanner_settings(desk: web::Data<SharedDesk>) -> impl Responder {
    let state = desk.read();
    match state.persistence() {
        Some(store) => match store.load_scanner_settings() {
            Ok(settings) => HttpResponse::Ok().json(settings),
            Err(e) => store_error(e),
        },
        None => HttpResponse::Ok().json(ScannerSettings::default()),
    }
}

pub async fn put_scanner_settings(
    desk: web::Data<SharedDesk>,
    body: web::Json<ScannerSettings>,
) -> impl Responder {
    let state = desk.read();
    match state.persistence() {
        Some(store) => match store.save_scanner_settings(&body) {
            Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "outcome": "saved" })),
            Err(e) => store_error(e),
        },
        None => HttpResponse::Ok().json(serde_json::json!({ "outcome": "not_persisted" })),
    }
}

#[derive(Serialize, Deserialize)]
pub struct SpreadSettingsBody {
    #[serde(default)]
    pub step_size: Option<Decimal>,
    #[serde(default)]
    pub defaults: Option<SpreadDefaults>,
}

pub async fn get_spread_settings(desk: web::Data<SharedDesk>) -> impl Responder {
    let state = desk.read();
    match state.persistence() {
        Some(store) => {
            let step_size = match store.load_step_size() {
                Ok(v) => v,
                Err(e) => return store_error(e),
            };
            // Legacy flat-array values migrate transparently on this read
            let defaults = match store.load_spread_defaults() {
                Ok(v) => v,
                Err(e) => return store_error(e),
            };
            HttpResponse::Ok().json(SpreadSettingsBody { step_size, defaults })
        }
        None => HttpResponse::Ok().json(SpreadSettingsBody {
            step_size: None,
            defaults: None,
        }),
    }
}

pub async fn put_spread_settings(
    desk: web::Data<SharedDesk>,
    body: web::Json<SpreadSettingsBody>,
) -> impl Responder {
    let state = desk.read();
    let Some(store) = state.persistence() else {
        return HttpResponse::Ok().json(serde_json::json!({ "outcome": "not_persisted" }));
    };
    if let Some(step) = body.step_size {
        if let Err(e) = store.save_step_size(step) {
            return store_error(e);
        }
    }
    if let Some(defaults) = &body.defaults {
        if let Err(e) = store.save_spread_defaults(defaults) {
            return store_error(e);
        }
    }
    HttpResponse::Ok().json(serde_json::json!({ "outcome": "saved" }))
}

// --- Batch entry points ---

#[derive(Deserialize)]
pub struct BatchSourceBody {
    #[serde(default)]
    pub filter: ViewFilter,
    pub source: PriceSource,
}

pub async fn batch_price_source(
    coordinator: web::Data<Arc<BatchCoordinator>>,
    body: web::Json<BatchSourceBody>,
) -> impl Responder {
    let body = body.into_inner();
    match coordinator.set_price_source(&body.filter, body.source) {
        Ok(count) => HttpResponse::Ok().json(serde_json::json!({ "updated": count })),
        Err(e) => desk_error(e),
    }
}

#[derive(Deserialize)]
pub struct BatchModeBody {
    #[serde(default)]
    pub filter: ViewFilter,
    pub mode: PriceMode,
}

pub async fn batch_price_mode(
    coordinator: web::Data<Arc<BatchCoordinator>>,
    body: web::Json<BatchModeBody>,
) -> impl Responder {
    let body = body.into_inner();
    match coordinator.set_price_mode(&body.filter, body.mode) {
        Ok(count) => HttpResponse::Ok().json(serde_json::json!({ "updated": count })),
        Err(e) => desk_error(e),
    }
}

#[derive(Deserialize)]
pub struct BatchMaxLevelsBody {
    #[serde(default)]
    pub filter: ViewFilter,
    #[serde(default)]
    pub bid: Option<u8>,
    #[serde(default)]
    pub ask: Option<u8>,
}

pub async fn batch_max_levels(
    coordinator: web::Data<Arc<BatchCoordinator>>,
    body: web::Json<BatchMaxLevelsBody>,
) -> impl Responder {
    let body = body.into_inner();
    match coordinator.set_max_lvls(&body.filter, body.bid, body.ask) {
        Ok(count) => HttpResponse::Ok().json(serde_json::json!({ "updated": count })),
        Err(e) => desk_error(e),
    }
}

#[derive(Deserialize)]
pub struct BatchQuantityBody {
    #[serde(default)]
    pub filter: ViewFilter,
    pub quantity: i64,
}

pub async fn batch_quantity(
    coordinator: web::Data<Arc<BatchCoordinator>>,
    body: web::Json<BatchQuantityBody>,
) -> impl Responder {
    let body = body.into_inner();
    match coordinator.set_quantity(&body.filter, body.quantity) {
        Ok(count) => HttpResponse::Ok().json(serde_json::json!({ "updated": count })),
        Err(e) => desk_error(e),
    }
}

#[derive(Deserialize)]
pub struct BatchSpreadBody {
    #[serde(default)]
    pub filter: ViewFilter,
    pub adjustment_bps: Decimal,
}

pub async fn batch_spread_adjust(
    coordinator: web::Data<Arc<BatchCoordinator>>,
    body: web::Json<BatchSpreadBody>,
) -> impl Responder {
    let body = body.into_inner();
    match coordinator.adjust_spreads(&body.filter, body.adjustment_bps) {
        Ok(count) => HttpResponse::Ok().json(serde_json::json!({ "updated": count })),
        Err(e) => desk_error(e),
    }
}

#[derive(Deserialize)]
pub struct BatchPipelineBody {
    #[serde(default)]
    pub filter: ViewFilter,
    pub variant: BatchVariant,
}

pub async fn batch_launch(
    coordinator: web::Data<Arc<BatchCoordinator>>,
    body: web::Json<BatchPipelineBody>,
) -> impl Responder {
    let body = body.into_inner();
    let ledger_id = coordinator.prepare_launch(&body.filter, body.variant);
    let coord = coordinator.get_ref().clone();
    let id = ledger_id.clone();
    tokio::spawn(async move { coord.run_launch(&id).await });
    HttpResponse::Accepted().json(serde_json::json!({ "ledger_id": ledger_id }))
}

pub async fn batch_pause(
    coordinator: web::Data<Arc<BatchCoordinator>>,
    body: web::Json<BatchPipelineBody>,
) -> impl Responder {
    let body = body.into_inner();
    let ledger_id = coordinator.prepare_pause(&body.filter, body.variant);
    let coord = coordinator.get_ref().clone();
    let id = ledger_id.clone();
    tokio::spawn(async move { coord.run_pause(&id).await });
    HttpResponse::Accepted().json(serde_json::json!({ "ledger_id": ledger_id }))
}

pub async fn get_ledger(
    coordinator: web::Data<Arc<BatchCoordinator>>,
    path: web::Path<String>,
) -> impl Responder {
    match coordinator.get_ledger(&path) {
        Some(ledger) => HttpResponse::Ok().json(ledger),
        None => HttpResponse::NotFound().json(serde_json::json!({ "error": "unknown ledger" })),
    }
}

pub async fn dismiss_ledger(
    coordinator: web::Data<Arc<BatchCoordinator>>,
    path: web::Path<String>,
) -> impl Responder {
    if coordinator.dismiss_ledger(&path) {
        HttpResponse::Ok().json(serde_json::json!({ "outcome": "dismissed" }))
    } else {
        HttpResponse::NotFound().json(serde_json::json!({ "error": "unknown ledger" }))
    }
}

// Route table
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health_check)))
        .service(web::resource("/streams").route(web::get().to(get_streams)))
        .service(web::resource("/streams/view").route(web::post().to(get_filtered_streams)))
        .service(web::resource("/streams/{id}/launch").route(web::post().to(launch_stream)))
        .service(web::resource("/streams/{id}/pause").route(web::post().to(pause_stream)))
        .service(web::resource("/streams/{id}/revert").route(web::post().to(revert_stream)))
        .service(web::resource("/streams/{id}").route(web::delete().to(delete_stream)))
        .service(
            web::resource("/streams/{id}/price-source-banner/dismiss")
                .route(web::post().to(dismiss_price_source_banner)),
        )
        .service(
            web::resource("/streams/{id}/sides/{side}/launch").route(web::post().to(launch_side)),
        )
        .service(web::resource("/streams/{id}/sides/{side}/pause").route(web::post().to(pause_side)))
        .service(
            web::resource("/streams/{id}/levels/{side}/{level}/launch")
                .route(web::post().to(launch_level)),
        )
        .service(
            web::resource("/streams/{id}/levels/{side}/{level}/pause")
                .route(web::post().to(pause_level)),
        )
        .service(
            web::resource("/streams/{id}/price-source").route(web::post().to(set_price_source)),
        )
        .service(
            web::resource("/streams/{id}/manual-price").route(web::post().to(set_manual_price)),
        )
        .service(
            web::resource("/settings/ui")
                .route(web::get().to(get_ui_state))
                .route(web::put().to(put_ui_state)),
        )
        .service(
            web::resource("/settings/scanner")
                .route(web::get().to(get_scanner_settings))
                .route(web::put().to(put_scanner_settings)),
        )
        .service(
            web::resource("/settings/spreads")
                .route(web::get().to(get_spread_settings))
                .route(web::put().to(put_spread_settings)),
        )
        .service(web::resource("/batch/price-source").route(web::post().to(batch_price_source)))
        .service(web::resource("/batch/price-mode").route(web::post().to(batch_price_mode)))
        .service(web::resource("/batch/max-levels").route(web::post().to(batch_max_levels)))
        .service(web::resource("/batch/quantity").route(web::post().to(batch_quantity)))
        .service(web::resource("/batch/spread-adjust").route(web::post().to(batch_spread_adjust)))
        .service(web::resource("/batch/launch").route(web::post().to(batch_launch)))
        .service(web::resource("/batch/pause").route(web::post().to(batch_pause)))
        .service(
            web::resource("/batch/ledgers/{id}")
                .route(web::get().to(get_ledger))
                .route(web::delete().to(dismiss_ledger)),
        );
}
