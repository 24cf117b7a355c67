use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use growflow_engine::{dates, MetricValue, NoteEntry, PhaseEvent, WateringEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::commands::{self, parse_phase_input, CommandError, PlantCommand};
use crate::db::Db;
use crate::mqtt::MetricsPublisher;
use crate::state::{PlantSlot, SharedState};

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub db: Db,
    /// Absent when running without a broker (tests).
    pub publisher: Option<MetricsPublisher>,
}

type FlatMetrics = BTreeMap<String, MetricValue>;

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct PhaseBody {
    phase: String,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Deserialize)]
struct WaterBody {
    volume_ml: i64,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Deserialize)]
struct DateBody {
    date: String,
}

#[derive(Deserialize)]
struct VolumeBody {
    volume_ml: i64,
}

#[derive(Deserialize)]
struct NoteBody {
    note: String,
}

#[derive(Deserialize)]
struct StrainBody {
    strain: String,
}

#[derive(Serialize)]
struct PlantSummary {
    plant_id: String,
    name: String,
    strain: Option<String>,
    current_phase: &'static str,
    current_phase_label: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(plant_id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: format!("unknown plant '{plant_id}'"),
        }
    }
}

impl From<CommandError> for ApiError {
    fn from(e: CommandError) -> Self {
        let status = match &e {
            CommandError::UnknownPlant(_) => StatusCode::NOT_FOUND,
            CommandError::Rejected(_) | CommandError::InvalidStrain(_) => StatusCode::BAD_REQUEST,
            CommandError::Persist(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/plants", get(list_plants))
        .route("/api/plants/{id}/metrics", get(plant_metrics))
        .route("/api/plants/{id}/phase-history", get(phase_history))
        .route("/api/plants/{id}/watering-history", get(watering_history))
        .route("/api/plants/{id}/notes", get(notes).post(add_note))
        .route("/api/plants/{id}/strain", put(set_strain))
        .route("/api/plants/{id}/phase", post(change_phase))
        .route("/api/plants/{id}/water", post(water))
        .route("/api/plants/{id}/water/quick", post(quick_water))
        .route("/api/plants/{id}/created-date", put(set_created_date))
        .route(
            "/api/plants/{id}/default-water-volume",
            put(set_default_water_volume),
        )
        .with_state(state)
}

async fn api_status(State(app): State<AppState>) -> impl IntoResponse {
    let st = app.shared.read().await;
    Json(st.to_status())
}

fn summary(plant_id: &str, slot: &PlantSlot) -> PlantSummary {
    PlantSummary {
        plant_id: plant_id.to_string(),
        name: slot.name.clone(),
        strain: slot.strain.clone(),
        current_phase: slot.plant.current_phase().as_str(),
        current_phase_label: slot.plant.current_phase().label(),
    }
}

async fn list_plants(State(app): State<AppState>) -> Json<Vec<PlantSummary>> {
    let st = app.shared.read().await;
    Json(st.plants.iter().map(|(id, slot)| summary(id, slot)).collect())
}

async fn plant_metrics(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FlatMetrics>, ApiError> {
    let st = app.shared.read().await;
    let slot = st.plants.get(&id).ok_or_else(|| ApiError::not_found(&id))?;
    Ok(Json(slot.plant.snapshot(st.now()).to_flat()))
}

async fn phase_history(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<PhaseEvent>>, ApiError> {
    let st = app.shared.read().await;
    let slot = st.plants.get(&id).ok_or_else(|| ApiError::not_found(&id))?;
    Ok(Json(slot.plant.phase_history()))
}

async fn watering_history(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<WateringEvent>>, ApiError> {
    let st = app.shared.read().await;
    let slot = st.plants.get(&id).ok_or_else(|| ApiError::not_found(&id))?;
    Ok(Json(slot.plant.watering_history()))
}

async fn notes(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<NoteEntry>>, ApiError> {
    let st = app.shared.read().await;
    let slot = st.plants.get(&id).ok_or_else(|| ApiError::not_found(&id))?;
    Ok(Json(slot.plant.note_history()))
}

async fn add_note(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<NoteBody>,
) -> Result<Json<FlatMetrics>, ApiError> {
    run_command(&app, &id, PlantCommand::AddNote(body.note)).await
}

async fn set_strain(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<StrainBody>,
) -> Result<Json<PlantSummary>, ApiError> {
    commands::set_strain(&app.shared, &app.db, &id, &body.strain).await?;
    let st = app.shared.read().await;
    let slot = st.plants.get(&id).ok_or_else(|| ApiError::not_found(&id))?;
    Ok(Json(summary(&id, slot)))
}

async fn change_phase(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PhaseBody>,
) -> Result<Json<FlatMetrics>, ApiError> {
    let phase = parse_phase_input(&body.phase).map_err(|e| ApiError::bad_request(e.to_string()))?;
    run_command(
        &app,
        &id,
        PlantCommand::ChangePhase {
            phase,
            notes: body.notes,
        },
    )
    .await
}

async fn water(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<WaterBody>,
) -> Result<Json<FlatMetrics>, ApiError> {
    run_command(
        &app,
        &id,
        PlantCommand::Water {
            volume_ml: body.volume_ml,
            notes: body.notes,
        },
    )
    .await
}

async fn quick_water(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FlatMetrics>, ApiError> {
    run_command(&app, &id, PlantCommand::QuickWater).await
}

async fn set_created_date(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DateBody>,
) -> Result<Json<FlatMetrics>, ApiError> {
    let date = dates::parse_date(&body.date).map_err(|e| ApiError::bad_request(e.to_string()))?;
    run_command(&app, &id, PlantCommand::SetCreatedDate(date)).await
}

async fn set_default_water_volume(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<VolumeBody>,
) -> Result<Json<FlatMetrics>, ApiError> {
    run_command(&app, &id, PlantCommand::SetDefaultWaterVolume(body.volume_ml)).await
}

/// Execute, then republish the refreshed snapshot. A publish failure is
/// logged but does not fail the request; the mutation is already persisted.
async fn run_command(
    app: &AppState,
    plant_id: &str,
    cmd: PlantCommand,
) -> Result<Json<FlatMetrics>, ApiError> {
    let snapshot = commands::execute(&app.shared, &app.db, plant_id, cmd).await?;
    if let Some(publisher) = &app.publisher {
        if let Err(e) = publisher.publish(plant_id, &snapshot).await {
            error!(plant = %plant_id, "web: {e:#}");
        }
    }
    Ok(Json(snapshot.to_flat()))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("web api listening on http://{addr}");

    axum::serve(listener, router(state))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::HubState;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use growflow_engine::{Phase, Plant, StoredPlant};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use time::macros::date;
    use time::UtcOffset;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    async fn test_app() -> AppState {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let plant = Plant::create(
            "p1",
            date!(2024 - 01 - 01),
            Phase::EarlyVeg,
            500,
            date!(2024 - 01 - 01),
        )
        .unwrap();
        db.insert_plant("Plant 1", Some("Gelato"), &plant.to_stored())
            .await
            .unwrap();

        let mut st = HubState::new(UtcOffset::UTC);
        st.insert_plant("Plant 1".into(), Some("Gelato".into()), plant);
        AppState {
            shared: Arc::new(RwLock::new(st)),
            db,
            publisher: None,
        }
    }

    async fn send(
        app: &AppState,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                req = req.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let resp = router(app.clone())
            .oneshot(req.body(body).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    async fn stored(app: &AppState) -> StoredPlant {
        let row = app.db.get_plant("p1").await.unwrap().unwrap();
        serde_json::from_str(&row.state_json).unwrap()
    }

    // -- reads --------------------------------------------------------------

    #[tokio::test]
    async fn status_lists_plants() {
        let app = test_app().await;
        let (status, json) = send(&app, Method::GET, "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["plants"][0], "p1");
        assert_eq!(json["mqtt_connected"], false);
    }

    #[tokio::test]
    async fn list_plants_summary() {
        let app = test_app().await;
        let (status, json) = send(&app, Method::GET, "/api/plants", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["plant_id"], "p1");
        assert_eq!(json[0]["strain"], "Gelato");
        assert_eq!(json[0]["current_phase_label"], "Early Veg");
    }

    #[tokio::test]
    async fn metrics_flat_snapshot() {
        let app = test_app().await;
        let (status, json) = send(&app, Method::GET, "/api/plants/p1/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["current_phase"], "early_veg");
        assert!(json["days_since_watering"].is_null());
        assert_eq!(json["watering_status"], "never_watered");
        assert!(json["days_in_early_veg"].is_i64());
    }

    #[tokio::test]
    async fn metrics_unknown_plant_404() {
        let app = test_app().await;
        let (status, json) = send(&app, Method::GET, "/api/plants/nope/metrics", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "unknown plant 'nope'");
    }

    #[tokio::test]
    async fn phase_history_returns_ledger() {
        let app = test_app().await;
        let (status, json) = send(&app, Method::GET, "/api/plants/p1/phase-history", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["date"], "2024-01-01");
        assert_eq!(json[0]["phase"], "early_veg");
    }

    // -- mutations ----------------------------------------------------------

    #[tokio::test]
    async fn change_phase_persists() {
        let app = test_app().await;
        let (status, json) = send(
            &app,
            Method::POST,
            "/api/plants/p1/phase",
            Some(serde_json::json!({"phase": "mid_late_veg", "notes": "topped"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["current_phase"], "mid_late_veg");
        assert_eq!(json["days_in_current_phase"], 0);

        let s = stored(&app).await;
        assert_eq!(s.current_phase, "mid_late_veg");
        assert_eq!(s.phase_ledger[1].notes.as_deref(), Some("topped"));
    }

    #[tokio::test]
    async fn change_phase_legacy_token_400() {
        let app = test_app().await;
        let (status, json) = send(
            &app,
            Method::POST,
            "/api/plants/p1/phase",
            Some(serde_json::json!({"phase": "flowering"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "'flowering' is not a selectable phase");
    }

    #[tokio::test]
    async fn water_then_history() {
        let app = test_app().await;
        let (status, json) = send(
            &app,
            Method::POST,
            "/api/plants/p1/water",
            Some(serde_json::json!({"volume_ml": 800})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total_watering_sessions"], 1);
        assert_eq!(json["days_since_watering"], 0);

        let (_, history) =
            send(&app, Method::GET, "/api/plants/p1/watering-history", None).await;
        assert_eq!(history[0]["volume_ml"], 800);
        assert_eq!(history[0]["phase_at_time"], "early_veg");
    }

    #[tokio::test]
    async fn water_out_of_range_400_and_unchanged() {
        let app = test_app().await;
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/plants/p1/water",
            Some(serde_json::json!({"volume_ml": 10_001})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(stored(&app).await.watering_ledger.is_empty());
    }

    #[tokio::test]
    async fn quick_water_uses_default() {
        let app = test_app().await;
        let (status, _) = send(
            &app,
            Method::PUT,
            "/api/plants/p1/default-water-volume",
            Some(serde_json::json!({"volume_ml": 1500})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, json) = send(&app, Method::POST, "/api/plants/p1/water/quick", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["water_this_week"], 1500);
        assert_eq!(stored(&app).await.watering_ledger[0].volume_ml, 1500);
    }

    #[tokio::test]
    async fn quick_water_unknown_plant_404() {
        let app = test_app().await;
        let (status, _) = send(&app, Method::POST, "/api/plants/ghost/water/quick", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn created_date_update() {
        let app = test_app().await;
        let (status, json) = send(
            &app,
            Method::PUT,
            "/api/plants/p1/created-date",
            Some(serde_json::json!({"date": "2023-12-01"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["created_date"], "2023-12-01");
        assert_eq!(stored(&app).await.created_date, "2023-12-01");
    }

    #[tokio::test]
    async fn created_date_malformed_400() {
        let app = test_app().await;
        let (status, json) = send(
            &app,
            Method::PUT,
            "/api/plants/p1/created-date",
            Some(serde_json::json!({"date": "yesterday"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "invalid date 'yesterday'");
    }

    #[tokio::test]
    async fn add_note_then_list() {
        let app = test_app().await;
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/plants/p1/notes",
            Some(serde_json::json!({"note": "first pistils"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, json) = send(&app, Method::GET, "/api/plants/p1/notes", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["note"], "first pistils");
        assert!(json[0]["timestamp"].is_string());
        assert_eq!(stored(&app).await.notes.len(), 1);
    }

    #[tokio::test]
    async fn add_blank_note_400() {
        let app = test_app().await;
        let (status, json) = send(
            &app,
            Method::POST,
            "/api/plants/p1/notes",
            Some(serde_json::json!({"note": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "invalid note: note is empty");
    }

    #[tokio::test]
    async fn strain_update_shows_in_listing() {
        let app = test_app().await;
        let (status, json) = send(
            &app,
            Method::PUT,
            "/api/plants/p1/strain",
            Some(serde_json::json!({"strain": "Wedding Cake"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["strain"], "Wedding Cake");

        let (_, json) = send(&app, Method::GET, "/api/plants", None).await;
        assert_eq!(json[0]["strain"], "Wedding Cake");
        let row = app.db.get_plant("p1").await.unwrap().unwrap();
        assert_eq!(row.strain.as_deref(), Some("Wedding Cake"));
    }

    #[tokio::test]
    async fn strain_with_bad_characters_400() {
        let app = test_app().await;
        let (status, _) = send(
            &app,
            Method::PUT,
            "/api/plants/p1/strain",
            Some(serde_json::json!({"strain": "<script>"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            app.shared.read().await.plants["p1"].strain.as_deref(),
            Some("Gelato")
        );
    }
}
