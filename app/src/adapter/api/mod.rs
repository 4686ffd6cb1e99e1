use actix_web::web::{self, Json, Path};
use actix_web::{HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::time::DateTime;
use crate::outage::{Health, OutageClient, Phase, PollOutcome};

#[derive(Clone)]
struct OutageApiState {
    clients: Vec<OutageClient>,
}

impl OutageApiState {
    fn client(&self, area: &str) -> Option<&OutageClient> {
        self.clients.iter().find(|c| c.area() == area)
    }
}

pub fn new_routes(clients: Vec<OutageClient>) -> actix_web::Scope {
    let state = OutageApiState { clients };
    web::scope("/api/outages")
        .route("", web::get().to(list_areas))
        .route("/{area}", web::get().to(get_area))
        .route("/{area}/refresh", web::post().to(refresh_area))
        .route("/{area}/postcode", web::put().to(set_postcode))
        .app_data(web::Data::new(state))
}

#[derive(Debug, Serialize)]
struct AreaSummaryDTO {
    area: String,
    postcode: String,
    phase: Phase,
    health: Health,
    count: Option<usize>,
    last_success: Option<DateTime>,
}

#[derive(Debug, Deserialize)]
struct PostcodeDTO {
    postcode: String,
}

async fn list_areas(state: web::Data<OutageApiState>) -> impl Responder {
    let areas: Vec<AreaSummaryDTO> = state
        .clients
        .iter()
        .map(|client| {
            let current = client.state();
            AreaSummaryDTO {
                count: current.snapshot.as_ref().map(|s| s.count),
                area: current.area,
                postcode: current.postcode,
                phase: current.phase,
                health: current.health,
                last_success: current.last_success,
            }
        })
        .collect();

    HttpResponse::Ok().json(areas)
}

async fn get_area(state: web::Data<OutageApiState>, area: Path<String>) -> impl Responder {
    match state.client(&area) {
        Some(client) => HttpResponse::Ok().json(client.state()),
        None => HttpResponse::NotFound().finish(),
    }
}

async fn refresh_area(state: web::Data<OutageApiState>, area: Path<String>) -> impl Responder {
    let Some(client) = state.client(&area) else {
        return HttpResponse::NotFound().finish();
    };

    tracing::info!("Manual power cut refresh requested for {}", area);

    match client.refresh().await {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => {
            tracing::error!("Error refreshing power cuts of {}: {:?}", area, e);
            HttpResponse::ServiceUnavailable().json(json!({ "error": e.to_string() }))
        }
    }
}

async fn set_postcode(
    state: web::Data<OutageApiState>,
    area: Path<String>,
    Json(dto): Json<PostcodeDTO>,
) -> impl Responder {
    let Some(client) = state.client(&area) else {
        return HttpResponse::NotFound().finish();
    };

    if dto.postcode.trim().is_empty() {
        return HttpResponse::BadRequest().json(json!({ "error": "Postcode must not be empty" }));
    }

    match client.reconfigure(&dto.postcode).await {
        Ok(_) => HttpResponse::NoContent().finish(),
        Err(e) => {
            tracing::error!("Error changing postcode of {} to {}: {:?}", area, dto.postcode, e);
            HttpResponse::ServiceUnavailable().json(json!({ "error": e.to_string() }))
        }
    }
}

fn outcome_response(outcome: PollOutcome) -> HttpResponse {
    match outcome {
        PollOutcome::Published { count, new, resolved } => HttpResponse::Ok().json(json!({
            "outcome": "published",
            "count": count,
            "new": new,
            "resolved": resolved,
        })),
        PollOutcome::Degraded(error) if error.is_transient() => {
            HttpResponse::ServiceUnavailable().json(json!({ "outcome": "transient", "error": error.message() }))
        }
        PollOutcome::Degraded(error) => {
            HttpResponse::BadGateway().json(json!({ "outcome": "permanent", "error": error.message() }))
        }
    }
}
