use actix_web::{HttpResponse, delete, get, patch, post, web};
use autoping_service::database::JobId;
use autoping_service::{CreateJob, Orchestrator};
use serde::Deserialize;

use crate::error::ApiError;

macros_utils::routes! {
    route list_jobs,
    route create_job,
    route toggle_job,
    route reset_job,
    route update_email,
    route delete_job,
}

type Handler = Result<HttpResponse, ApiError>;

#[derive(Debug, Deserialize)]
pub struct EmailUpdate {
    #[serde(default)]
    pub alert_email: Option<String>,
}

/// Every job with its projected next run
#[get("/jobs")]
pub async fn list_jobs(orchestrator: web::Data<Orchestrator>) -> Handler {
    Ok(HttpResponse::Ok().json(orchestrator.list_jobs().await?))
}

/// Create a job. The first probe runs before the response is sent.
#[post("/jobs")]
pub async fn create_job(orchestrator: web::Data<Orchestrator>, body: web::Json<CreateJob>) -> Handler {
    let job = orchestrator.create_job(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(job))
}

#[patch("/jobs/{id}/toggle")]
pub async fn toggle_job(orchestrator: web::Data<Orchestrator>, id: web::Path<JobId>) -> Handler {
    Ok(HttpResponse::Ok().json(orchestrator.toggle_job(id.into_inner()).await?))
}

#[patch("/jobs/{id}/reset")]
pub async fn reset_job(orchestrator: web::Data<Orchestrator>, id: web::Path<JobId>) -> Handler {
    Ok(HttpResponse::Ok().json(orchestrator.reset_job(id.into_inner()).await?))
}

#[patch("/jobs/{id}/email")]
pub async fn update_email(
    orchestrator: web::Data<Orchestrator>,
    id: web::Path<JobId>,
    body: web::Json<EmailUpdate>,
) -> Handler {
    let job = orchestrator.update_alert_email(id.into_inner(), body.into_inner().alert_email).await?;
    Ok(HttpResponse::Ok().json(job))
}

#[delete("/jobs/{id}")]
pub async fn delete_job(orchestrator: web::Data<Orchestrator>, id: web::Path<JobId>) -> Handler {
    orchestrator.delete_job(id.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}
