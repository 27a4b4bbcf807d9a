use actix_web::{HttpResponse, delete, get, patch, post, web};
use pulse::EndpointId;
use pulse::validation::{validate_endpoint, validate_expected_status, validate_interval, validate_name, validate_url};
use storage::{EndpointPatch, NewEndpoint};

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::state::AppState;

macros_utils::routes! {
    scope "/endpoints",
    route create_endpoint,
    route list_endpoints,
    route get_endpoint,
    route update_endpoint,
    route delete_endpoint,
}

fn validate_new(endpoint: &NewEndpoint, min_interval: u32) -> Result<(), AppError> {
    validate_name(&endpoint.name)?;
    validate_url(&endpoint.url)?;
    validate_expected_status(endpoint.expected_status)?;
    validate_interval(endpoint.interval_seconds, min_interval)?;
    Ok(())
}

#[post("")]
pub async fn create_endpoint(
    state: web::Data<AppState>,
    AuthUser(user_id): AuthUser,
    payload: web::Json<NewEndpoint>,
) -> Result<HttpResponse, AppError> {
    let new = payload.into_inner();
    validate_new(&new, state.min_interval_seconds)?;

    let endpoint = state.storage.endpoints().create(user_id, new).await?;
    Ok(HttpResponse::Created().json(endpoint))
}

#[get("")]
pub async fn list_endpoints(
    state: web::Data<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<HttpResponse, AppError> {
    let endpoints = state.storage.endpoints().list_for_user(user_id).await?;
    Ok(HttpResponse::Ok().json(endpoints))
}

#[get("/{endpoint_id}")]
pub async fn get_endpoint(
    state: web::Data<AppState>,
    AuthUser(user_id): AuthUser,
    path: web::Path<EndpointId>,
) -> Result<HttpResponse, AppError> {
    let endpoint = state
        .storage
        .endpoints()
        .get_for_user(user_id, path.into_inner())
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(HttpResponse::Ok().json(endpoint))
}

#[patch("/{endpoint_id}")]
pub async fn update_endpoint(
    state: web::Data<AppState>,
    AuthUser(user_id): AuthUser,
    path: web::Path<EndpointId>,
    payload: web::Json<EndpointPatch>,
) -> Result<HttpResponse, AppError> {
    let min_interval = state.min_interval_seconds;
    let updated = state
        .storage
        .endpoints()
        .update(user_id, path.into_inner(), &payload, |merged| validate_endpoint(merged, min_interval))
        .await?
        .ok_or(AppError::NotFound)??;
    Ok(HttpResponse::Ok().json(updated))
}

#[delete("/{endpoint_id}")]
pub async fn delete_endpoint(
    state: web::Data<AppState>,
    AuthUser(user_id): AuthUser,
    path: web::Path<EndpointId>,
) -> Result<HttpResponse, AppError> {
    if state.storage.endpoints().delete(user_id, path.into_inner()).await? {
        Ok(HttpResponse::NoContent().finish())
    } else {
        Err(AppError::NotFound)
    }
}
