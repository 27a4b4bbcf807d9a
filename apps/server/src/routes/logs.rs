use actix_web::{HttpResponse, get, web};
use pulse::EndpointId;
use serde::Deserialize;
use storage::LogOrder;

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::state::AppState;

const MAX_LOGS: usize = 500;

macros_utils::routes! {
    scope "/logs",
    route endpoint_logs,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<usize>,
    #[serde(default)]
    pub order: LogOrder,
}

/// Most recent logs of one of the caller's endpoints, deleted ones included
#[get("/endpoint/{endpoint_id}")]
pub async fn endpoint_logs(
    state: web::Data<AppState>,
    AuthUser(user_id): AuthUser,
    path: web::Path<EndpointId>,
    query: web::Query<LogQuery>,
) -> Result<HttpResponse, AppError> {
    let endpoint_id = path.into_inner();
    if !state.storage.endpoints().is_owned_by(user_id, endpoint_id).await? {
        return Err(AppError::NotFound);
    }

    let limit = query.limit.map_or(MAX_LOGS, |limit| limit.min(MAX_LOGS));
    let logs = state.storage.logs().recent(endpoint_id, limit, query.order).await?;
    Ok(HttpResponse::Ok().json(logs))
}
