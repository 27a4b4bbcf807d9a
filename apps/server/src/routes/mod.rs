use actix_web::web::ServiceConfig;

use crate::error::configure_extractors;

mod auth;
mod endpoints;
mod health;
mod logs;

pub fn routes(cfg: &mut ServiceConfig) {
    cfg.configure(configure_extractors)
        .configure(health::routes)
        .configure(auth::routes)
        .configure(endpoints::routes)
        .configure(logs::routes);
}
