use actix_web::web;

mod health;
mod jobs;

pub fn routes(cfg: &mut web::ServiceConfig) {
    health::routes(cfg);
    cfg.service(web::scope("/api").configure(jobs::routes));
}
