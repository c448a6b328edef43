//! app.rs
use crate::handlers::{bulk_handler, operation_handler};
use actix_web::web;

pub fn init_app(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/bulk")
            .route("/import", web::post().to(bulk_handler::import_endpoint))
            .route("/export", web::post().to(bulk_handler::export_endpoint))
            .route("/update", web::put().to(bulk_handler::update_endpoint))
            .route("/delete", web::post().to(bulk_handler::delete_endpoint))
            .route("/email", web::post().to(bulk_handler::email_endpoint))
            .route(
                "/download/{operation_id}",
                web::get().to(bulk_handler::download_endpoint),
            )
            .route(
                "/audit/{user_id}",
                web::get().to(bulk_handler::audit_history_endpoint),
            )
            .service(
                web::scope("/operations")
                    .route(
                        "",
                        web::get().to(operation_handler::list_operations_endpoint),
                    )
                    .route(
                        "/{operation_id}",
                        web::get().to(operation_handler::get_operation_endpoint),
                    )
                    .route(
                        "/{operation_id}/cancel",
                        web::post().to(operation_handler::cancel_operation_endpoint),
                    ),
            ),
    );
}
