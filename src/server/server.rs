//! HTTP server bootstrap

use actix_web::{App, HttpServer, web};
use tracing::info;

use crate::server::middleware::{ConfigInjectorMiddleware, RequestIdMiddleware};
use crate::server::routes;
use crate::server::state::AppState;
use crate::utils::error::Result;

/// Run the gateway until shutdown
pub async fn run(state: AppState) -> Result<()> {
    let bind = (state.config.server.host.clone(), state.config.server.port);
    let workers = state.config.server.workers;
    info!(host = %bind.0, port = bind.1, "starting gateway");

    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(web::JsonConfig::default().limit(16 * 1024 * 1024))
            .wrap(tracing_actix_web::TracingLogger::default())
            .wrap(ConfigInjectorMiddleware)
            .wrap(RequestIdMiddleware)
            .route("/health", web::get().to(routes::health::health))
            .service(
                web::scope("/v1")
                    .route(
                        "/chat/completions",
                        web::post().to(routes::ai::chat::chat_completions),
                    )
                    .route(
                        "/completions",
                        web::post().to(routes::ai::completions::completions),
                    )
                    .route("/responses", web::post().to(routes::ai::responses::responses))
                    .route(
                        "/embeddings",
                        web::post().to(routes::ai::embeddings::embeddings),
                    )
                    .route(
                        "/images/generations",
                        web::post().to(routes::ai::images::image_generations),
                    )
                    .route(
                        "/moderations",
                        web::post().to(routes::ai::moderations::moderations),
                    )
                    .route("/audio/speech", web::post().to(routes::ai::audio::speech))
                    .route(
                        "/audio/transcriptions",
                        web::post().to(routes::ai::audio::transcriptions),
                    )
                    .route(
                        "/audio/translations",
                        web::post().to(routes::ai::audio::translations),
                    )
                    .route("/files", web::post().to(routes::ai::files::upload_file))
                    .route("/files", web::get().to(routes::ai::files::list_files))
                    .route("/models", web::get().to(routes::ai::models::list_models))
                    .service(
                        web::scope("/reactive-agents")
                            .route(
                                "/agents",
                                web::get().to(routes::control::agents::list_agents),
                            )
                            .route(
                                "/agents",
                                web::post().to(routes::control::agents::create_agent),
                            )
                            .route(
                                "/agents/{agent_id}",
                                web::delete().to(routes::control::agents::delete_agent),
                            )
                            .route(
                                "/agents/{agent_id}/skills",
                                web::get().to(routes::control::skills::list_skills),
                            )
                            .route(
                                "/agents/{agent_id}/skills",
                                web::post().to(routes::control::skills::create_skill),
                            )
                            .route(
                                "/skills/{skill_id}",
                                web::put().to(routes::control::skills::update_skill),
                            )
                            .route(
                                "/skills/{skill_id}",
                                web::delete().to(routes::control::skills::delete_skill),
                            )
                            .route(
                                "/models",
                                web::get().to(routes::control::models::list_models),
                            )
                            .route(
                                "/models",
                                web::post().to(routes::control::models::create_model),
                            )
                            .route(
                                "/providers",
                                web::get().to(routes::control::providers::list_providers),
                            )
                            .route(
                                "/providers/keys",
                                web::get().to(routes::control::providers::list_api_keys),
                            )
                            .route(
                                "/providers/keys",
                                web::post().to(routes::control::providers::create_api_key),
                            )
                            .route("/logs", web::get().to(routes::control::logs::list_logs))
                            .route(
                                "/logs/{log_id}",
                                web::get().to(routes::control::logs::get_log),
                            )
                            .route(
                                "/logs/{log_id}/outputs",
                                web::get().to(routes::control::logs::get_log_outputs),
                            )
                            .route(
                                "/evaluations/methods",
                                web::get().to(routes::control::evaluations::list_methods),
                            )
                            .route(
                                "/evaluations",
                                web::get().to(routes::control::evaluations::list_runs),
                            )
                            .route(
                                "/evaluations",
                                web::post().to(routes::control::evaluations::create_run),
                            )
                            .route(
                                "/datasets",
                                web::get().to(routes::control::datasets::list_datasets),
                            )
                            .route(
                                "/datasets/{dataset_id}/logs",
                                web::get().to(routes::control::datasets::get_dataset_logs),
                            )
                            .route("/events", web::get().to(routes::control::events::events)),
                    ),
            )
    });

    if workers > 0 {
        server = server.workers(workers);
    }

    server.bind(bind)?.run().await?;
    Ok(())
}
