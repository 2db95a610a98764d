// Módulos de la aplicación
mod api;
mod app_state;
mod cache;
mod classify;
mod config;
mod documents;
mod drive;
mod error;
mod google_auth;
mod mailer;
mod models;
mod register;
mod retry;
mod sheets;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Context;
use axum::http::{header::CONTENT_TYPE, Method};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    app_state::AppState, drive::DriveClient, google_auth::ServiceAccountAuth, sheets::SheetsClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Clientes de Google (una sola cuenta de servicio para Sheets y Drive)
    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Error creando el cliente HTTP")?;
    let auth = Arc::new(
        ServiceAccountAuth::new(http.clone(), &cfg.google)
            .context("Credenciales de Google inválidas")?,
    );
    let records = Arc::new(SheetsClient::new(http.clone(), auth.clone(), cfg.sheet_id.clone()));
    let documents = Arc::new(DriveClient::new(http, auth));

    // 4. Transporte de correo (se verifica una vez, nunca aborta el arranque)
    let notifier = mailer::notifier_from_config(&cfg).await?;

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState::new(cfg.clone(), records, documents, notifier);

    // 6. Configurar el router de la API y, si existe, el frontend estático
    let mut app = api::create_router(app_state);
    if let Some(dir) = &cfg.frontend_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }
    let app = app.layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::POST, Method::OPTIONS, Method::GET])
            .allow_headers([CONTENT_TYPE]),
    );

    // 7. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    info!("🚀 Servidor escuchando en http://{}", cfg.server_addr);

    // Apagado ordenado con Ctrl+C.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .context("Error en el servidor HTTP")?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
