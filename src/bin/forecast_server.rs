use std::sync::Arc;

use ephemra::{
    forecast_router, init_logging, log_app_bind, log_app_start, logging_config_from_env,
    service_config_from_env, ForecastService,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let config = service_config_from_env()?;
    let service = Arc::new(ForecastService::load(&config)?);
    let app = forecast_router(service);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr, config.limits.max_upload_bytes);
    axum::serve(listener, app).await?;

    Ok(())
}
