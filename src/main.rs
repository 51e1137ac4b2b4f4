use fanout_api::{
    build_app, config::Config, dispatcher::Dispatcher, http::handlers::register_builtin,
    logging, registry::EndpointRegistry, AppState,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let bind_socket = config.bind_socket()?;

    let mut registry = EndpointRegistry::new();
    register_builtin(&mut registry);
    for (endpoint, handlers) in registry.endpoints() {
        info!(endpoint = %endpoint, handlers, "endpoint registered");
    }

    let dispatcher = Dispatcher::new(registry, config.fanin_timeout());
    let app = build_app(AppState::new(dispatcher));
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        fanin_timeout_ms = config.fanin_timeout_ms,
        "server starting"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
