use live_classroom::api;
use live_classroom::signaling::MemoryHub;
use live_classroom::Config;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let hub = MemoryHub::new();
    let routes = api::routes(hub, config.ice.clone());

    let address = config.bind_address();
    tracing::info!(host = %config.server.host, port = config.server.port, "Starting live relay");

    warp::serve(routes).run(address).await;
}
