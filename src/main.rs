use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fauxqs::app;
use fauxqs::config::{self, Args, Config};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fauxqs=info")),
        )
        .init();

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port))
        .await
        .unwrap_or_else(|e| {
            error!("cannot bind port {}: {e}", args.port);
            std::process::exit(1);
        });
    let port = listener.local_addr().expect("listener has a local addr").port();

    let config = Config::from_args(&args, port);
    let (router, state) = app::build_app(config);

    if let Some(path) = &args.init {
        let spec = match config::load_init(path) {
            Ok(spec) => spec,
            Err(e) => {
                error!("{e}");
                std::process::exit(1);
            }
        };
        if let Err(e) = config::apply_init(spec, &state).await {
            error!("{e}");
            std::process::exit(1);
        }
    }

    let timers = app::spawn_timers(&state);
    info!("fauxqs listening on port {port} (default region {})", state.config.default_region);

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("server error: {e}");
    }
    timers.abort();
    info!("fauxqs stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
