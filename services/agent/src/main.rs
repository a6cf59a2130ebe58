use tokio::net::TcpListener;
use tracing::info;

use keylime_agent::{build_router, config, lifecycle, revocation};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    match config::parse_args(&args) {
        config::StartupAction::PrintVersion => {
            println!("{}", config::version_handshake_json());
            Ok(())
        }
        config::StartupAction::Serve(settings) => {
            if settings.json_logs {
                keylime_core::logging::init_json();
            } else {
                keylime_core::logging::init();
            }

            let port = settings.cloudnode_port;
            let state = lifecycle::bootstrap(settings).await?;
            revocation::spawn_listener(std::sync::Arc::clone(&state));
            let app = build_router(state);

            let bind_addr = format!("0.0.0.0:{port}");
            let listener = TcpListener::bind(&bind_addr).await?;
            info!(bind_addr, "attestation HTTP surface listening");

            axum::serve(listener, app).await?;
            Ok(())
        }
    }
}
