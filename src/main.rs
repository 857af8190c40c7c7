use tracing::error;

use oxidis::config::Config;
use oxidis::server::Server;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = match Config::parse(std::env::args()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid command line arguments");
            std::process::exit(1);
        }
    };

    let server = match Server::new(config).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!(error = %e, "server terminated");
        std::process::exit(1);
    }
}
