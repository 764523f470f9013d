use beacon_p2p_daemon::daemon;
use beacon_p2p_daemon::port::Port;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // stdout carries the wire protocol; all diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    daemon::run(Port::new()).await;
}
