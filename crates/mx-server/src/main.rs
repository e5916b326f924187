use mx_server::run;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        tracing::error!(error = %err, "media-exporter failed");
        std::process::exit(1);
    }
}
