#[tokio::main]
async fn main() {
    if let Err(e) = ctxbus::run().await {
        eprintln!("ctxbus: {e}");
        std::process::exit(1);
    }
}
