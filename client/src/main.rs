use docpilot_client::core::ChatApp;

#[tokio::main]
async fn main() {
    if let Err(e) = ChatApp::run().await {
        eprintln!("\nError: {}\n", e);
        std::process::exit(1);
    }
}
