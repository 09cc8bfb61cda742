use mimirtool_provider::{init_logging, serve, MimirProvider, ProviderError};

#[tokio::main]
async fn main() -> Result<(), ProviderError> {
    init_logging();
    serve(MimirProvider::new(env!("CARGO_PKG_VERSION"))).await
}
