#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fleet_dispatch::cli::run().await
}
