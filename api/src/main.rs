#[tokio::main]
async fn main() -> anyhow::Result<()> {
    listening_stats_api::run().await
}
