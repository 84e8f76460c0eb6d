#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wordcast_lib::run().await
}
