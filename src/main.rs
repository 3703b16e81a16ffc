// src/main.rs

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tiktok_relay::start_server().await
}
