use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    schemaless_cli::main_entry().await
}
