//! Bridge Rail Service
//!
//! Entry point for the fundstx USDC / USDCx bridge rail.

use fundstx_rails_bridge::main_entry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    main_entry::run_server().await
}
