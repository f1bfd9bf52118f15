// Binary entry point for action_launcher
// This is a thin wrapper that delegates to the library implementation

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = action_launcher::shell::run().await {
        eprintln!("action_launcher fatal error: {:#}", e);
        return Err(e);
    }
    Ok(())
}
