// src/config/mod.rs
mod channel;
mod models;

pub use channel::ChannelConfig;
pub use models::AcceptorOptions;

use anyhow::{Context, Result};
use std::path::Path;

/// Load acceptor options from a file (YAML or JSON)
pub async fn load_options<P: AsRef<Path>>(path: P) -> Result<AcceptorOptions> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .context("Failed to read options file")?;

    let options: AcceptorOptions = if path.extension().and_then(|s| s.to_str()) == Some("yaml")
        || path.extension().and_then(|s| s.to_str()) == Some("yml")
    {
        serde_yaml::from_str(&contents).context("Failed to parse YAML options")?
    } else {
        serde_json::from_str(&contents).context("Failed to parse JSON options")?
    };

    options.validate()?;
    Ok(options)
}
