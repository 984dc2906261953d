//! Force local transcription with a smaller model and tighter timeouts.
//!
//! Usage: cargo run --example options -- dQw4w9WgXcQ

use std::time::Duration;

use tubescript::{Language, Model, ResolveOptions, Resolver};

#[tokio::main]
async fn main() -> tubescript::Result<()> {
    let video = std::env::args()
        .nth(1)
        .expect("usage: options <video-id-or-url>");

    let opts = ResolveOptions::new()
        .model(Model::Small)
        .download_timeout(Duration::from_secs(120))?
        .recognition_timeout(Duration::from_secs(600))?;

    let resolver = Resolver::new(&opts);
    let hint = Language::new("english")?;
    let result = resolver.resolve(&video, Some(&hint), true).await?;

    println!("{}", result.to_json_pretty()?);

    Ok(())
}
