//! Resolve a transcript with default options and print it.
//!
//! Usage: cargo run --example basic -- dQw4w9WgXcQ [language]

#[tokio::main]
async fn main() -> tubescript::Result<()> {
    let mut args = std::env::args().skip(1);
    let video = args.next().expect("usage: basic <video-id-or-url> [language]");
    let language = args.next();

    let result = tubescript::resolve(&video, language.as_deref(), false).await?;

    println!("{}", result.to_text_with_header());

    Ok(())
}
