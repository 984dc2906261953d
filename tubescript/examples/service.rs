//! Share one resolver across concurrent requests, the way a server would.
//!
//! Failures are printed as the structured payload a front-end returns.
//!
//! Usage: cargo run --example service -- dQw4w9WgXcQ https://youtu.be/jNQXAC9IVRw

use std::sync::Arc;
use std::time::Duration;

use tubescript::{ResolveOptions, Resolver};

#[tokio::main]
async fn main() {
    let resolver = Arc::new(Resolver::new(&ResolveOptions::default()));
    let sweeper = resolver.artifacts().spawn_sweeper(Duration::from_secs(300));

    let handles: Vec<_> = std::env::args()
        .skip(1)
        .map(|video| {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move {
                let outcome = resolver.resolve_str(&video, None, false).await;
                (video, outcome)
            })
        })
        .collect();

    for handle in handles {
        let (video, outcome) = handle.await.expect("resolve task panicked");
        match outcome {
            Ok(result) => println!(
                "{video}: {} chars ({}, {})",
                result.transcript().chars().count(),
                result.source(),
                result.language()
            ),
            Err(e) => println!(
                "{video}: {}",
                serde_json::to_string(&e.to_payload()).expect("payload serializes")
            ),
        }
    }

    sweeper.abort();
}
