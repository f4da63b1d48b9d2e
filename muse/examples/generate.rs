//! Generate a grid and all four upscales from the command line.
//!
//! ```sh
//! DISCORD_USER_TOKEN=... DISCORD_BOT_TOKEN=... \
//! DISCORD_CHANNEL_ID=... DISCORD_GUILD_ID=... \
//! cargo run --example generate -- "beautiful cosmic space dolphin"
//! ```
//!
//! Exit codes: 0 ok, 1 auth failure, 2 generation failure, 3 storage
//! failure.

use muse::{Client, Config, ErrorKind, MuseError};
use tracing_subscriber::EnvFilter;

fn exit_code(err: &MuseError) -> i32 {
    match err.kind() {
        ErrorKind::Auth => 1,
        ErrorKind::Storage => 3,
        _ => 2,
    }
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(2);
        }
    };

    let filter = config
        .log_level
        .clone()
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let prompt = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "beautiful cosmic space dolphin".to_string());

    let client = match Client::builder(config).build() {
        Ok(client) => client,
        Err(err) => {
            eprintln!("client setup failed: {err}");
            std::process::exit(exit_code(&err));
        }
    };

    if let Err(err) = client.initialize().await {
        eprintln!("initialize failed: {err}");
        std::process::exit(exit_code(&err));
    }

    let generation = match client.generate(&prompt).await {
        Ok(generation) => generation,
        Err(err) => {
            eprintln!("generation failed: {err}");
            client.close().await;
            std::process::exit(exit_code(&err));
        }
    };
    println!(
        "grid {} -> {}",
        generation.grid_message_id, generation.storage_id
    );

    match client.upscale_all(generation.grid_message_id).await {
        Ok(results) => {
            for result in results {
                match result.outcome {
                    Ok(upscale) => {
                        println!("variant {} -> {}", upscale.variant_index, upscale.storage_id)
                    }
                    Err(err) => eprintln!("variant {} failed: {err}", result.variant_index),
                }
            }
        }
        Err(err) => {
            eprintln!("upscale failed: {err}");
            client.close().await;
            std::process::exit(exit_code(&err));
        }
    }

    client.close().await;
}
