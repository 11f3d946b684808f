//! Fallback stream server example with an admission walkthrough
//!
//! Run with: cargo run --example fallback_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example fallback_server                   # binds to 0.0.0.0:1337
//!   cargo run --example fallback_server localhost         # binds to 127.0.0.1:1337
//!   cargo run --example fallback_server 127.0.0.1:8090    # binds to 127.0.0.1:8090
//!
//! Environment:
//!   SPILLWAY_IMAGE         still image the encoder loops (optional)
//!   SPILLWAY_FFMPEG        encoder executable (default: ffmpeg)
//!   SPILLWAY_TTL_SECS      saturation TTL (default: 30)
//!   SPILLWAY_STATE_FILE    saturation state file location
//!
//! ## Playing the fallback feed
//!
//! With VLC:
//!   vlc http://localhost:1337/stream.ts
//!
//! With ffplay:
//!   ffplay http://localhost:1337/stream.ts
//!
//! On startup the example also walks a tiny in-memory catalog through
//! admission until its only profile is saturated, so the log shows the
//! decisions a front end would see before its players land here.

use std::net::SocketAddr;
use std::sync::Arc;

use spillway::catalog::{Account, AccountId, Channel, ChannelId, Profile, ProfileId, Stream, StreamId};
use spillway::fallback::StaticImage;
use spillway::{AdmissionController, Config, FallbackServer, MemoryCatalog, PipelineSupervisor, SaturationStore};

/// Parse bind address from command line argument.
///
/// Accepts formats:
/// - "localhost" -> 127.0.0.1:1337
/// - "localhost:8090" -> 127.0.0.1:8090
/// - "127.0.0.1" -> 127.0.0.1:1337
/// - "0.0.0.0:8090" -> 0.0.0.0:8090
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 1337;

    // Replace "localhost" with "127.0.0.1"
    let normalized = arg.replace("localhost", "127.0.0.1");

    // Try parsing as SocketAddr first (includes port)
    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    // Try parsing as IP address without port
    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: fallback_server [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:1337)");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  fallback_server                   # binds to 0.0.0.0:1337");
    eprintln!("  fallback_server localhost         # binds to 127.0.0.1:1337");
    eprintln!("  fallback_server 127.0.0.1:8090    # binds to 127.0.0.1:8090");
}

/// Two channels whose streams share one account with a single-connection
/// profile. Small enough that the second channel saturates immediately.
async fn seed_catalog(catalog: &MemoryCatalog) {
    catalog
        .put_channel(Channel::new(ChannelId(1), "Demo One", vec![StreamId(10)]))
        .await;
    catalog
        .put_channel(Channel::new(ChannelId(2), "Demo Two", vec![StreamId(20)]))
        .await;
    catalog
        .put_stream(Stream::new(StreamId(10), "demo-feed-1", Some(AccountId(5)), 0))
        .await;
    catalog
        .put_stream(Stream::new(StreamId(20), "demo-feed-2", Some(AccountId(5)), 0))
        .await;
    catalog
        .put_account(Account::new(
            AccountId(5),
            "demo-account",
            vec![Profile::new(ProfileId(50), "single-slot", 1).default_profile()],
        ))
        .await;
}

async fn admission_walkthrough(
    controller: &AdmissionController<MemoryCatalog>,
    saturation: &SaturationStore,
) {
    println!("=== Admission walkthrough ===");

    match controller.admit(ChannelId(1)).await {
        Ok(admission) => println!("Channel 1: {:?}", admission),
        Err(e) => println!("Channel 1: rejected: {}", e),
    }

    // Channel 1 holds the only slot, so channel 2 finds the pool exhausted
    // and gets marked saturated.
    match controller.admit(ChannelId(2)).await {
        Ok(admission) => println!("Channel 2: {:?}", admission),
        Err(e) => println!("Channel 2: rejected: {}", e),
    }

    // A retry inside the TTL degrades to the fallback instead of failing.
    match controller.admit(ChannelId(2)).await {
        Ok(admission) => println!("Channel 2 retry: {:?}", admission),
        Err(e) => println!("Channel 2 retry: rejected: {}", e),
    }

    println!(
        "Channel 2 saturated: {}",
        saturation.is_saturated(ChannelId(2)).await
    );
    println!();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("spillway=debug".parse()?)
                .add_directive("fallback_server=debug".parse()?),
        )
        .init();

    let mut config = Config::from_env()?;
    if let Some(addr_str) = args.get(1) {
        match parse_bind_addr(addr_str) {
            Ok(addr) => config = config.bind(addr),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        }
    }

    // Saturation state persists across restarts; the sweep task retires
    // expired records in the background.
    let saturation = Arc::new(SaturationStore::open(&config).await?);
    let _sweep_handle = saturation.spawn_sweep_task();

    let catalog = Arc::new(MemoryCatalog::new());
    seed_catalog(&catalog).await;

    let controller = AdmissionController::new(Arc::clone(&catalog), Arc::clone(&saturation), &config);
    admission_walkthrough(&controller, &saturation).await;

    println!("Starting fallback stream server on {}", config.bind_addr());
    println!();
    println!("=== Watch the fallback feed ===");
    println!("VLC:    vlc {}", config.stream_url());
    println!("ffplay: ffplay {}", config.stream_url());
    println!();

    let image = Arc::new(StaticImage::new(config.image.clone()));
    let pipeline = PipelineSupervisor::probe(config.clone()).await;
    let server = FallbackServer::new(config, pipeline, image);

    // Run with Ctrl+C handling
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                eprintln!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
        }
    }

    Ok(())
}
