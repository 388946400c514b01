//! Candidate enumeration demo.
//!
//! Enumerates every runtime candidate the dispatcher can see, then
//! resolves each one into a session and closes it again. With no runtime
//! libraries installed this prints the built-in stub only.
//!
//! Run with: cargo run --example enumerate

use std::sync::Arc;

use medley::error::{Error, Result};
use medley::loader::Loader;
use medley::registry::{Registry, RegistryConfig};

fn main() -> Result<()> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("=== Runtime Enumeration ===\n");

    // SAFETY: The default search paths are system directories; anything
    // installed there is trusted runtime code.
    let registry = Arc::new(unsafe { Registry::probe(&RegistryConfig::default()) });

    println!("Snapshot ({} candidates):", registry.len());
    for (i, caps) in registry.caps_iter().enumerate() {
        println!(
            "  [{i}] {} ({:?}, API {}.{})",
            caps.name, caps.kind, caps.api_version.major, caps.api_version.minor
        );
    }

    println!("\nResolving each candidate into a session:");
    let loader = Loader::new(registry);
    for index in 0.. {
        match loader.create_session(index) {
            Ok(session) => {
                println!("  [{index}] {} -> session ok", session.runtime_name());
                session.close()?;
            }
            Err(Error::NotFound) => break,
            Err(e) => {
                println!("  [{index}] failed: {e}");
                break;
            }
        }
    }

    loader.unload();
    Ok(())
}
