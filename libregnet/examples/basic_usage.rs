//! Basic usage example for the Regnet library.
//!
//! Resolves endpoints for a registry, then searches the configured
//! indexes for a term.
//!
//! Run with: cargo run --example basic_usage -- [term] [registry]

use libregnet::Service;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let term = args.next().unwrap_or_else(|| "alpine".to_string());
    let registry = args.next().unwrap_or_else(|| "docker.io".to_string());

    println!("Regnet Library - Basic Usage Example\n");

    let service = Service::builder().build()?;

    println!("Pull endpoints for {}:", registry);
    for endpoint in service.lookup_pull_endpoints(&registry)? {
        println!(
            "  - {} {} (mirror: {}, tls: {:?})",
            endpoint.version, endpoint.url, endpoint.mirror, endpoint.tls
        );
    }
    println!();

    println!("Searching for '{}'...", term);
    match service.search(&term, Some(10), None, true).await {
        Ok(results) => {
            println!("✓ Found {} results:\n", results.len());
            for result in results {
                let official = if result.is_official { " [OK]" } else { "" };
                println!(
                    "  - {}/{} ({} stars){}",
                    result.registry_name, result.name, result.star_count, official
                );
            }
        }
        Err(e) => eprintln!("✗ Search failed: {}", e),
    }

    Ok(())
}
