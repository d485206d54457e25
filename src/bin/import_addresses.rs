// Operator utility: bulk-import watched addresses into a running service.
//
// Reads one address per line and POSTs them to /addresses in chunks.
//
//   import-addresses <file> [--api http://host:port] [--key <api-key>] [--force]

use serde_json::json;
use std::env;
use std::fs;

const CHUNK_SIZE: usize = 100;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let Some(path) = args.get(1).filter(|a| !a.starts_with("--")) else {
        eprintln!("usage: import-addresses <file> [--api <url>] [--key <api-key>] [--force]");
        std::process::exit(1);
    };

    let mut api_url = "http://127.0.0.1:3000".to_string();
    let mut api_key: Option<String> = None;
    let mut force = false;
    let mut iter = args.iter().skip(2);
    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--api" => api_url = iter.next().cloned().unwrap_or(api_url),
            "--key" => api_key = iter.next().cloned(),
            "--force" => force = true,
            other => {
                eprintln!("unknown flag: {}", other);
                std::process::exit(1);
            }
        }
    }

    let contents = fs::read_to_string(path)?;
    let addresses: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect();
    println!("Importing {} addresses from {}", addresses.len(), path);

    let client = reqwest::Client::new();
    let endpoint = format!("{}/addresses", api_url.trim_end_matches('/'));
    let mut added = 0u64;
    let mut existing = 0u64;
    let mut invalid = 0u64;

    for chunk in addresses.chunks(CHUNK_SIZE) {
        let mut request = client
            .post(&endpoint)
            .json(&json!({ "addresses": chunk, "force": force }));
        if let Some(key) = &api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            eprintln!(
                "Chunk rejected with status {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            );
            std::process::exit(1);
        }

        let summary: serde_json::Value = response.json().await?;
        let count = |key: &str| {
            summary
                .get(key)
                .and_then(|v| v.as_array())
                .map(|a| a.len() as u64)
                .unwrap_or(0)
        };
        added += count("added") + count("forcedRefetch");
        existing += count("alreadyExist");
        invalid += count("invalid");
        println!(
            "  chunk of {}: {} added, {} existing, {} invalid",
            chunk.len(),
            count("added") + count("forcedRefetch"),
            count("alreadyExist"),
            count("invalid")
        );
    }

    println!(
        "Done: {} added, {} already existed, {} invalid",
        added, existing, invalid
    );
    Ok(())
}
