//! Environment diagnostics.
//!
//! Prints where state lives, whether the archive is usable, which local
//! inputs exist, and how each hosted source would authenticate. With
//! `--probe` the head request is actually sent so expired sessions and
//! network problems show up before a sync does.

use anyhow::Result;
use std::path::Path;

use crate::config::{project_root, Config, ConfigOrigin};
use crate::credentials;
use crate::db::Store;
use crate::fetch;
use crate::migrate::schema_ready;
use crate::models::Source;

fn presence(path: &Path) -> &'static str {
    if path.exists() {
        "ok"
    } else {
        "missing"
    }
}

pub async fn run_doctor(config: &Config, origin: &ConfigOrigin, probe: bool) -> Result<()> {
    println!("Project root: {}", project_root().display());
    println!("Config: {}", origin);

    // Never create the database from here.
    let store = if config.db.path.exists() {
        Some(Store::open(&config.db.path).await?)
    } else {
        None
    };
    match &store {
        Some(store) => {
            let ready = schema_ready(store).await?;
            println!(
                "Database: {} ({})",
                config.db.path.display(),
                if ready { "ready" } else { "schema missing, run `convos init`" }
            );
        }
        None => println!(
            "Database: {} (missing, run `convos init`)",
            config.db.path.display()
        ),
    }

    println!("\nLocal sources:");
    for (source, enabled, dir) in [
        (Source::ClaudeCode, config.sync.claude_code, &config.sync.claude_code_dir),
        (Source::Codex, config.sync.codex, &config.sync.codex_dir),
    ] {
        if enabled {
            println!("  {}: {} ({})", source, dir.display(), presence(dir));
        } else {
            println!("  {}: disabled", source);
        }
    }

    if !config.sync.import_paths.is_empty() {
        println!("\nImport paths:");
        for path in &config.sync.import_paths {
            println!("  {} ({})", path.display(), presence(path));
        }
    }

    println!("\nHosted sources:");
    for source in [Source::Chatgpt, Source::Claude] {
        let Some(hosted) = config.hosted.get(source) else {
            continue;
        };
        if hosted.enabled == Some(false) {
            println!("  {}: disabled", source);
            continue;
        }

        let remembered = match &store {
            Some(store) => store.checkpoint(&format!("credential:{}", source)).await.ok().flatten(),
            None => None,
        };
        let candidates = credentials::prefer(
            credentials::candidates(source, hosted),
            remembered.as_deref(),
        );
        println!("  {}: {}", source, hosted.base_url(source));
        println!(
            "    last working credential: {}",
            remembered.as_deref().unwrap_or("none")
        );

        let Some(credential) = candidates.into_iter().next() else {
            println!("    credential: {}", credentials::missing(source, hosted));
            continue;
        };
        println!("    credential: {}", credential.origin);

        if probe {
            let outcome = match fetch::fetcher_for(source, hosted, credential) {
                Ok(fetcher) => fetcher.head().await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(Some(head)) => println!("    probe: ok (newest {})", head.fingerprint()),
                Ok(None) => println!("    probe: ok (no conversations)"),
                Err(e) => println!("    probe: failed, {}", e),
            }
        }
    }

    if let Some(store) = store {
        store.close().await;
    }
    Ok(())
}
