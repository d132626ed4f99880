use std::path::Path;

use anyhow::Result;

use crate::config::RuntimeConfig;
use crate::manifest::{load_manifest_dir, manifest_paths};
use crate::memory::{MEMORY_CAPACITY, MemoryStore};
use crate::provider::{detect_provider, env_present};
use crate::workers::github::github_token_present;

pub fn run_doctor(cfg: &RuntimeConfig) -> Result<()> {
    println!(
        "Active profile: '{}' (config: {})",
        cfg.profile, cfg.config_path
    );

    let checks = [
        ("GOOGLE_API_KEY", env_present("GOOGLE_API_KEY")),
        ("OPENAI_API_KEY", env_present("OPENAI_API_KEY")),
        ("OLLAMA_HOST", env_present("OLLAMA_HOST")),
        ("ATLASSIAN_EMAIL", env_present("ATLASSIAN_EMAIL")),
        ("ATLASSIAN_TOKEN", env_present("ATLASSIAN_TOKEN")),
        ("GH_TOKEN/GITHUB_TOKEN", github_token_present()),
    ];

    println!("Environment check:");
    for (key, ok) in checks {
        let status = if ok { "set" } else { "missing" };
        println!("- {key}: {status}");
    }

    match detect_provider() {
        Some(provider) => println!("Auto provider resolution: {:?}", provider),
        None => {
            println!("Auto provider resolution: none (planning will use the fallback plan)");
            println!("Tip: export one provider key or run with --provider ollama");
        }
    }

    let dir = Path::new(&cfg.manifests_dir);
    let files = manifest_paths(dir)?;
    if files.is_empty() {
        println!(
            "Manifests: no files in '{}', built-in manifests will be used",
            dir.display()
        );
    } else {
        let loaded = load_manifest_dir(dir)?;
        println!(
            "Manifests: {} file(s) in '{}', {} loaded",
            files.len(),
            dir.display(),
            loaded.len()
        );
    }

    let memory = MemoryStore::new(&cfg.memory_path);
    let records = memory.load();
    println!(
        "Run memory: {} of {MEMORY_CAPACITY} records at '{}' ({} successful)",
        records.len(),
        memory.path().display(),
        records.iter().filter(|record| record.success).count()
    );

    println!(
        "Jira: base_url={} jql={}",
        cfg.jira_base_url.as_deref().unwrap_or("<not configured>"),
        cfg.jira_jql
    );
    println!(
        "GitHub repo: {}",
        cfg.github_repo.as_deref().unwrap_or("<not configured>")
    );
    println!(
        "Timeouts: step={}s planner={}s",
        cfg.step_timeout_secs, cfg.planner_timeout_secs
    );
    println!(
        "Telemetry: enabled={} path={}",
        cfg.telemetry_enabled, cfg.telemetry_path
    );

    Ok(())
}
