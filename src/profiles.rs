use anyhow::Result;

use crate::config::{ProfilesFile, RuntimeConfig};

pub fn run_profiles_list(profiles: &ProfilesFile, cfg: &RuntimeConfig) -> Result<()> {
    let mut names = profiles.profiles.keys().cloned().collect::<Vec<String>>();
    if !names.iter().any(|name| name == "default") {
        names.push("default".to_string());
    }
    names.sort();

    println!("Configured profiles (active='{}'):", cfg.profile);
    for name in names {
        let marker = if name == cfg.profile { "*" } else { " " };
        let source = if profiles.profiles.contains_key(&name) {
            "configured"
        } else {
            "implicit"
        };
        println!("{marker} {name} ({source})");
    }

    Ok(())
}

pub fn run_profiles_show(cfg: &RuntimeConfig) -> Result<()> {
    println!("Active profile: {}", cfg.profile);
    println!("Config path: {}", cfg.config_path);
    println!("Provider: {:?}", cfg.provider);
    println!(
        "Model: {}",
        cfg.model.as_deref().unwrap_or("<provider-default>")
    );
    println!("Default goal: {}", cfg.goal);
    println!("Manifests dir: {}", cfg.manifests_dir);
    println!("Memory path: {}", cfg.memory_path);
    println!("Step timeout (secs): {}", cfg.step_timeout_secs);
    println!("Planner timeout (secs): {}", cfg.planner_timeout_secs);
    println!(
        "Jira base URL: {}",
        cfg.jira_base_url.as_deref().unwrap_or("<not configured>")
    );
    println!("Jira JQL: {}", cfg.jira_jql);
    println!(
        "GitHub repo: {}",
        cfg.github_repo.as_deref().unwrap_or("<not configured>")
    );
    println!("Telemetry enabled: {}", cfg.telemetry_enabled);
    println!("Telemetry path: {}", cfg.telemetry_path);
    Ok(())
}
