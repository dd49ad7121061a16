use super::load_config;
use autoload_core::RedirectPolicy;
use miette::{IntoDiagnostic, Result};
use std::path::Path;

/// Print the redirect policy of `module_file`.
///
/// A module without a policy prints `null` (JSON) or a note, and exits 0.
pub fn run(module_file: &Path, config: Option<&Path>, json: bool) -> Result<()> {
    let config = load_config(config)?;
    let policy = RedirectPolicy::load(module_file, &config.policy_suffix).into_diagnostic()?;

    if json {
        let json = serde_json::to_string_pretty(&policy).into_diagnostic()?;
        println!("{json}");
        return Ok(());
    }

    let Some(policy) = policy else {
        println!(
            "no redirect policy ({} not found)",
            RedirectPolicy::policy_path(module_file, &config.policy_suffix).display()
        );
        return Ok(());
    };

    println!("policy {}", policy.source.display());
    for path in &policy.probing_paths {
        println!("  probe {}", path.display());
    }
    for redirect in &policy.redirects {
        let token = redirect
            .token
            .as_deref()
            .map(|t| format!("#{t}"))
            .unwrap_or_default();
        println!(
            "  redirect {}{token} {} -> {}",
            redirect.name, redirect.old_version, redirect.new_version
        );
    }
    Ok(())
}
