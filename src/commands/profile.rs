use crate::output::UserOutput;
use bay::profile::{active_profile_name, UserProfileStore};
use bay::{Config, ProfileResolver};

/// Show the active profile chain, or switch to `name` and save it.
pub fn run_profile(
    config: &Config,
    explicit: Option<&str>,
    name: Option<String>,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let resolver = ProfileResolver::new(config);

    if let Some(name) = name {
        // Resolving first rejects unknown profiles and broken parent chains.
        let chain = resolver.chain(&name)?;
        UserProfileStore::new(&config.root).save(&name)?;
        out.success(&format!("Switched to profile '{}'", name));
        print_chain(&chain, out);
        return Ok(());
    }

    match active_profile_name(config, explicit)? {
        Some(active) => {
            let chain = resolver.chain(&active)?;
            print_chain(&chain, out);
        }
        None => out.status("No profile selected; every container is available"),
    }
    Ok(())
}

fn print_chain(chain: &[String], out: &dyn UserOutput) {
    for (depth, name) in chain.iter().enumerate() {
        if depth == 0 {
            out.status(name);
        } else {
            out.status(&format!("{}↳ {}", "  ".repeat(depth), name));
        }
    }
}

pub fn run_profiles(
    config: &Config,
    explicit: Option<&str>,
    verbose: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let active = active_profile_name(config, explicit)?;

    if config.profiles.is_empty() {
        out.status("No profiles defined");
    }
    for (name, profile) in &config.profiles {
        let marker = if active.as_deref() == Some(name.as_str()) {
            "*"
        } else {
            " "
        };
        let parent = profile
            .parent
            .as_deref()
            .map(|p| format!(" (from {})", p))
            .unwrap_or_default();
        out.status(&format!(
            "{} {:<20} {}{}",
            marker,
            name,
            profile.description.as_deref().unwrap_or(""),
            parent
        ));
        if verbose {
            for (container, options) in &profile.containers {
                let boot = match options.default_boot {
                    Some(true) => "boots by default",
                    Some(false) => "manual",
                    None => "inherited",
                };
                out.status(&format!("      {:<18} {}", container, boot));
            }
        }
    }

    if !config.corrupted_profiles.is_empty() {
        out.blank();
        out.warning(&format!(
            "Unreadable profile files: {}",
            config.corrupted_profiles.join(", ")
        ));
    }
    Ok(())
}
