use super::Formation;
use crate::output::UserOutput;
use bay::orchestrator::VolumeManager;

fn manager(formation: &Formation) -> VolumeManager<'_> {
    VolumeManager::new(&formation.ctx, &formation.spec, &formation.graph)
}

pub async fn run_volume_list(formation: &Formation, out: &dyn UserOutput) -> anyhow::Result<()> {
    let rows = manager(formation).list().await?;
    if rows.is_empty() {
        out.status("No volumes declared");
        return Ok(());
    }

    out.status(&format!(
        "{:<20} {:<16} {:<18} {:<8} USERS",
        "VOLUME", "PROVIDER", "MODES", "EXISTS"
    ));
    for row in rows {
        out.status(&format!(
            "{:<20} {:<16} {:<18} {:<8} {}",
            row.name,
            row.provider.as_deref().unwrap_or("-"),
            row.modes.to_option_string().unwrap_or_else(|| "-".to_string()),
            if row.exists { "yes" } else { "no" },
            if row.users.is_empty() {
                "-".to_string()
            } else {
                row.users.join(", ")
            }
        ));
    }
    Ok(())
}

pub async fn run_volume_destroy(
    formation: &Formation,
    name: &str,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    if !formation.config.volume_names().iter().any(|v| v == name) {
        anyhow::bail!("Volume '{}' is not declared", name);
    }
    let volumes = manager(formation);
    let scope = volumes.default_scope(name);
    volumes.destroy(name, &scope).await?;
    out.success(&format!("Destroyed volume {}", name));
    Ok(())
}

pub async fn run_mounts(formation: &Formation, out: &dyn UserOutput) -> anyhow::Result<()> {
    let rows = manager(formation).mounts();
    if rows.is_empty() {
        out.status("No mounts outside the active profile");
        return Ok(());
    }
    out.status(&format!(
        "{:<20} {:<20} {:<30} MODES",
        "CONTAINER", "VOLUME", "PATH"
    ));
    for row in rows {
        out.status(&format!(
            "{:<20} {:<20} {:<30} {}",
            row.container,
            row.volume,
            row.path,
            row.modes.to_option_string().unwrap_or_else(|| "-".to_string())
        ));
    }
    Ok(())
}
