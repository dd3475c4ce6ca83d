use serde::Serialize;

use upgrid_registry::LocalRegistry;
use upgrid_state::UpgradeRecord;

#[derive(Debug, Serialize)]
struct PairStatus {
    from: String,
    to: String,
    /// `None` once a service has been deleted.
    from_scale: Option<u32>,
    to_scale: Option<u32>,
    upgrade: Option<UpgradeRecord>,
}

/// `upgrid status [from to]`: one pair in detail, or every recorded upgrade.
pub fn show(
    registry: &LocalRegistry,
    from: Option<&str>,
    to: Option<&str>,
    format: &str,
) -> anyhow::Result<()> {
    match (from, to) {
        (Some(from), Some(to)) => show_pair(registry, from, to, format),
        (None, None) => show_all(registry, format),
        _ => anyhow::bail!("pass both services, or none to list every upgrade"),
    }
}

fn pair_status(registry: &LocalRegistry, from: &str, to: &str) -> anyhow::Result<PairStatus> {
    let state = registry.state();
    Ok(PairStatus {
        from: from.to_string(),
        to: to.to_string(),
        from_scale: state.get_service(from)?.map(|s| s.scale),
        to_scale: state.get_service(to)?.map(|s| s.scale),
        upgrade: state.get_upgrade(from, to)?,
    })
}

/// Every upgrade record in the registry, ordered by pair.
fn all_upgrades(registry: &LocalRegistry) -> anyhow::Result<Vec<UpgradeRecord>> {
    let mut records = registry.state().list_upgrades()?;
    records.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));
    Ok(records)
}

fn show_pair(registry: &LocalRegistry, from: &str, to: &str, format: &str) -> anyhow::Result<()> {
    let status = pair_status(registry, from, to)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        _ => {
            let scale = |s: Option<u32>| s.map_or("deleted".to_string(), |n| n.to_string());
            println!("{from}: {}", scale(status.from_scale));
            println!("{to}: {}", scale(status.to_scale));
            match &status.upgrade {
                Some(record) => println!("upgrade: {}", summary(record)),
                None => println!("upgrade: none"),
            }
        }
    }
    Ok(())
}

fn show_all(registry: &LocalRegistry, format: &str) -> anyhow::Result<()> {
    let records = all_upgrades(registry)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            if records.is_empty() {
                println!("No upgrades recorded");
            }
            for record in &records {
                let pair = format!("{} -> {}", record.from, record.to);
                println!("{pair:<40} {}", summary(record));
            }
        }
    }
    Ok(())
}

fn summary(record: &UpgradeRecord) -> String {
    format!(
        "{} ({}/{} batches, source scale {}, final scale {})",
        record.state,
        record.completed_steps,
        record.total_steps,
        record.source_scale,
        record.final_scale
    )
}
