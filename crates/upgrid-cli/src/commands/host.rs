use upgrid_registry::LocalRegistry;

pub fn add(registry: &LocalRegistry, id: &str, address: &str) -> anyhow::Result<()> {
    let host = registry.add_host(id, address)?;
    println!("✓ Registered host {}", host.id);
    Ok(())
}

pub fn list(registry: &LocalRegistry) -> anyhow::Result<()> {
    let mut hosts = registry.state().list_hosts()?;
    hosts.sort_by(|a, b| a.id.cmp(&b.id));

    if hosts.is_empty() {
        println!("No hosts registered");
    }
    for host in &hosts {
        let address = if host.address.is_empty() {
            "-"
        } else {
            host.address.as_str()
        };
        println!(
            "{:<16} {:<24} images={}",
            host.id,
            address,
            host.cached_images.len()
        );
    }
    Ok(())
}
