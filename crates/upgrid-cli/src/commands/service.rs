use upgrid_registry::{LocalRegistry, ServiceClient};
use upgrid_state::ServiceSpec;

pub fn create(
    registry: &LocalRegistry,
    name: String,
    image: String,
    scale: u32,
    hosts: Vec<String>,
    links: Vec<String>,
) -> anyhow::Result<()> {
    let spec = registry.create_service(ServiceSpec {
        name,
        image,
        scale,
        hosts,
        links,
        created_at: 0,
        updated_at: 0,
    })?;
    println!(
        "✓ Created {} ({}, {} instances)",
        spec.name, spec.image, spec.scale
    );
    Ok(())
}

pub fn list(registry: &LocalRegistry, format: &str) -> anyhow::Result<()> {
    let services = registry.list_services()?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&services)?);
        }
        _ => {
            if services.is_empty() {
                println!("No services registered");
            }
            for spec in &services {
                let links = if spec.links.is_empty() {
                    "-".to_string()
                } else {
                    spec.links.join(",")
                };
                println!(
                    "{:<24} {:<32} scale={:<4} links={}",
                    spec.name, spec.image, spec.scale, links
                );
            }
        }
    }
    Ok(())
}

pub async fn remove(registry: &LocalRegistry, name: &str) -> anyhow::Result<()> {
    registry.delete_service(name).await?;
    println!("✓ Removed {name}");
    Ok(())
}
