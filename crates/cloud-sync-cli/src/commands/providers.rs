use anyhow::Result;
use cloud_sync::{ProviderFamily, ProviderRegistry};

/// Print every registered provider with its capabilities.
pub async fn run(registry: &ProviderRegistry) -> Result<()> {
    for provider_type in registry.registered_types() {
        let provider = registry.create_provider(provider_type, None).await?;
        let caps = provider.capabilities();

        let family = match provider_type.family() {
            ProviderFamily::Direct => "direct",
            ProviderFamily::Delegated => "delegated",
        };
        let auth: Vec<String> = caps.auth_types.iter().map(ToString::to_string).collect();

        println!(
            "{:<14} {:<10} auth={:<20} delta={} folders={} attachments={}",
            provider_type.as_str(),
            family,
            auth.join(","),
            yes_no(caps.delta_sync),
            yes_no(caps.folders),
            yes_no(caps.attachments),
        );
    }
    Ok(())
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}
