use fleet_core::FleetConfig;

pub async fn check(config: &FleetConfig) -> anyhow::Result<()> {
    let orchestrator = super::orchestrator(config)?;
    match fleet_docker::preflight(orchestrator.client()).await {
        Ok(()) => {
            println!("✓ Engine reachable at {}", orchestrator.client().endpoint());
            println!("✓ Swarm manager");
            Ok(())
        }
        Err(e) => {
            eprintln!("Preflight failed: {e}");
            Err(e.into())
        }
    }
}
