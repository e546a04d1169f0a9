use anyhow::Result;
use heating_demand_model::{config, controller, telemetry};
use config::Config;
use telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = Config::load()?;

    let app_state = controller::AppState::new(cfg.clone()).await?;

    info!(
        state_path = %cfg.storage.state_path,
        units = cfg.simulation.units.len(),
        learning_rate = cfg.model.learning_rate,
        balance_point = cfg.model.balance_point,
        "starting heating demand model"
    );

    let handle = controller::spawn_controller_tasks(app_state.clone(), cfg.clone());

    tokio::select! {
        _ = telemetry::shutdown_signal() => {}
        res = handle => {
            if let Err(e) = res {
                warn!(error=%e, "controller task panicked");
            }
        }
    }

    app_state.controller.save().await?;
    warn!("shutdown complete");
    Ok(())
}
