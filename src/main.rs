use dbsteward::{
    config::{DeclaredConfig, Settings},
    entrypoint, handoff,
    utils::logging::init_tracing,
};
use mimalloc::MiMalloc;
use tracing::{error, info};
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;
    let declared = DeclaredConfig::from_env(settings.service)?;

    init_tracing(&settings.loglevel, declared.verbose);

    info!(
        service = %settings.service,
        data_dir = %settings.data_dir().display(),
        state_file = %settings.state_path().display(),
        entrypoint = %settings.entrypoint.display(),
        skip_update = declared.skip_update,
        "dbsteward starting"
    );

    if let Err(e) = entrypoint::run(&settings, &declared).await {
        error!(error = %e, "reconciliation failed; not handing off");
        return Err(e.into());
    }

    let args = std::env::args_os().skip(1).collect();
    let err = handoff::exec(&settings.entrypoint, args);
    error!(error = %err, "handoff failed");
    Err(err.into())
}
