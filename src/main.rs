use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use examrun::api::HttpAttemptApi;
use examrun::cli::Cli;
use examrun::config::Settings;
use examrun::persist;
use examrun::runner;
use examrun::session::SessionController;
use examrun::state::SessionState;
use examrun::store::{state_dir_for, FileStore};
use examrun::telemetry::init_tracing;
use examrun::timer::AnchoredClock;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load()?.apply_cli(&cli);
    init_tracing(&settings.telemetry)?;

    let mut store = FileStore::new(state_dir_for(&settings.state_root, &settings.api_url));

    // Handle --clear
    if cli.clear {
        persist::clear_state(&mut store, cli.test_id)?;
        eprintln!("State cleared.");
    }

    // --status and --export work from the saved session alone
    if cli.status || cli.export.is_some() {
        let mut state = SessionState::new(cli.test_id, cli.topic_id);
        if let Some(saved) = persist::load_state(&store, cli.test_id)? {
            persist::restore_offline(&mut state, saved);
        }

        if cli.status {
            persist::print_status(&state, chrono::Utc::now());
            return Ok(());
        }
        if let Some(export_path) = &cli.export {
            persist::export_answers(&state, export_path)
                .with_context(|| format!("cannot export to {}", export_path.display()))?;
            eprintln!("Answers exported to {}", export_path.display());
            return Ok(());
        }
    }

    let api = HttpAttemptApi::from_settings(&settings)?;
    let mut controller = SessionController::new(
        cli.test_id,
        cli.topic_id,
        Arc::new(api),
        Box::new(store),
        Arc::new(AnchoredClock::starting_now()),
    );

    controller.load().await?;
    runner::run(&mut controller).await?;
    controller.shutdown();

    Ok(())
}
