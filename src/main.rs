use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;

use judge::config::{CliArgs, Config};
use judge::database as db;
use judge::events::EventHub;
use judge::master::BuildMaster;
use judge::routes::ApiOptions;
use judge::sandbox::{SandboxConfig, create_sandbox_runner};
use judge::web_server::build_server;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let Config {
        server: server_config,
        database: database_config,
        builder: builder_config,
        limits,
        languages,
        events: events_config,
    } = cli.to_config().context("Failed to load configuration")?;

    anyhow::ensure!(
        builder_config.workers > 0,
        "The number of build workers must not be 0"
    );

    let db_path = match database_config.path {
        Some(path) => path,
        None => db::get_db_path()?,
    };
    if cli.flush_data {
        db::remove_db(&db_path);
    }

    let db_pool = db::init_db(&db_path, database_config.max_connections)
        .await
        .context("Failed to initialize database")?;

    let sandbox_config = SandboxConfig::new(builder_config.work_dir.clone(), limits, languages)?;

    let events = Arc::new(EventHub::new(&events_config)?);
    let mut finished = events.subscribe();
    let event_logger = tokio::spawn(async move {
        loop {
            match finished.recv().await {
                Ok(event) => log::info!("Build {} finished, succeed: {}", event.key, event.succeed),
                Err(RecvError::Lagged(n)) => log::warn!("Event logger skipped {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // ======= PREPARATION END, EXECUTION START =======

    let master = BuildMaster::start(db_pool.clone(), events.clone(), &builder_config, |id| {
        create_sandbox_runner(id, &sandbox_config)
    })
    .context("Failed to start build master")?;

    let options = ApiOptions {
        strict_assignments: builder_config.strict_assignments,
    };
    let server =
        build_server(server_config, db_pool.clone(), options).context("Failed to build server")?;

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
    }

    // 1. Stop accepting requests
    server_handle.stop(true).await;

    // 2. Stop intake, finish in-flight builds, persist their reports
    master.shutdown().await;

    // 3. Close the event channel
    drop(events);
    let _ = event_logger.await;
    db_pool.close().await;

    log::info!("Shutdown complete");
    Ok(())
}
