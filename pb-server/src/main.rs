mod creator;
mod deleter;
mod routes;
mod service;

use clap::Parser;
use pb_core::config::BackendConfig;
use pb_core::errors::*;
use pb_core::k8s::ClusterClient;
use pb_core::logging;
use pb_core::signal::ReadySignal;
use tracing::*;

use crate::service::FrontendService;

#[derive(Debug, Parser)]
struct Options {
    #[arg(short, long)]
    config_file: String,

    #[arg(long, default_value = "8080")]
    server_port: u16,

    #[arg(short, long, default_value = "info")]
    verbosity: String,
}

#[instrument(ret, err)]
async fn run(args: Options) -> EmptyResult {
    let config = BackendConfig::load(&args.config_file)?;

    let kube_client = kube::Client::try_default().await?;
    let client = ClusterClient::new(kube_client, &config.namespace);
    let timeout_delete = config.timeout_delete;
    let service = FrontendService::new(client, config);

    // Recover from whatever a restart (or crash) left behind: rebuild
    // missing pod caches, then sweep orphaned resources
    let startup_service = service.clone();
    tokio::spawn(async move {
        if let Err(err) = startup_service.reload_pod_caches().await {
            warn!("pod cache reload failed: {err:#}");
        }
        let swept = ReadySignal::with_timeout(timeout_delete);
        if let Err(err) = startup_service.clean_all_unused(swept).await {
            warn!("startup reconciliation sweep failed: {err:#}");
        }
    });

    let rkt_config = rocket::Config { port: args.server_port, ..Default::default() };
    let server = rocket::custom(&rkt_config)
        .mount(
            "/",
            rocket::routes![
                routes::get_pods,
                routes::create_pod,
                routes::watch_create_pod,
                routes::delete_pod,
                routes::watch_delete_pod,
                routes::delete_all_user,
            ],
        )
        .manage(service);
    server.launch().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> EmptyResult {
    let args = Options::parse();
    logging::setup(&format!("{},rocket=warn", args.verbosity));
    run(args).await
}

#[cfg(test)]
mod tests;
