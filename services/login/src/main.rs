use std::{net::Ipv4Addr, sync::Arc};

use anyhow::{Context, Result};
use ebonhold_game::realms::RealmListing;
use ebonhold_rpc::{account::AccountClient, character::CharacterClient, realm::RealmListService};
use ebonhold_spark::{HandlerRegistry, Peer, PeerConfig, Server as SparkServer};
use human_panic::setup_panic;
use structopt::StructOpt;
use tracing::info;

use crate::{
    conf::LoginServerConfig,
    integrity::IntegrityData,
    opt::{Opt, OptCommand},
    patcher::Patcher,
    server::LoginServer,
    services::SparkServices,
};

mod authenticator;
mod conf;
mod handler;
mod integrity;
mod opt;
mod patcher;
mod pin;
mod protocol;
mod server;
mod services;

fn main() -> Result<()> {
    setup_panic!();
    tracing_subscriber::fmt::init();

    let opts: Opt = Opt::from_args();

    match opts.command {
        OptCommand::Init => {
            let config = LoginServerConfig {
                bind_address: "0.0.0.0".parse::<Ipv4Addr>().expect("valid address"),
                port: 3724,
                spark_address: "127.0.0.1:6000".to_string(),
                account_service_address: "127.0.0.1:6001".to_string(),
                allowed_builds: vec![conf::default_build()],
                integrity_path: None,
                patch_path: None,
                survey: None,
                locale_enforce: false,
            };
            config.write(&opts.config)?;
            Ok(())
        }
        OptCommand::Run => run(&opts),
    }
}

#[tokio::main]
async fn run(opts: &Opt) -> Result<()> {
    let config = LoginServerConfig::read(&opts.config)?;

    let realms = Arc::new(RealmListing::new());

    // realm processes publish status to us over the fabric
    let registry = HandlerRegistry::new();
    registry.register(Arc::new(RealmListService::new(Arc::clone(&realms))));

    let spark = SparkServer::bind(
        &config.spark_address,
        "login",
        registry,
        PeerConfig::default(),
    )
    .await
    .context("could not bind the fabric listener")?;
    tokio::spawn(spark.run());

    let peer = Peer::connect(
        &config.account_service_address,
        "login",
        HandlerRegistry::new(),
        PeerConfig::default(),
    )
    .await
    .context("could not reach the account service")?;

    let accounts = AccountClient::connect(&peer)
        .await
        .map_err(|e| anyhow::anyhow!("account channel failed: {}", e))?;
    let characters = CharacterClient::connect(&peer)
        .await
        .map_err(|e| anyhow::anyhow!("character channel failed: {}", e))?;

    let integrity = match &config.integrity_path {
        Some(path) => Some(Arc::new(
            IntegrityData::load(path, &config.allowed_builds)
                .context("could not load integrity binaries")?,
        )),
        None => None,
    };

    let patches = match &config.patch_path {
        Some(path) => patcher::load_patch_files(path).context("could not load patches")?,
        None => Vec::new(),
    };

    let survey = config
        .survey
        .as_ref()
        .map(|s| patcher::load_survey(s))
        .transpose()
        .context("could not load survey data")?;

    let patcher = Arc::new(Patcher::new(
        config.allowed_builds.clone(),
        patches,
        survey,
    ));

    info!(
        "serving {} allowed build(s), {} patch(es)",
        config.allowed_builds.len(),
        patcher.patch_count(),
    );

    LoginServer {
        services: Arc::new(SparkServices::new(accounts, characters)),
        patcher,
        integrity,
        realms,
        config,
    }
    .start()
    .await
}
