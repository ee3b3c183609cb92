use std::{net::Ipv4Addr, sync::Arc};

use anyhow::{Context, Result};
use ebonhold_game::{characters::NamePolicy, realms::RealmType};
use ebonhold_rpc::{account::AccountClient, character::CharacterClient, realm::RealmClient};
use ebonhold_spark::{HandlerRegistry, Peer, PeerConfig};
use human_panic::setup_panic;
use structopt::StructOpt;

use crate::{
    conf::{GatewayServerConfig, NamesConfig, QuirksConfig, RealmConfig},
    dispatcher::EventDispatcher,
    opt::{Opt, OptCommand},
    queue::{Capacity, RealmQueue},
    server::GatewayServer,
    services::SparkServices,
};

mod conf;
mod connection;
mod dispatcher;
mod events;
mod handler;
mod opt;
mod protocol;
mod queue;
mod realm;
mod server;
mod services;

fn main() -> Result<()> {
    setup_panic!();
    tracing_subscriber::fmt::init();

    let opts: Opt = Opt::from_args();

    match opts.command {
        OptCommand::Init => {
            let config = GatewayServerConfig {
                bind_address: "0.0.0.0".parse::<Ipv4Addr>().expect("valid address"),
                port: 8085,
                login_address: "127.0.0.1:6000".to_string(),
                account_service_address: "127.0.0.1:6001".to_string(),
                character_service_address: "127.0.0.1:6002".to_string(),
                realm: RealmConfig {
                    id: 1,
                    name: "Ebonhold".to_string(),
                    realm_type: RealmType::Pvp,
                    external_address: "127.0.0.1:8085".to_string(),
                    category: 1,
                    region: 1,
                },
                max_slots: 1000,
                quirks: QuirksConfig::default(),
                names: NamesConfig::default(),
            };
            config.write(&opts.config)?;
            Ok(())
        }
        OptCommand::Run => run(&opts),
    }
}

#[tokio::main]
async fn run(opts: &Opt) -> Result<()> {
    let config = GatewayServerConfig::read(&opts.config)?;

    let account_peer = Peer::connect(
        &config.account_service_address,
        "gateway",
        HandlerRegistry::new(),
        PeerConfig::default(),
    )
    .await
    .context("could not reach the account service")?;

    let character_peer = if config.character_service_address == config.account_service_address {
        account_peer.clone()
    } else {
        Peer::connect(
            &config.character_service_address,
            "gateway",
            HandlerRegistry::new(),
            PeerConfig::default(),
        )
        .await
        .context("could not reach the character service")?
    };

    let login_peer = Peer::connect(
        &config.login_address,
        "gateway",
        HandlerRegistry::new(),
        PeerConfig::default(),
    )
    .await
    .context("could not reach the login process")?;

    let accounts = AccountClient::connect(&account_peer)
        .await
        .map_err(|e| anyhow::anyhow!("account channel failed: {}", e))?;
    let characters = CharacterClient::connect(&character_peer)
        .await
        .map_err(|e| anyhow::anyhow!("character channel failed: {}", e))?;
    let realm_client = RealmClient::connect(&login_peer)
        .await
        .map_err(|e| anyhow::anyhow!("realm channel failed: {}", e))?;

    let capacity = Arc::new(Capacity::new(config.max_slots));
    let names = Arc::new(
        NamePolicy::new(&config.names.reserved, &config.names.profane)
            .context("invalid name policy patterns")?,
    );

    tokio::spawn(realm::publish_status(
        realm_client,
        config.realm.clone(),
        config.port,
        Arc::clone(&capacity),
    ));

    GatewayServer {
        services: Arc::new(SparkServices::new(
            accounts,
            characters,
            config.realm.id,
        )),
        capacity,
        queue: RealmQueue::default(),
        dispatcher: EventDispatcher::new(),
        names,
        config,
    }
    .start()
    .await
}
