pub mod admin;
pub mod attempts;
pub mod config;
pub mod gate;
pub mod identity;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod workers;

use std::fmt::Display;
use std::net::TcpListener;
use std::thread::{sleep, Builder, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::bounded;
use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1};
use signal_hook::iterator::Signals;

use config::Config;
use service::WhitelistService;

pub const APP_NAME: &str = "palisade: allow-list access gate";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn run(config: Config) -> ::anyhow::Result<()> {
    let signals = Signals::new([SIGUSR1, SIGINT, SIGTERM])?;

    if config.network.enabled && config.network.connection_workers == 0 {
        return Err(anyhow::anyhow!(
            "network.connection_workers must be at least 1 when network is enabled"
        ));
    }

    let mut service = WhitelistService::new(config.clone());

    service.start()?;

    let result = run_workers(&config, &service, signals);

    service.stop()?;

    result
}

fn run_workers(
    config: &Config,
    service: &WhitelistService,
    mut signals: Signals,
) -> anyhow::Result<()> {
    let mut join_handles = Vec::new();

    if config.network.enabled {
        let listener = TcpListener::bind(config.network.address)
            .with_context(|| format!("bind to {}", config.network.address))?;

        ::log::info!("Listening for queries on {}", config.network.address);

        let (connection_sender, connection_receiver) =
            bounded(config.network.worker_channel_size);

        for i in 0..config.network.connection_workers {
            let config = config.network.clone();
            let checker = service.checker().clone();
            let connection_receiver = connection_receiver.clone();

            let handle = Builder::new()
                .name(format!("connection-{:02}", i + 1))
                .spawn(move || {
                    workers::network::run_connection_worker(config, checker, connection_receiver)
                })
                .with_context(|| "spawn connection worker")?;

            join_handles.push((WorkerType::Connection(i), handle));
        }

        let handle = Builder::new()
            .name("acceptor".into())
            .spawn(move || workers::network::run_acceptor(listener, connection_sender))
            .with_context(|| "spawn acceptor")?;

        join_handles.push((WorkerType::Acceptor, handle));
    }

    // Spawn signal handler thread
    {
        let reload_trigger = service
            .reload_trigger()
            .ok_or_else(|| anyhow::anyhow!("service not started"))?;

        let handle: JoinHandle<anyhow::Result<()>> = Builder::new()
            .name("signals".into())
            .spawn(move || {
                for signal in &mut signals {
                    match signal {
                        SIGUSR1 => {
                            ::log::info!("Received SIGUSR1, reloading allow-list");

                            reload_trigger.trigger();
                        }
                        SIGINT | SIGTERM => {
                            ::log::info!("Received signal {}, shutting down", signal);

                            break;
                        }
                        _ => unreachable!(),
                    }
                }

                Ok(())
            })
            .context("spawn signal worker")?;

        join_handles.push((WorkerType::Signals, handle));
    }

    loop {
        for (i, (_, handle)) in join_handles.iter().enumerate() {
            if handle.is_finished() {
                let (worker_type, handle) = join_handles.remove(i);

                return match (worker_type, handle.join()) {
                    (WorkerType::Signals, Ok(Ok(()))) => Ok(()),
                    (worker_type, Ok(Ok(()))) => Err(anyhow::anyhow!("{} stopped", worker_type)),
                    (worker_type, Ok(Err(err))) => {
                        Err(err.context(format!("{} stopped", worker_type)))
                    }
                    (worker_type, Err(_)) => Err(anyhow::anyhow!("{} panicked", worker_type)),
                };
            }
        }

        sleep(Duration::from_millis(200));
    }
}

enum WorkerType {
    Acceptor,
    Connection(usize),
    Signals,
}

impl Display for WorkerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Acceptor => f.write_str("Acceptor"),
            Self::Connection(index) => f.write_fmt(format_args!("Connection worker {}", index + 1)),
            Self::Signals => f.write_str("Signals worker"),
        }
    }
}
