use anyhow::Result;
use procwatch::{
    collector::LinuxProcReader,
    config::Config,
    notifier::DesktopNotifier,
    protocol::{AlertEntry, ProcessEntry, Request, Response, StatusData},
    sampler::{Command, PublishedState, SampleLoop},
    socket::{handle_client, RequestHandler, SocketServer},
};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

struct DaemonState {
    published: watch::Receiver<PublishedState>,
    commands: mpsc::Sender<Command>,
}

impl DaemonState {
    async fn send(&self, command: Command) -> Response {
        match self.commands.send(command).await {
            Ok(()) => Response::Ok,
            Err(e) => Response::Error {
                message: e.to_string(),
            },
        }
    }
}

#[async_trait::async_trait]
impl RequestHandler for DaemonState {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::Status => {
                let state = self.published.borrow().clone();
                Response::Status {
                    data: StatusData {
                        monitored: state.snapshot.processes.len() as u32,
                        offending: state.alerts.len() as u32,
                        paused: state.paused,
                        notifications_enabled: state.notifications_enabled,
                        alerts_raised: state.alerts_raised,
                    },
                }
            }

            Request::ListProcesses => {
                let state = self.published.borrow().clone();
                let mut data: Vec<ProcessEntry> = state
                    .snapshot
                    .processes
                    .iter()
                    .filter_map(|(key, sample)| {
                        state
                            .metrics
                            .get(key)
                            .map(|metrics| ProcessEntry::new(sample, metrics))
                    })
                    .collect();
                data.sort_by_key(|entry| entry.pid);
                Response::Processes { data }
            }

            Request::GetAlerts => {
                let state = self.published.borrow().clone();
                let data = state.alerts.iter().map(AlertEntry::from).collect();
                Response::Alerts { data }
            }

            Request::Pause => self.send(Command::Pause).await,
            Request::Resume => self.send(Command::Resume).await,
            Request::SetNotifications { params } => {
                self.send(Command::SetNotifications(params.enabled)).await
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    info!("procwatch daemon starting");

    let config_path = Config::config_path();
    let config = if config_path.exists() {
        Config::load(&config_path).unwrap_or_else(|e| {
            warn!("failed to load config: {}, using defaults", e);
            Config::default()
        })
    } else {
        info!("no config file found, using defaults");
        Config::default()
    };

    let socket_path = SocketServer::socket_path();
    let server = SocketServer::bind(&socket_path).await?;
    let events_tx = server.broadcast_sender();

    let source = LinuxProcReader::new();
    let transport = DesktopNotifier::new(config.general.notification_timeout_seconds);
    let (sample_loop, published) = SampleLoop::new(config, source, transport, events_tx.clone());

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let sampler = tokio::spawn(sample_loop.run(cmd_rx));

    let state = Arc::new(DaemonState {
        published,
        commands: cmd_tx.clone(),
    });

    let mut sigterm = signal(SignalKind::terminate())?;
    info!("daemon ready, listening for connections");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = sigterm.recv() => break,
            result = server.accept() => match result {
                Ok(stream) => {
                    let state = Arc::clone(&state);
                    let broadcast_rx = events_tx.subscribe();
                    tokio::spawn(async move {
                        handle_client(stream, broadcast_rx, state).await;
                    });
                }
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                }
            }
        }
    }

    info!("shutting down");
    let _ = cmd_tx.send(Command::Shutdown).await;
    let _ = sampler.await;
    Ok(())
}
