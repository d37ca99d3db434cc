// The authoritative loop: a single task that exclusively owns the
// UserManager. Everything else talks to it through a HostHandle.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::user::{StatValues, UserError, UserManager};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("Host loop has stopped")]
    Stopped,

    #[error(transparent)]
    User(#[from] UserError),
}

/// Player profile as seen by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerView {
    pub uuid: Uuid,
    pub name: String,
    pub loaded: bool,
    pub stats: StatValues,
}

#[derive(Debug)]
pub enum HostCommand {
    Join {
        uuid: Uuid,
        name: String,
        reply: oneshot::Sender<PlayerView>,
    },
    Leave {
        uuid: Uuid,
        reply: oneshot::Sender<bool>,
    },
    AddStat {
        uuid: Uuid,
        statistic: String,
        delta: i32,
        reply: oneshot::Sender<Result<i32, UserError>>,
    },
    Player {
        uuid: Uuid,
        reply: oneshot::Sender<Option<PlayerView>>,
    },
    Online {
        reply: oneshot::Sender<Vec<Uuid>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone)]
pub struct HostHandle {
    sender: mpsc::Sender<HostCommand>,
}

impl HostHandle {
    pub async fn join(&self, uuid: Uuid, name: impl Into<String>) -> Result<PlayerView, HostError> {
        let name = name.into();
        self.request(|reply| HostCommand::Join { uuid, name, reply })
            .await
    }

    /// Returns whether the player was online.
    pub async fn leave(&self, uuid: Uuid) -> Result<bool, HostError> {
        self.request(|reply| HostCommand::Leave { uuid, reply })
            .await
    }

    /// Adds `delta`, queues a save of that statistic and returns the new value.
    pub async fn add_stat(
        &self,
        uuid: Uuid,
        statistic: impl Into<String>,
        delta: i32,
    ) -> Result<i32, HostError> {
        let statistic = statistic.into();
        let value = self
            .request(|reply| HostCommand::AddStat {
                uuid,
                statistic,
                delta,
                reply,
            })
            .await??;
        Ok(value)
    }

    pub async fn player(&self, uuid: Uuid) -> Result<Option<PlayerView>, HostError> {
        self.request(|reply| HostCommand::Player { uuid, reply })
            .await
    }

    pub async fn online(&self) -> Result<Vec<Uuid>, HostError> {
        self.request(|reply| HostCommand::Online { reply }).await
    }

    /// Flushes every online player and stops the loop.
    pub async fn shutdown(&self) -> Result<(), HostError> {
        self.request(|reply| HostCommand::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> HostCommand,
    ) -> Result<T, HostError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .await
            .map_err(|_| HostError::Stopped)?;
        response.await.map_err(|_| HostError::Stopped)
    }
}

/// Spawns the authoritative loop.
pub fn spawn_host(manager: UserManager) -> (HostHandle, JoinHandle<()>) {
    let (sender, receiver) = mpsc::channel(64);
    let task = tokio::spawn(run(manager, receiver));
    (HostHandle { sender }, task)
}

async fn run(mut manager: UserManager, mut commands: mpsc::Receiver<HostCommand>) {
    info!("Host loop started");

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    debug!("All host handles dropped");
                    manager.shutdown().await;
                    break;
                };
                if let Flow::Stop = handle(&mut manager, command).await {
                    break;
                }
            }
            Some(completion) = manager.recv_completion() => manager.apply(completion),
        }
    }

    info!("Host loop stopped");
}

enum Flow {
    Continue,
    Stop,
}

async fn handle(manager: &mut UserManager, command: HostCommand) -> Flow {
    // Commands observe every load that finished before they arrived.
    manager.apply_completions();

    match command {
        HostCommand::Join { uuid, name, reply } => {
            manager.join(uuid, &name);
            let _ = reply.send(view(manager, uuid).unwrap_or_else(|| PlayerView {
                uuid,
                name,
                loaded: false,
                stats: StatValues::new(),
            }));
        }
        HostCommand::Leave { uuid, reply } => {
            let _ = reply.send(manager.leave(uuid).is_some());
        }
        HostCommand::AddStat {
            uuid,
            statistic,
            delta,
            reply,
        } => {
            let result = manager.add_stat(uuid, &statistic, delta).and_then(|value| {
                manager.save_statistic(uuid, &statistic)?;
                Ok(value)
            });
            let _ = reply.send(result);
        }
        HostCommand::Player { uuid, reply } => {
            let _ = reply.send(view(manager, uuid));
        }
        HostCommand::Online { reply } => {
            let _ = reply.send(manager.online());
        }
        HostCommand::Shutdown { reply } => {
            manager.shutdown().await;
            let _ = reply.send(());
            return Flow::Stop;
        }
    }
    Flow::Continue
}

fn view(manager: &UserManager, uuid: Uuid) -> Option<PlayerView> {
    let user = manager.user(uuid)?;
    let stats = manager
        .registry()
        .iter()
        .map(|statistic| (statistic.name().to_string(), user.stat(statistic)))
        .collect();

    Some(PlayerView {
        uuid,
        name: user.name().to_string(),
        loaded: user.is_loaded(),
        stats,
    })
}
