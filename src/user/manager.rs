use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::models::User;
use crate::database::{Completion, UserDatabase};
use crate::statistic::{StatisticRegistry, StatisticType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserError {
    #[error("Player {0} is not online")]
    NotOnline(Uuid),

    #[error("Unknown statistic: {0}")]
    UnknownStatistic(String),
}

/// Owner of every online [`User`].
///
/// Lives on the authoritative loop. Storage results come back as
/// [`Completion`]s and are applied here, never by workers.
pub struct UserManager {
    database: UserDatabase,
    registry: Arc<StatisticRegistry>,
    users: HashMap<Uuid, User>,
    completions: mpsc::UnboundedReceiver<Completion>,
}

impl UserManager {
    pub fn new(database: UserDatabase, completions: mpsc::UnboundedReceiver<Completion>) -> Self {
        Self {
            registry: Arc::clone(database.registry()),
            database,
            users: HashMap::new(),
            completions,
        }
    }

    pub fn database(&self) -> &UserDatabase {
        &self.database
    }

    pub fn registry(&self) -> &Arc<StatisticRegistry> {
        &self.registry
    }

    /// Brings a player online with default statistics and queues the load.
    /// Joining twice keeps the existing user.
    #[instrument(skip(self, name))]
    pub fn join(&mut self, uuid: Uuid, name: &str) -> &User {
        if !self.users.contains_key(&uuid) {
            let user = User::new(uuid, name, &self.registry);
            self.database.load_statistics(&user);
            info!(name, "Player joined");
            self.users.insert(uuid, user);
        }
        &self.users[&uuid]
    }

    /// Takes a player offline after queueing a full save.
    #[instrument(skip(self))]
    pub fn leave(&mut self, uuid: Uuid) -> Option<User> {
        self.recover(uuid).ok()?;
        let user = self.users.remove(&uuid)?;
        self.database.save_all_statistic(&user);
        info!(name = user.name(), "Player left");
        Some(user)
    }

    pub fn user(&self, uuid: Uuid) -> Option<&User> {
        self.users.get(&uuid)
    }

    pub fn online(&self) -> Vec<Uuid> {
        let mut online: Vec<Uuid> = self.users.keys().copied().collect();
        online.sort();
        online
    }

    pub fn online_count(&self) -> usize {
        self.users.len()
    }

    pub fn set_stat(&mut self, uuid: Uuid, statistic: &str, value: i32) -> Result<(), UserError> {
        let statistic = self.statistic(statistic)?;
        self.user_mut(uuid)?.set_stat(&statistic, value);
        Ok(())
    }

    /// Adds `delta` and returns the new value.
    pub fn add_stat(&mut self, uuid: Uuid, statistic: &str, delta: i32) -> Result<i32, UserError> {
        let statistic = self.statistic(statistic)?;
        Ok(self.user_mut(uuid)?.add_stat(&statistic, delta))
    }

    pub fn save_statistic(&mut self, uuid: Uuid, statistic: &str) -> Result<(), UserError> {
        let statistic = self.statistic(statistic)?;
        self.recover(uuid)?;
        let user = self.users.get(&uuid).ok_or(UserError::NotOnline(uuid))?;
        self.database.save_statistic(user, &statistic);
        Ok(())
    }

    pub fn save_all(&mut self, uuid: Uuid) -> Result<(), UserError> {
        self.recover(uuid)?;
        let user = self.users.get(&uuid).ok_or(UserError::NotOnline(uuid))?;
        self.database.save_all_statistic(user);
        Ok(())
    }

    /// Applies one completion. Results for players who already left are
    /// dropped.
    pub fn apply(&mut self, completion: Completion) {
        let uuid = completion.uuid();
        let Some(user) = self.users.get_mut(&uuid) else {
            debug!(%uuid, "Completion for offline player ignored");
            return;
        };

        match completion {
            Completion::Loaded { values, created, .. } => {
                user.apply_loaded(&values);
                debug!(%uuid, created, "Stored statistics applied");
            }
            Completion::LoadFailed { kind, .. } => {
                // Saves stay off until a retried load reaches the store.
                user.mark_load_failed(kind);
                warn!(%uuid, kind, "Statistics load failed");
            }
            Completion::Recovered { .. } => {
                user.mark_recovered();
                info!(%uuid, "Statistics store reachable for player again");
            }
        }
    }

    /// Applies every completion that has already arrived without waiting.
    pub fn apply_completions(&mut self) -> usize {
        let mut applied = 0;
        loop {
            match self.completions.try_recv() {
                Ok(completion) => {
                    self.apply(completion);
                    applied += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return applied,
            }
        }
    }

    pub async fn recv_completion(&mut self) -> Option<Completion> {
        self.completions.recv().await
    }

    /// Saves every online player and releases the store.
    pub async fn shutdown(&mut self) {
        self.apply_completions();
        let online: Vec<Uuid> = self.users.keys().copied().collect();
        for uuid in online {
            if let Err(e) = self.recover(uuid) {
                debug!(%uuid, error = %e, "Recovery skipped");
            }
        }
        info!(online = self.users.len(), "Shutting down user manager");
        self.database.disable(self.users.values()).await;
    }

    fn statistic(&self, name: &str) -> Result<StatisticType, UserError> {
        self.registry
            .get(name)
            .cloned()
            .ok_or_else(|| UserError::UnknownStatistic(name.to_string()))
    }

    /// Requeues the load when the last one found the store unreachable, so
    /// the save that follows lands behind it.
    fn recover(&mut self, uuid: Uuid) -> Result<(), UserError> {
        let user = self.users.get_mut(&uuid).ok_or(UserError::NotOnline(uuid))?;
        if user.needs_recovery() && self.database.recover(user) {
            user.mark_recovering();
        }
        Ok(())
    }

    fn user_mut(&mut self, uuid: Uuid) -> Result<&mut User, UserError> {
        self.users.get_mut(&uuid).ok_or(UserError::NotOnline(uuid))
    }
}
