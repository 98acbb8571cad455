//! The store-service interface and its in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use skirmish_protocol::{BattleCode, SessionToken};
use skirmish_tick::TickScheduler;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{HandoffConfig, HandoffError, HandoffRecord};

/// Shared registry of pending battle hand-offs.
///
/// Synchronous on purpose: the coordinator publishes from inside its
/// event handlers and the relay looks up from inside connection callbacks,
/// neither of which can `.await`.
pub trait HandoffStore: Send + Sync + 'static {
    /// Publishes a record.
    ///
    /// # Errors
    /// [`HandoffError::DuplicateToken`] if a live record has the same token.
    fn put(&self, record: HandoffRecord) -> Result<(), HandoffError>;

    /// Looks a record up by token.
    ///
    /// # Errors
    /// [`HandoffError::UnknownToken`] or, for records past their maximum
    /// age that have not been swept yet, [`HandoffError::Expired`].
    fn get(&self, token: &SessionToken) -> Result<HandoffRecord, HandoffError>;

    /// Removes every record of a battle. Returns how many were removed.
    fn remove_battle(&self, code: &BattleCode) -> usize;

    /// Removes records older than the maximum age. Returns how many.
    fn sweep(&self) -> usize;

    /// Number of records held, expired or not.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct Inner {
    by_token: HashMap<SessionToken, HandoffRecord>,
    /// Index kept in sync with `by_token`.
    by_battle: HashMap<BattleCode, Vec<SessionToken>>,
}

impl Inner {
    fn remove_token(&mut self, token: &SessionToken) -> Option<HandoffRecord> {
        let record = self.by_token.remove(token)?;
        if let Some(tokens) = self.by_battle.get_mut(&record.battle_code) {
            tokens.retain(|t| t != token);
            if tokens.is_empty() {
                self.by_battle.remove(&record.battle_code);
            }
        }
        Some(record)
    }
}

/// [`HandoffStore`] held in process memory behind one mutex.
pub struct MemoryHandoffStore {
    inner: Mutex<Inner>,
    config: HandoffConfig,
}

impl MemoryHandoffStore {
    pub fn new(config: HandoffConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            config,
        }
    }

    pub fn config(&self) -> &HandoffConfig {
        &self.config
    }
}

impl Default for MemoryHandoffStore {
    fn default() -> Self {
        Self::new(HandoffConfig::default())
    }
}

impl HandoffStore for MemoryHandoffStore {
    fn put(&self, record: HandoffRecord) -> Result<(), HandoffError> {
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.by_token.get(&record.token) {
            if existing.age() <= self.config.max_age {
                return Err(HandoffError::DuplicateToken(record.token));
            }
            let token = record.token.clone();
            inner.remove_token(&token);
        }

        tracing::debug!(
            battle_code = %record.battle_code,
            user_id = %record.user_id,
            token = %record.token,
            "hand-off published"
        );
        inner
            .by_battle
            .entry(record.battle_code.clone())
            .or_default()
            .push(record.token.clone());
        inner.by_token.insert(record.token.clone(), record);
        Ok(())
    }

    fn get(&self, token: &SessionToken) -> Result<HandoffRecord, HandoffError> {
        let inner = self.inner.lock();
        let record = inner
            .by_token
            .get(token)
            .ok_or_else(|| HandoffError::UnknownToken(token.clone()))?;
        if record.age() > self.config.max_age {
            return Err(HandoffError::Expired(token.clone()));
        }
        Ok(record.clone())
    }

    fn remove_battle(&self, code: &BattleCode) -> usize {
        let mut inner = self.inner.lock();
        let Some(tokens) = inner.by_battle.remove(code) else {
            return 0;
        };
        for token in &tokens {
            inner.by_token.remove(token);
        }
        tracing::debug!(battle_code = %code, removed = tokens.len(), "hand-offs removed");
        tokens.len()
    }

    fn sweep(&self) -> usize {
        let mut inner = self.inner.lock();
        let stale: Vec<SessionToken> = inner
            .by_token
            .values()
            .filter(|r| r.age() > self.config.max_age)
            .map(|r| r.token.clone())
            .collect();
        for token in &stale {
            inner.remove_token(token);
        }
        if !stale.is_empty() {
            tracing::info!(swept = stale.len(), "stale hand-offs swept");
        }
        stale.len()
    }

    fn len(&self) -> usize {
        self.inner.lock().by_token.len()
    }
}

/// Runs [`HandoffStore::sweep`] every `config.sweep_interval` until
/// `cancel` fires.
pub fn spawn_sweeper(
    store: Arc<dyn HandoffStore>,
    config: &HandoffConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut scheduler = TickScheduler::every(config.sweep_interval);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = scheduler.wait_for_tick() => {
                    store.sweep();
                }
            }
        }
        tracing::debug!("hand-off sweeper stopped");
    })
}

// =========================================================================
// Tests
// =========================================================================
