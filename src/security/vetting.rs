//! Join-time participant vetting.
//!
//! Per (channel, participant) the engine moves `unknown -> checking ->
//! {approved | banned}`. An existing approval short-circuits everything, so
//! re-running the check is a no-op. Registry or lookup failures abort
//! without action: a false ban is worse than a missed bot.

use crate::config::ModerationConfig;
use crate::db::Database;
use crate::services::{BotList, BotRegistry, ModerationOutcome, PlatformApi};
use crate::telemetry::spans;
use dashmap::DashSet;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{Instrument, debug, info, warn};

/// A participant to vet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub user_id: String,
    pub login: String,
}

/// What the engine did with one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VetOutcome {
    /// An approval already existed. No action taken.
    AlreadyApproved,
    /// Another check for the same participant is running.
    InProgress,
    /// Not a known bot; approval recorded.
    Approved,
    /// Known bot, timed out.
    Banned { channel_count: u64 },
    /// Known bot, but the timeout call failed.
    BanFailed(ModerationOutcome),
    /// Vetting is disabled or a collaborator failed; nothing was done.
    Skipped(&'static str),
}

pub struct ModerationEngine {
    config: ModerationConfig,
    db: Database,
    platform: Arc<dyn PlatformApi>,
    bots: Arc<dyn BotRegistry>,
    checking: DashSet<(String, String)>,
}

/// Removes the participant from the `checking` set on every exit path.
struct CheckingGuard<'a> {
    set: &'a DashSet<(String, String)>,
    key: (String, String),
}

impl Drop for CheckingGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

impl ModerationEngine {
    pub fn new(
        config: ModerationConfig,
        db: Database,
        platform: Arc<dyn PlatformApi>,
        bots: Arc<dyn BotRegistry>,
    ) -> Self {
        Self {
            config,
            db,
            platform,
            bots,
            checking: DashSet::new(),
        }
    }

    /// Handle a join event: vet the joining login, then sweep the roster for
    /// anyone else not yet approved.
    pub async fn on_join(&self, channel_id: &str, login: &str) -> VetOutcome {
        let span = spans::vetting(channel_id, login);
        async {
            if !self.config.enabled {
                return VetOutcome::Skipped("disabled");
            }

            let user = match timeout(self.config.fetch_timeout(), self.platform.user_by_login(login)).await {
                Ok(Ok(Some(user))) => user,
                Ok(Ok(None)) => {
                    debug!("Joining login not found");
                    return VetOutcome::Skipped("unknown_user");
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Unable to look up joining user");
                    return VetOutcome::Skipped("lookup_failed");
                }
                Err(_) => {
                    warn!("User lookup timed out");
                    return VetOutcome::Skipped("lookup_failed");
                }
            };
            let joined = Candidate {
                user_id: user.id,
                login: user.login,
            };

            let outcome = self.vet(channel_id, &joined).await;
            if matches!(outcome, VetOutcome::AlreadyApproved | VetOutcome::Skipped(_)) {
                return outcome;
            }

            self.sweep_roster(channel_id, &joined.user_id).await;
            outcome
        }
        .instrument(span)
        .await
    }

    /// Vet one participant against the ledger and the bot registry.
    pub async fn vet(&self, channel_id: &str, candidate: &Candidate) -> VetOutcome {
        if !self.config.enabled {
            return VetOutcome::Skipped("disabled");
        }
        let key = (channel_id.to_string(), candidate.user_id.clone());
        if !self.checking.insert(key.clone()) {
            return VetOutcome::InProgress;
        }
        let _guard = CheckingGuard {
            set: &self.checking,
            key,
        };

        match self.db.approvals().is_approved(channel_id, &candidate.user_id).await {
            Ok(true) => {
                debug!(user = %candidate.login, "Already approved");
                return VetOutcome::AlreadyApproved;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "Unable to check approval");
                return VetOutcome::Skipped("ledger_failed");
            }
        }

        let Some(bots) = self.bot_list().await else {
            return VetOutcome::Skipped("registry_failed");
        };
        self.decide(channel_id, candidate, &bots).await
    }

    async fn bot_list(&self) -> Option<Arc<BotList>> {
        match timeout(self.config.fetch_timeout(), self.bots.fetch()).await {
            Ok(Ok(list)) => Some(list),
            Ok(Err(e)) => {
                warn!(error = %e, "Unable to download bot list");
                None
            }
            Err(_) => {
                warn!("Bot list download timed out");
                None
            }
        }
    }

    async fn decide(&self, channel_id: &str, candidate: &Candidate, bots: &BotList) -> VetOutcome {
        match bots.get(&candidate.login) {
            Some(bot) => {
                let reason = format!("known bot account (seen in {} channels)", bot.channel_count);
                let outcome = self
                    .platform
                    .ban(
                        channel_id,
                        &candidate.user_id,
                        Some(self.config.bot_timeout_secs),
                        &reason,
                    )
                    .await;
                if outcome.is_success() {
                    info!(user = %candidate.login, channels = bot.channel_count, "Timed out known bot");
                    VetOutcome::Banned {
                        channel_count: bot.channel_count,
                    }
                } else {
                    warn!(user = %candidate.login, outcome = outcome.as_str(), "Unable to time out known bot");
                    VetOutcome::BanFailed(outcome)
                }
            }
            None => {
                match self
                    .db
                    .approvals()
                    .approve(channel_id, &candidate.user_id, false)
                    .await
                {
                    Ok(_) => {
                        crate::metrics::record_approval();
                        debug!(user = %candidate.login, "Not a bot, approved");
                    }
                    Err(e) => warn!(user = %candidate.login, error = %e, "Unable to record approval"),
                }
                VetOutcome::Approved
            }
        }
    }

    /// Vet every roster member not yet approved. Best effort.
    async fn sweep_roster(&self, channel_id: &str, skip_user_id: &str) {
        let roster = match timeout(self.config.fetch_timeout(), self.platform.chatters(channel_id)).await {
            Ok(Ok(roster)) => roster,
            Ok(Err(e)) => {
                debug!(error = %e, "Unable to fetch chatter roster");
                return;
            }
            Err(_) => {
                debug!("Chatter roster fetch timed out");
                return;
            }
        };

        let mut banned = 0usize;
        for chatter in roster.into_iter().filter(|c| c.user_id != skip_user_id) {
            let candidate = Candidate {
                user_id: chatter.user_id,
                login: chatter.user_login,
            };
            if let VetOutcome::Banned { .. } = self.vet(channel_id, &candidate).await {
                banned += 1;
            }
        }
        if banned > 0 {
            info!(banned, "Roster sweep timed out known bots");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{ApiError, Chatter, EventSubscription, FollowInfo, KnownBot, PlatformUser, StreamInfo};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakePlatform {
        roster: Vec<Chatter>,
        bans: Mutex<Vec<(String, Option<u32>, String)>>,
    }

    fn user(id: &str, login: &str) -> PlatformUser {
        PlatformUser {
            id: id.into(),
            login: login.into(),
            display_name: login.into(),
            kind: String::new(),
            broadcaster_type: String::new(),
            description: String::new(),
            profile_image_url: String::new(),
            created_at: chrono::Utc::now(),
        }
    }

    #[async_trait]
    impl PlatformApi for FakePlatform {
        async fn user_by_login(&self, login: &str) -> Result<Option<PlatformUser>, ApiError> {
            Ok(Some(user(&format!("id-{}", login), login)))
        }
        async fn user_by_id(&self, id: &str) -> Result<Option<PlatformUser>, ApiError> {
            Ok(Some(user(id, id)))
        }
        async fn stream(&self, _: &str) -> Result<Option<StreamInfo>, ApiError> {
            Ok(None)
        }
        async fn follow(&self, _: &str, _: &str) -> Result<Option<FollowInfo>, ApiError> {
            Ok(None)
        }
        async fn chatters(&self, _: &str) -> Result<Vec<Chatter>, ApiError> {
            Ok(self.roster.clone())
        }
        async fn ban(&self, _: &str, user_id: &str, secs: Option<u32>, reason: &str) -> ModerationOutcome {
            self.bans
                .lock()
                .unwrap()
                .push((user_id.to_string(), secs, reason.to_string()));
            ModerationOutcome::Success
        }
        async fn unban(&self, _: &str, _: &str) -> ModerationOutcome {
            ModerationOutcome::Success
        }
        async fn delete_message(&self, _: &str, _: Option<&str>) -> ModerationOutcome {
            ModerationOutcome::Success
        }
        async fn users_by_id(&self, ids: &[String]) -> Result<Vec<PlatformUser>, ApiError> {
            Ok(ids.iter().map(|id| user(id, id)).collect())
        }
        async fn user_by_token(&self, _: &str) -> Result<Option<PlatformUser>, ApiError> {
            Ok(None)
        }
        async fn subscribe_follows(&self, _: &str, _: &str, _: &str) -> Result<(), ApiError> {
            Ok(())
        }
        async fn follow_subscriptions(&self) -> Result<Vec<EventSubscription>, ApiError> {
            Ok(Vec::new())
        }
        async fn unsubscribe(&self, _: &str) -> Result<(), ApiError> {
            Ok(())
        }
    }

    struct FakeBots {
        fail: bool,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl BotRegistry for FakeBots {
        async fn fetch(&self) -> Result<Arc<BotList>, ApiError> {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err(ApiError::Status(503));
            }
            Ok(Arc::new(BotList::new([KnownBot {
                login: "spambot".into(),
                channel_count: 4200,
                user_id: "id-spambot".into(),
            }])))
        }
    }

    async fn engine(platform: FakePlatform, fail: bool) -> (ModerationEngine, Arc<FakePlatform>, Database) {
        let db = Database::new(":memory:").await.unwrap();
        let platform = Arc::new(platform);
        let bots = Arc::new(FakeBots {
            fail,
            fetches: AtomicUsize::new(0),
        });
        let engine = ModerationEngine::new(ModerationConfig::default(), db.clone(), platform.clone(), bots);
        (engine, platform, db)
    }

    #[tokio::test]
    async fn test_known_bot_is_timed_out() {
        let (engine, platform, db) = engine(FakePlatform::default(), false).await;
        let outcome = engine.on_join("100", "spambot").await;
        assert_eq!(outcome, VetOutcome::Banned { channel_count: 4200 });

        let bans = platform.bans.lock().unwrap();
        assert_eq!(bans.len(), 1);
        assert_eq!(bans[0].0, "id-spambot");
        assert_eq!(bans[0].1, Some(1_209_600));
        assert_eq!(bans[0].2, "known bot account (seen in 4200 channels)");
        drop(bans);
        assert!(!db.approvals().is_approved("100", "id-spambot").await.unwrap());
    }

    #[tokio::test]
    async fn test_human_is_approved_once() {
        let (engine, platform, db) = engine(FakePlatform::default(), false).await;
        assert_eq!(engine.on_join("100", "carol").await, VetOutcome::Approved);
        assert_eq!(db.approvals().is_manual("100", "id-carol").await.unwrap(), Some(false));
        assert_eq!(engine.on_join("100", "carol").await, VetOutcome::AlreadyApproved);
        assert!(platform.bans.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_approved_user_never_moderated_twice() {
        let (engine, platform, db) = engine(FakePlatform::default(), false).await;
        db.approvals().approve("100", "id-spambot", true).await.unwrap();
        for _ in 0..2 {
            assert_eq!(engine.on_join("100", "spambot").await, VetOutcome::AlreadyApproved);
        }
        assert!(platform.bans.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_registry_failure_fails_open() {
        let (engine, platform, db) = engine(FakePlatform::default(), true).await;
        assert_eq!(
            engine.on_join("100", "spambot").await,
            VetOutcome::Skipped("registry_failed")
        );
        assert!(platform.bans.lock().unwrap().is_empty());
        assert_eq!(db.approvals().count("100").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_roster_sweep() {
        let roster = vec![
            Chatter {
                user_id: "id-spambot".into(),
                user_login: "spambot".into(),
                user_name: "SpamBot".into(),
            },
            Chatter {
                user_id: "id-dave".into(),
                user_login: "dave".into(),
                user_name: "Dave".into(),
            },
        ];
        let (engine, platform, db) = engine(FakePlatform { roster, ..Default::default() }, false).await;
        assert_eq!(engine.on_join("100", "carol").await, VetOutcome::Approved);
        assert!(db.approvals().is_approved("100", "id-dave").await.unwrap());
        assert_eq!(platform.bans.lock().unwrap().len(), 1);
    }
}
