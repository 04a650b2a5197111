//! Regulation monitor cycle.
//!
//! One cycle holds the deployment-wide advisory lock, loads due
//! subscriptions, collapses them into one fetch per (regulation, source URL)
//! pair, and applies the change-detector verdict to every member of the
//! group. Each cycle is recorded as an audit row, including skipped and
//! failed cycles.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use regulens_core::{
    defaults, MonitorCounts, MonitorRunRepository, MonitorRunStatus, NotificationRequest, Notifier,
    RegulationRepository, RegulationSubscription, Result, RunTrigger, SingleFlight,
    SourceGroupKey, SubscriptionRepository, VersionReason,
};

use crate::change_detect::{ChangeDetector, ChangeOutcome};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub max_concurrent: usize,
    pub lock_key: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::MONITOR_MAX_CONCURRENT,
            lock_key: defaults::MONITOR_LOCK_KEY,
        }
    }
}

impl MonitorConfig {
    /// Read `MONITOR_MAX_CONCURRENT`, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent: std::env::var("MONITOR_MAX_CONCURRENT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_concurrent)
                .max(1),
            lock_key: defaults.lock_key,
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }
}

/// What one monitor cycle did, mirrored in the audit row.
#[derive(Debug, Clone)]
pub struct MonitorReport {
    pub run_id: Uuid,
    pub status: MonitorRunStatus,
    pub counts: MonitorCounts,
}

pub struct RegulationMonitor {
    subscriptions: Arc<dyn SubscriptionRepository>,
    regulations: Arc<dyn RegulationRepository>,
    runs: Arc<dyn MonitorRunRepository>,
    notifier: Arc<dyn Notifier>,
    lock: Arc<dyn SingleFlight>,
    detector: ChangeDetector,
    config: MonitorConfig,
}

impl RegulationMonitor {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        regulations: Arc<dyn RegulationRepository>,
        runs: Arc<dyn MonitorRunRepository>,
        notifier: Arc<dyn Notifier>,
        lock: Arc<dyn SingleFlight>,
        detector: ChangeDetector,
        config: MonitorConfig,
    ) -> Self {
        Self {
            subscriptions,
            regulations,
            runs,
            notifier,
            lock,
            detector,
            config,
        }
    }

    /// Execute one monitor cycle. At most one cycle runs per deployment;
    /// a concurrent caller records a `Skipped` audit row and returns.
    pub async fn run(
        &self,
        trigger: RunTrigger,
        dry_run: bool,
        regulation_filter: Option<Uuid>,
    ) -> Result<MonitorReport> {
        let now = Utc::now();
        if !self.lock.try_acquire(self.config.lock_key).await? {
            let run_id = self.runs.start(trigger, dry_run, now).await?;
            let counts = MonitorCounts::default();
            self.runs
                .finish(
                    run_id,
                    MonitorRunStatus::Skipped,
                    counts,
                    Some("another monitor cycle holds the lock"),
                    Utc::now(),
                )
                .await?;
            info!(
                subsystem = "jobs",
                component = "monitor",
                run_id = %run_id,
                "Monitor cycle skipped, lock held elsewhere"
            );
            return Ok(MonitorReport {
                run_id,
                status: MonitorRunStatus::Skipped,
                counts,
            });
        }

        let result = self.run_locked(trigger, dry_run, regulation_filter).await;
        if let Err(e) = self.lock.release(self.config.lock_key).await {
            warn!(
                subsystem = "jobs",
                component = "monitor",
                "Failed to release monitor lock: {e}"
            );
        }
        result
    }

    async fn run_locked(
        &self,
        trigger: RunTrigger,
        dry_run: bool,
        regulation_filter: Option<Uuid>,
    ) -> Result<MonitorReport> {
        let now = Utc::now();
        let run_id = self.runs.start(trigger, dry_run, now).await?;

        let due = match self.subscriptions.list_due(now, regulation_filter).await {
            Ok(due) => due,
            Err(e) => {
                self.runs
                    .finish(
                        run_id,
                        MonitorRunStatus::Failed,
                        MonitorCounts::default(),
                        Some(&e.to_string()),
                        Utc::now(),
                    )
                    .await?;
                return Err(e);
            }
        };

        // One fetch per source group even when many users watch the same
        // regulation URL.
        let mut groups: HashMap<SourceGroupKey, Vec<RegulationSubscription>> = HashMap::new();
        for subscription in due {
            let key = SourceGroupKey {
                regulation_id: subscription.regulation_id,
                source_url: subscription.source_url.clone(),
            };
            groups.entry(key).or_default().push(subscription);
        }
        let mut ordered: Vec<(SourceGroupKey, Vec<RegulationSubscription>)> =
            groups.into_iter().collect();
        ordered.sort_by_key(|(_, members)| {
            members
                .iter()
                .map(|m| m.next_check_at)
                .min()
                .unwrap_or(now)
        });

        info!(
            subsystem = "jobs",
            component = "monitor",
            run_id = %run_id,
            group_count = ordered.len(),
            dry_run,
            "Monitor cycle started"
        );

        let mut counts = MonitorCounts::default();
        for batch in ordered.chunks(self.config.max_concurrent) {
            let results = join_all(
                batch
                    .iter()
                    .map(|(key, members)| self.process_group(key, members, dry_run)),
            )
            .await;
            for group_counts in results {
                counts.scanned += group_counts.scanned;
                counts.changed += group_counts.changed;
                counts.versions_created += group_counts.versions_created;
                counts.failed += group_counts.failed;
            }
        }

        self.runs
            .finish(run_id, MonitorRunStatus::Success, counts, None, Utc::now())
            .await?;
        info!(
            subsystem = "jobs",
            component = "monitor",
            run_id = %run_id,
            scanned = counts.scanned,
            changed = counts.changed,
            versions_created = counts.versions_created,
            failed = counts.failed,
            "Monitor cycle finished"
        );
        Ok(MonitorReport {
            run_id,
            status: MonitorRunStatus::Success,
            counts,
        })
    }

    /// Check one source group and apply the verdict to every member.
    /// Failures are counted, never raised; the cycle always completes.
    async fn process_group(
        &self,
        key: &SourceGroupKey,
        members: &[RegulationSubscription],
        dry_run: bool,
    ) -> MonitorCounts {
        let mut counts = MonitorCounts {
            scanned: members.len() as i32,
            ..Default::default()
        };

        // The member with cached validators gets to speak for the group.
        let representative = members
            .iter()
            .find(|m| m.last_content_hash.is_some())
            .unwrap_or(&members[0]);

        let outcome = self
            .detector
            .check(
                &key.source_url,
                representative.last_etag.as_deref(),
                representative.last_modified.as_deref(),
                representative.last_content_hash.as_deref(),
            )
            .await;

        match outcome {
            ChangeOutcome::Error { code, message } => {
                warn!(
                    subsystem = "jobs",
                    component = "monitor",
                    regulation_id = %key.regulation_id,
                    source_url = %key.source_url,
                    error_code = code.as_str(),
                    "Source check failed: {message}"
                );
                counts.failed += members.len() as i32;
                if !dry_run {
                    for member in members {
                        if let Err(e) =
                            self.subscriptions.mark_checked_failed(member.id, Utc::now()).await
                        {
                            error!(
                                subsystem = "jobs",
                                component = "monitor",
                                subscription_id = %member.id,
                                "Failed to record failed check: {e}"
                            );
                        }
                    }
                }
            }
            ChangeOutcome::Unchanged {
                etag,
                last_modified,
            } => {
                debug!(
                    subsystem = "jobs",
                    component = "monitor",
                    regulation_id = %key.regulation_id,
                    "Source unchanged"
                );
                if !dry_run {
                    self.mark_group_ok(members, etag.as_deref(), last_modified.as_deref(), None)
                        .await;
                }
            }
            ChangeOutcome::Changed {
                text,
                hash,
                raw,
                etag,
                last_modified,
                warnings,
            } => {
                for warning in &warnings {
                    debug!(
                        subsystem = "jobs",
                        component = "monitor",
                        regulation_id = %key.regulation_id,
                        "Fetch warning: {warning}"
                    );
                }
                match self
                    .apply_change(key, &text, &hash, raw.as_deref(), dry_run)
                    .await
                {
                    Ok(version_created) => {
                        counts.changed += 1;
                        if version_created {
                            counts.versions_created += 1;
                        }
                        if !dry_run {
                            self.mark_group_ok(
                                members,
                                etag.as_deref(),
                                last_modified.as_deref(),
                                Some(&hash),
                            )
                            .await;
                        }
                    }
                    Err(e) => {
                        error!(
                            subsystem = "jobs",
                            component = "monitor",
                            regulation_id = %key.regulation_id,
                            "Failed to record new version: {e}"
                        );
                        counts.failed += members.len() as i32;
                        if !dry_run {
                            for member in members {
                                let _ = self
                                    .subscriptions
                                    .mark_checked_failed(member.id, Utc::now())
                                    .await;
                            }
                        }
                    }
                }
            }
        }

        counts
    }

    /// Persist the detected change: append a version unless the latest
    /// stored snapshot already carries this hash, then fan out
    /// notifications. Returns whether a version row was (or would be)
    /// created.
    async fn apply_change(
        &self,
        key: &SourceGroupKey,
        text: &str,
        hash: &str,
        raw: Option<&str>,
        dry_run: bool,
    ) -> Result<bool> {
        // Stale subscription hashes must not duplicate a version that is
        // already stored.
        let latest = self.regulations.latest_version(key.regulation_id).await?;
        if latest.as_ref().is_some_and(|v| v.content_hash == hash) {
            debug!(
                subsystem = "jobs",
                component = "monitor",
                regulation_id = %key.regulation_id,
                "Latest stored version already matches, refreshing subscription only"
            );
            return Ok(false);
        }

        if dry_run {
            return Ok(true);
        }

        let version = self
            .regulations
            .create_next_version(
                key.regulation_id,
                text,
                hash,
                raw,
                VersionReason::MonitorDetectedChange,
            )
            .await?;
        info!(
            subsystem = "jobs",
            component = "monitor",
            regulation_id = %key.regulation_id,
            version_number = version.version_number,
            "Created regulation version"
        );

        self.notify_change(key.regulation_id, version.version_number)
            .await;
        Ok(true)
    }

    /// Best-effort fan-out to all active subscribers of the regulation.
    async fn notify_change(&self, regulation_id: Uuid, version_number: i32) {
        let subscribers = match self
            .subscriptions
            .list_active_for_regulation(regulation_id)
            .await
        {
            Ok(subscribers) => subscribers,
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "monitor",
                    regulation_id = %regulation_id,
                    "Failed to load subscribers for notification: {e}"
                );
                return;
            }
        };
        if subscribers.is_empty() {
            return;
        }

        let notifications: Vec<NotificationRequest> = subscribers
            .iter()
            .map(|s| NotificationRequest {
                user_id: s.user_id,
                organization_id: s.organization_id,
                kind: "regulation_changed".to_string(),
                title: "Regulation updated".to_string(),
                message: format!("A regulation you monitor has a new version ({version_number})."),
                related_entity_id: Some(regulation_id),
            })
            .collect();
        if let Err(e) = self.notifier.notify_batch(&notifications).await {
            warn!(
                subsystem = "jobs",
                component = "monitor",
                regulation_id = %regulation_id,
                "Notification insert failed: {e}"
            );
        }

        let mut seen_orgs = Vec::new();
        for subscriber in &subscribers {
            if seen_orgs.contains(&subscriber.organization_id) {
                continue;
            }
            seen_orgs.push(subscriber.organization_id);
            self.notifier
                .broadcast(
                    subscriber.organization_id,
                    "regulation.changed",
                    serde_json::json!({
                        "regulation_id": regulation_id,
                        "version_number": version_number,
                    }),
                )
                .await;
        }
    }

    async fn mark_group_ok(
        &self,
        members: &[RegulationSubscription],
        etag: Option<&str>,
        last_modified: Option<&str>,
        content_hash: Option<&str>,
    ) {
        for member in members {
            if let Err(e) = self
                .subscriptions
                .mark_checked_ok(member.id, etag, last_modified, content_hash, Utc::now())
                .await
            {
                error!(
                    subsystem = "jobs",
                    component = "monitor",
                    subscription_id = %member.id,
                    "Failed to record successful check: {e}"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        InMemoryMonitorRunRepository, InMemoryRegulationRepository, InMemorySingleFlight,
        InMemorySubscriptionRepository, RecordingNotifier,
    };
    use chrono::Duration as ChronoDuration;
    use regulens_ai::{MockDocAi, SourceFetch};
    use regulens_core::{content_hash, Regulation, RegulationStatus, RegulationVersion};

    struct Fixture {
        monitor: RegulationMonitor,
        subscriptions: Arc<InMemorySubscriptionRepository>,
        regulations: Arc<InMemoryRegulationRepository>,
        runs: Arc<InMemoryMonitorRunRepository>,
        notifier: Arc<RecordingNotifier>,
        lock: Arc<InMemorySingleFlight>,
        ai: MockDocAi,
    }

    fn fixture() -> Fixture {
        crate::testing::init_test_tracing();
        let subscriptions = Arc::new(InMemorySubscriptionRepository::new());
        let regulations = Arc::new(InMemoryRegulationRepository::new());
        let runs = Arc::new(InMemoryMonitorRunRepository::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let lock = Arc::new(InMemorySingleFlight::new());
        let ai = MockDocAi::new();
        let monitor = RegulationMonitor::new(
            subscriptions.clone(),
            regulations.clone(),
            runs.clone(),
            notifier.clone(),
            lock.clone(),
            ChangeDetector::new(Arc::new(ai.clone())),
            MonitorConfig::default(),
        );
        Fixture {
            monitor,
            subscriptions,
            regulations,
            runs,
            notifier,
            lock,
            ai,
        }
    }

    fn seed_regulation(f: &Fixture, org: Uuid) -> Uuid {
        let regulation_id = Uuid::new_v4();
        let now = Utc::now();
        f.regulations.insert_regulation(Regulation {
            id: regulation_id,
            organization_id: org,
            title: "Data Retention Directive".to_string(),
            jurisdiction: Some("EU".to_string()),
            status: RegulationStatus::Active,
            created_at: now,
            updated_at: now,
        });
        regulation_id
    }

    fn due_subscription(
        org: Uuid,
        regulation_id: Uuid,
        url: &str,
        prior_hash: Option<&str>,
    ) -> RegulationSubscription {
        let now = Utc::now();
        RegulationSubscription {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            organization_id: org,
            regulation_id,
            source_url: url.to_string(),
            check_interval_secs: 86_400,
            is_active: true,
            last_etag: None,
            last_modified: None,
            last_content_hash: prior_hash.map(str::to_string),
            next_check_at: now - ChronoDuration::minutes(5),
            last_checked_at: None,
            failure_streak: 0,
        }
    }

    fn fetched(text: &str) -> SourceFetch {
        SourceFetch::Fetched {
            extracted_text: text.to_string(),
            normalized_text_hash: None,
            etag: Some("\"v2\"".to_string()),
            last_modified: None,
            raw_html: None,
            warnings: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_lock_held_elsewhere_records_skipped_run() {
        let f = fixture();
        f.lock.hold_elsewhere(defaults::MONITOR_LOCK_KEY);

        let report = f
            .monitor
            .run(RunTrigger::Schedule, false, None)
            .await
            .unwrap();
        assert_eq!(report.status, MonitorRunStatus::Skipped);
        assert_eq!(report.counts.scanned, 0);
        assert_eq!(f.ai.fetch_calls(), 0);

        let runs = f.runs.all();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, MonitorRunStatus::Skipped);
        assert!(runs[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn test_lock_released_after_cycle() {
        let f = fixture();
        f.monitor
            .run(RunTrigger::Schedule, false, None)
            .await
            .unwrap();
        assert!(!f.lock.is_held(defaults::MONITOR_LOCK_KEY));
    }

    #[tokio::test]
    async fn test_one_fetch_per_source_group() {
        let f = fixture();
        let org = Uuid::new_v4();
        let regulation_id = seed_regulation(&f, org);
        let url = "https://law.example/directive";
        // Three watchers of the same source, one of a different source.
        for _ in 0..3 {
            f.subscriptions
                .insert(due_subscription(org, regulation_id, url, None));
        }
        let other_regulation = seed_regulation(&f, org);
        f.subscriptions.insert(due_subscription(
            org,
            other_regulation,
            "https://law.example/other",
            None,
        ));
        f.ai.script_fetch(fetched("Directive text, first capture."));
        f.ai.script_fetch(fetched("Other directive text."));

        let report = f
            .monitor
            .run(RunTrigger::Schedule, false, None)
            .await
            .unwrap();
        assert_eq!(f.ai.fetch_calls(), 2);
        assert_eq!(report.counts.scanned, 4);
        assert_eq!(report.counts.changed, 2);
        assert_eq!(report.counts.versions_created, 2);
    }

    #[tokio::test]
    async fn test_change_appends_version_and_marks_amended() {
        let f = fixture();
        let org = Uuid::new_v4();
        let regulation_id = seed_regulation(&f, org);
        let url = "https://law.example/directive";
        let old_text = "Article 1. Original obligations.";
        let old_hash = content_hash(old_text);
        f.regulations.insert_version(RegulationVersion {
            id: Uuid::new_v4(),
            regulation_id,
            organization_id: org,
            version_number: 1,
            content: old_text.to_string(),
            content_hash: old_hash.clone(),
            raw_source: None,
            reason: VersionReason::Initial,
            created_at: Utc::now(),
        });
        let subscription = due_subscription(org, regulation_id, url, Some(&old_hash));
        let subscription_id = subscription.id;
        f.subscriptions.insert(subscription);
        f.ai.script_fetch(fetched("Article 1. Amended obligations."));

        let report = f
            .monitor
            .run(RunTrigger::Manual, false, None)
            .await
            .unwrap();
        assert_eq!(report.counts.versions_created, 1);

        let versions = f.regulations.versions_of(regulation_id);
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].version_number, 2);
        assert_eq!(versions[1].reason, VersionReason::MonitorDetectedChange);
        assert_eq!(
            f.regulations.status_of(regulation_id),
            Some(RegulationStatus::Amended)
        );

        // The subscription cache moved to the new fingerprint.
        let refreshed = f.subscriptions.get(subscription_id).unwrap();
        assert_eq!(
            refreshed.last_content_hash.as_deref(),
            Some(versions[1].content_hash.as_str())
        );
        assert!(refreshed.next_check_at > Utc::now());
    }

    #[tokio::test]
    async fn test_stale_hash_does_not_duplicate_stored_version() {
        let f = fixture();
        let org = Uuid::new_v4();
        let regulation_id = seed_regulation(&f, org);
        let current_text = "Article 1. Current text.";
        let current_hash = content_hash(current_text);
        f.regulations.insert_version(RegulationVersion {
            id: Uuid::new_v4(),
            regulation_id,
            organization_id: org,
            version_number: 3,
            content: current_text.to_string(),
            content_hash: current_hash.clone(),
            raw_source: None,
            reason: VersionReason::MonitorDetectedChange,
            created_at: Utc::now(),
        });
        // Subscription still carries an older hash, so the detector reports
        // a change; the stored ledger already has this content.
        f.subscriptions.insert(due_subscription(
            org,
            regulation_id,
            "https://law.example/directive",
            Some("stale-hash"),
        ));
        f.ai.script_fetch(fetched(current_text));

        let report = f
            .monitor
            .run(RunTrigger::Schedule, false, None)
            .await
            .unwrap();
        assert_eq!(report.counts.changed, 1);
        assert_eq!(report.counts.versions_created, 0);
        assert_eq!(f.regulations.versions_of(regulation_id).len(), 1);
        assert_eq!(f.notifier.notification_count(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_counts_without_mutating() {
        let f = fixture();
        let org = Uuid::new_v4();
        let regulation_id = seed_regulation(&f, org);
        let subscription =
            due_subscription(org, regulation_id, "https://law.example/directive", None);
        let subscription_id = subscription.id;
        let original_next_check = subscription.next_check_at;
        f.subscriptions.insert(subscription);
        f.ai.script_fetch(fetched("Fresh directive text."));

        let report = f
            .monitor
            .run(RunTrigger::Manual, true, None)
            .await
            .unwrap();
        assert_eq!(report.counts.changed, 1);
        assert_eq!(report.counts.versions_created, 1);

        assert!(f.regulations.versions_of(regulation_id).is_empty());
        assert_eq!(f.notifier.notification_count(), 0);
        let untouched = f.subscriptions.get(subscription_id).unwrap();
        assert_eq!(untouched.next_check_at, original_next_check);
    }

    #[tokio::test]
    async fn test_fetch_failure_reschedules_members() {
        let f = fixture();
        let org = Uuid::new_v4();
        let regulation_id = seed_regulation(&f, org);
        let subscription =
            due_subscription(org, regulation_id, "https://law.example/directive", None);
        let subscription_id = subscription.id;
        f.subscriptions.insert(subscription);
        f.ai.script_fetch(SourceFetch::Failed {
            error_code: Some("upstream_timeout".to_string()),
            message: "gateway timeout".to_string(),
        });

        let report = f
            .monitor
            .run(RunTrigger::Schedule, false, None)
            .await
            .unwrap();
        assert_eq!(report.status, MonitorRunStatus::Success);
        assert_eq!(report.counts.failed, 1);

        let refreshed = f.subscriptions.get(subscription_id).unwrap();
        assert_eq!(refreshed.failure_streak, 1);
        assert!(refreshed.next_check_at > Utc::now());
    }

    #[tokio::test]
    async fn test_notifications_fan_out_to_all_subscribers() {
        let f = fixture();
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();
        let regulation_id = seed_regulation(&f, org_a);
        let url = "https://law.example/directive";
        f.subscriptions
            .insert(due_subscription(org_a, regulation_id, url, None));
        f.subscriptions
            .insert(due_subscription(org_a, regulation_id, url, None));
        f.subscriptions
            .insert(due_subscription(org_b, regulation_id, url, None));
        f.ai.script_fetch(fetched("Directive body."));

        f.monitor
            .run(RunTrigger::Schedule, false, None)
            .await
            .unwrap();

        assert_eq!(f.notifier.notification_count(), 3);
        let broadcasts = f.notifier.broadcasts.lock().unwrap();
        let orgs: Vec<Uuid> = broadcasts.iter().map(|(org, _, _)| *org).collect();
        assert_eq!(broadcasts.len(), 2);
        assert!(orgs.contains(&org_a) && orgs.contains(&org_b));
    }
}
