//! Reconciliation passes against an in-process fake platform.

use async_trait::async_trait;
use rolesync_client::models::CreateMessage;
use rolesync_client::models::{ApiMember, ApiUser, PrimaryGuild};
use rolesync_client::{
    AttributeFetch, MemberSource, PlatformError, PlatformResult, RosterClient, RosterConfig,
    RosterFetch,
};
use rolesync_core::{
    AttributeRecord, ChangeKind, ChannelId, GroupConfig, GroupConfigProvider, GroupId,
    InMemoryGroupConfigProvider, MemberId, MemberRecord, ProviderError, ProviderResult, RoleId,
};
use rolesync_engine::{
    AuditEmitter, EngineConfig, MessageSink, PassOutcome, ReconciliationEngine, RoleMutator,
    RosterSource, Scheduler,
};
use rolesync_gateway::{GroupSnapshot, ReadyGate, RosterCache};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════
// Fakes
// ═══════════════════════════════════════════════════════════════════════════

struct FlagGate(AtomicBool);

impl ReadyGate for FlagGate {
    fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One object standing in for the platform: rosters, tags, role writes and
/// message posts all share state, so applied changes show up on the next
/// roster refresh.
#[derive(Default)]
struct FakePlatform {
    rosters: Mutex<HashMap<GroupId, Vec<MemberRecord>>>,
    tags: Mutex<HashMap<MemberId, GroupId>>,
    /// Roster fetches stop after this many members and report truncation.
    truncate_after: Mutex<Option<usize>>,
    unavailable_rosters: Mutex<HashSet<GroupId>>,
    failing_members: Mutex<HashSet<MemberId>>,
    mutation_delay: Mutex<Option<Duration>>,
    mutations: Mutex<Vec<(GroupId, MemberId, ChangeKind)>>,
    messages: Mutex<Vec<(ChannelId, CreateMessage)>>,
    active: AtomicU32,
    max_active: AtomicU32,
}

impl FakePlatform {
    fn add_member(&self, group: &str, id: &str, name: &str, holds: Option<&str>, tag: Option<&str>) {
        let mut record = MemberRecord::new(MemberId::new(id), name);
        if let Some(role) = holds {
            record = record.with_role(RoleId::new(role));
        }
        self.rosters
            .lock()
            .unwrap()
            .entry(GroupId::new(group))
            .or_default()
            .push(record);
        if let Some(tag) = tag {
            self.tags
                .lock()
                .unwrap()
                .insert(MemberId::new(id), GroupId::new(tag));
        }
    }

    fn mutations(&self) -> Vec<(GroupId, MemberId, ChangeKind)> {
        self.mutations.lock().unwrap().clone()
    }

    fn messages(&self) -> Vec<(ChannelId, CreateMessage)> {
        self.messages.lock().unwrap().clone()
    }

    async fn mutate(
        &self,
        group_id: &GroupId,
        member_id: &MemberId,
        role_id: &RoleId,
        kind: ChangeKind,
    ) -> PlatformResult<()> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let delay = *self.mutation_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.failing_members.lock().unwrap().contains(member_id) {
            return Err(PlatformError::ApiError {
                status: 500,
                code: None,
                detail: "internal error".into(),
            });
        }

        self.mutations
            .lock()
            .unwrap()
            .push((group_id.clone(), member_id.clone(), kind));
        if let Some(member) = self
            .rosters
            .lock()
            .unwrap()
            .get_mut(group_id)
            .and_then(|m| m.iter_mut().find(|m| &m.member_id == member_id))
        {
            match kind {
                ChangeKind::Add => member.current_role_ids.insert(role_id.clone()),
                ChangeKind::Remove => member.current_role_ids.remove(role_id),
            };
        }
        Ok(())
    }
}

#[async_trait]
impl RosterSource for FakePlatform {
    async fn fetch_roster(&self, group_id: &GroupId) -> RosterFetch {
        if self.unavailable_rosters.lock().unwrap().contains(group_id) {
            return RosterFetch::default();
        }
        let mut members = self
            .rosters
            .lock()
            .unwrap()
            .get(group_id)
            .cloned()
            .unwrap_or_default();
        members.sort_by(|a, b| a.member_id.cmp(&b.member_id));

        let truncate_after = *self.truncate_after.lock().unwrap();
        let complete = truncate_after.map_or(true, |n| n >= members.len());
        if let Some(n) = truncate_after {
            members.truncate(n);
        }

        let tags = self.tags.lock().unwrap();
        let records = members
            .iter()
            .map(|m| {
                let record = AttributeRecord {
                    member_id: m.member_id.clone(),
                    observed_group_id: tags.get(&m.member_id).cloned(),
                };
                (m.member_id.clone(), record)
            })
            .collect();
        RosterFetch {
            members,
            attributes: AttributeFetch {
                records,
                pages: 1,
                complete,
            },
        }
    }
}

#[async_trait]
impl RoleMutator for FakePlatform {
    async fn add_role(&self, group_id: &GroupId, member_id: &MemberId, role_id: &RoleId) -> PlatformResult<()> {
        self.mutate(group_id, member_id, role_id, ChangeKind::Add).await
    }

    async fn remove_role(&self, group_id: &GroupId, member_id: &MemberId, role_id: &RoleId) -> PlatformResult<()> {
        self.mutate(group_id, member_id, role_id, ChangeKind::Remove).await
    }
}

#[async_trait]
impl MessageSink for FakePlatform {
    async fn post_message(&self, channel_id: &ChannelId, message: &CreateMessage) -> PlatformResult<()> {
        self.messages
            .lock()
            .unwrap()
            .push((channel_id.clone(), message.clone()));
        Ok(())
    }
}

/// Counts `list_group_configs` calls, optionally failing them.
struct CountingProvider {
    inner: InMemoryGroupConfigProvider,
    lists: AtomicU32,
    fail: bool,
}

#[async_trait]
impl GroupConfigProvider for CountingProvider {
    async fn list_group_configs(&self) -> ProviderResult<Vec<GroupConfig>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProviderError::Unavailable("database offline".into()));
        }
        self.inner.list_group_configs().await
    }

    async fn upsert_group_config(&self, config: GroupConfig) -> ProviderResult<GroupConfig> {
        self.inner.upsert_group_config(config).await
    }

    async fn get_group_config(&self, group_id: &GroupId) -> ProviderResult<Option<GroupConfig>> {
        self.inner.get_group_config(group_id).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Harness
// ═══════════════════════════════════════════════════════════════════════════

struct Harness {
    engine: Arc<ReconciliationEngine>,
    platform: Arc<FakePlatform>,
    provider: Arc<CountingProvider>,
    gate: Arc<FlagGate>,
    cache: RosterCache,
}

fn g1() -> GroupConfig {
    GroupConfig::new(GroupId::new("1"), RoleId::new("5")).with_audit_sink(ChannelId::new("3"))
}

fn g2() -> GroupConfig {
    GroupConfig::new(GroupId::new("2"), RoleId::new("6"))
}

async fn harness(configs: Vec<GroupConfig>, fail_provider: bool) -> Harness {
    let platform = Arc::new(FakePlatform::default());
    let provider = Arc::new(CountingProvider {
        inner: InMemoryGroupConfigProvider::from_configs(configs).unwrap(),
        lists: AtomicU32::new(0),
        fail: fail_provider,
    });
    let gate = Arc::new(FlagGate(AtomicBool::new(true)));
    let cache = RosterCache::new();

    cache
        .insert_group(
            GroupSnapshot::new(GroupId::new("1"))
                .with_role(RoleId::new("5"), "Tagged")
                .with_channel(ChannelId::new("3")),
        )
        .await;
    cache
        .insert_group(GroupSnapshot::new(GroupId::new("2")).with_role(RoleId::new("6"), "Tagged"))
        .await;

    let engine = Arc::new(ReconciliationEngine::new(
        provider.clone(),
        gate.clone(),
        cache.clone(),
        platform.clone(),
        platform.clone(),
        AuditEmitter::new(platform.clone()),
        EngineConfig::default(),
    ));

    Harness {
        engine,
        platform,
        provider,
        gate,
        cache,
    }
}

fn completed(outcome: PassOutcome) -> rolesync_engine::PassSummary {
    match outcome {
        PassOutcome::Completed(summary) => summary,
        other => panic!("Expected completed pass, got {other:?}"),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Diff and apply
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_pass_adds_removes_and_audits() {
    let h = harness(vec![g1()], false).await;
    h.platform.add_member("1", "10", "alice", None, Some("1"));
    h.platform.add_member("1", "11", "bob", Some("5"), Some("9"));
    h.platform.add_member("1", "12", "carol", Some("5"), Some("1"));
    h.platform.add_member("1", "13", "dave", None, None);

    let summary = completed(h.engine.run_pass().await);

    let group = summary.group(&GroupId::new("1")).unwrap();
    assert_eq!(group.added, 1);
    assert_eq!(group.removed, 1);
    assert_eq!(group.errors, 0);

    assert_eq!(
        h.platform.mutations(),
        vec![
            (GroupId::new("1"), MemberId::new("10"), ChangeKind::Add),
            (GroupId::new("1"), MemberId::new("11"), ChangeKind::Remove),
        ]
    );

    let messages = h.platform.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, ChannelId::new("3"));
    let fields = &messages[0].1.embeds[0].fields;
    assert_eq!(fields[0].name, "Added");
    assert_eq!(fields[0].value, "alice");
    assert_eq!(fields[1].name, "Removed");
    assert_eq!(fields[1].value, "bob");

    // Applied changes are reflected in the cache right away.
    let cached = h.cache.members(&GroupId::new("1")).await;
    assert!(cached[0].has_role(&RoleId::new("5")));
    assert!(!cached[1].has_role(&RoleId::new("5")));
}

#[tokio::test]
async fn test_second_pass_changes_nothing() {
    let h = harness(vec![g1()], false).await;
    h.platform.add_member("1", "10", "alice", None, Some("1"));
    h.platform.add_member("1", "11", "bob", Some("5"), None);

    completed(h.engine.run_pass().await);
    let summary = completed(h.engine.run_pass().await);

    let group = summary.group(&GroupId::new("1")).unwrap();
    assert_eq!((group.added, group.removed), (0, 0));
    assert_eq!(h.platform.mutations().len(), 2);
    assert_eq!(h.platform.messages().len(), 1);
}

#[tokio::test]
async fn test_group_without_sink_is_not_audited() {
    let h = harness(vec![g2()], false).await;
    h.platform.add_member("2", "20", "erin", None, Some("2"));

    let summary = completed(h.engine.run_pass().await);

    assert_eq!(summary.added(), 1);
    assert!(h.platform.messages().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// Fault isolation
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_member_failure_does_not_stop_group_or_pass() {
    let h = harness(vec![g1(), g2()], false).await;
    h.platform.add_member("1", "10", "alice", None, Some("1"));
    h.platform.add_member("1", "11", "bob", None, Some("1"));
    h.platform.add_member("2", "20", "erin", None, Some("2"));
    h.platform
        .failing_members
        .lock()
        .unwrap()
        .insert(MemberId::new("10"));

    let summary = completed(h.engine.run_pass().await);

    let first = summary.group(&GroupId::new("1")).unwrap();
    assert_eq!(first.errors, 1);
    assert_eq!(first.added, 1);
    assert_eq!(summary.group(&GroupId::new("2")).unwrap().added, 1);

    let mutated: Vec<MemberId> = h.platform.mutations().into_iter().map(|m| m.1).collect();
    assert_eq!(mutated, vec![MemberId::new("11"), MemberId::new("20")]);

    // Only the applied change is reported.
    let messages = h.platform.messages();
    assert_eq!(messages[0].1.embeds[0].fields[0].value, "bob");
}

#[tokio::test]
async fn test_group_failure_does_not_stop_pass() {
    let h = harness(vec![g1(), g2()], false).await;
    h.platform.add_member("1", "10", "alice", None, Some("1"));
    h.platform.add_member("2", "20", "erin", None, Some("2"));
    h.platform
        .unavailable_rosters
        .lock()
        .unwrap()
        .insert(GroupId::new("1"));

    let summary = completed(h.engine.run_pass().await);

    let first = summary.group(&GroupId::new("1")).unwrap();
    assert!(first.is_skipped());
    assert!(first.skipped_reason.as_deref().unwrap().contains("Roster unavailable"));
    assert_eq!(summary.group(&GroupId::new("2")).unwrap().added, 1);
}

#[tokio::test]
async fn test_config_lookup_failure_aborts_pass() {
    let h = harness(vec![g1()], true).await;

    let outcome = h.engine.run_pass().await;

    assert!(matches!(outcome, PassOutcome::Aborted(ref msg) if msg.contains("database offline")));
    assert!(h.platform.mutations().is_empty());
    // The flag is released, so the next tick runs.
    assert!(!h.engine.is_running());
}

#[tokio::test]
async fn test_pass_does_nothing_when_not_ready() {
    let h = harness(vec![g1()], false).await;
    h.platform.add_member("1", "10", "alice", None, Some("1"));
    h.gate.0.store(false, Ordering::SeqCst);

    assert_eq!(h.engine.run_pass().await, PassOutcome::NotReady);
    assert_eq!(h.provider.lists.load(Ordering::SeqCst), 0);
    assert!(h.platform.mutations().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// Skips
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_missing_role_or_channel_skips_group() {
    let missing_role = GroupConfig::new(GroupId::new("2"), RoleId::new("99"));
    let missing_channel = GroupConfig::new(GroupId::new("1"), RoleId::new("5"))
        .with_audit_sink(ChannelId::new("404"));
    let unknown_group = GroupConfig::new(GroupId::new("7"), RoleId::new("5"));
    let h = harness(vec![missing_role, missing_channel, unknown_group], false).await;
    h.platform.add_member("1", "10", "alice", None, Some("1"));
    h.platform.add_member("2", "20", "erin", None, Some("2"));

    let summary = completed(h.engine.run_pass().await);

    assert_eq!(summary.groups.len(), 3);
    assert!(summary.groups.iter().all(|g| g.is_skipped()));
    assert!(h.platform.mutations().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// Truncated attribute fetch
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_truncated_fetch_only_touches_fetched_members() {
    let h = harness(vec![g1()], false).await;
    h.platform.add_member("1", "10", "alice", Some("5"), None);
    h.platform.add_member("1", "11", "bob", Some("5"), None);
    h.platform.add_member("1", "12", "carol", Some("5"), None);
    // Seen earlier by the warm fetch, but beyond the page that succeeds now.
    for (id, name) in [("11", "bob"), ("12", "carol")] {
        h.cache
            .upsert_member(
                &GroupId::new("1"),
                MemberRecord::new(MemberId::new(id), name).with_role(RoleId::new("5")),
            )
            .await;
    }
    *h.platform.truncate_after.lock().unwrap() = Some(1);

    let summary = completed(h.engine.run_pass().await);

    let group = summary.group(&GroupId::new("1")).unwrap();
    assert_eq!(group.removed, 1);
    assert_eq!(group.withheld, 2);
    assert_eq!(
        h.platform.mutations(),
        vec![(GroupId::new("1"), MemberId::new("10"), ChangeKind::Remove)]
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// Mutual exclusion
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn test_overlapping_pass_is_skipped() {
    let h = harness(vec![g1()], false).await;
    h.platform.add_member("1", "10", "alice", None, Some("1"));
    *h.platform.mutation_delay.lock().unwrap() = Some(Duration::from_secs(10));

    let engine = h.engine.clone();
    let first = tokio::spawn(async move { engine.run_pass().await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.engine.is_running());
    assert_eq!(h.engine.run_pass().await, PassOutcome::Skipped);

    assert!(matches!(first.await.unwrap(), PassOutcome::Completed(_)));
    assert_eq!(h.provider.lists.load(Ordering::SeqCst), 1);
    assert_eq!(h.platform.max_active.load(Ordering::SeqCst), 1);
    assert!(!h.engine.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_ticks_during_long_pass_are_dropped() {
    let h = harness(vec![g1()], false).await;
    h.platform.add_member("1", "10", "alice", None, Some("1"));
    *h.platform.mutation_delay.lock().unwrap() = Some(Duration::from_secs(12));

    let scheduler = Scheduler::new().with_task("reconcile", Duration::from_secs(5), h.engine.clone());
    scheduler.start_once().await;

    // Ticks at 5s and 10s land while the first pass is still applying.
    tokio::time::sleep(Duration::from_secs(13)).await;
    assert_eq!(h.provider.lists.load(Ordering::SeqCst), 1);

    // The 15s tick finds the flag clear.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.provider.lists.load(Ordering::SeqCst), 2);
    assert_eq!(h.platform.max_active.load(Ordering::SeqCst), 1);

    scheduler.stop().await;
}

// ═══════════════════════════════════════════════════════════════════════════
// Remote load
// ═══════════════════════════════════════════════════════════════════════════

/// Serves one fixed member page and counts how often it is requested.
struct CountingPages {
    page: Vec<ApiMember>,
    requests: AtomicU32,
}

#[async_trait]
impl MemberSource for CountingPages {
    async fn list_members_page(
        &self,
        _group_id: &GroupId,
        _limit: u32,
        _after: &str,
    ) -> PlatformResult<Vec<ApiMember>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.page.clone())
    }
}

fn api_member(id: &str, tag: Option<&str>, roles: &[&str]) -> ApiMember {
    ApiMember {
        user: Some(ApiUser {
            id: MemberId::new(id),
            username: format!("user{id}"),
            global_name: None,
            bot: false,
            primary_guild: tag.map(|g| PrimaryGuild {
                identity_guild_id: Some(GroupId::new(g)),
                identity_enabled: Some(true),
                tag: None,
            }),
        }),
        nick: None,
        roles: roles.iter().map(|r| RoleId::new(*r)).collect(),
    }
}

#[tokio::test]
async fn test_pass_walks_member_listing_once_per_group() {
    let h = harness(vec![g1()], false).await;
    let pages = Arc::new(CountingPages {
        page: vec![api_member("10", Some("1"), &[]), api_member("11", None, &["5"])],
        requests: AtomicU32::new(0),
    });
    let roster = RosterClient::new(pages.clone())
        .with_config(RosterConfig::default().with_page_delay(Duration::ZERO));
    let engine = ReconciliationEngine::new(
        h.provider.clone(),
        h.gate.clone(),
        h.cache.clone(),
        Arc::new(roster),
        h.platform.clone(),
        AuditEmitter::new(h.platform.clone()),
        EngineConfig::default(),
    );

    let summary = completed(engine.run_pass().await);

    assert_eq!(pages.requests.load(Ordering::SeqCst), 1);
    let group = summary.group(&GroupId::new("1")).unwrap();
    assert_eq!((group.added, group.removed), (1, 1));
    assert_eq!(h.cache.members(&GroupId::new("1")).await.len(), 2);
}
