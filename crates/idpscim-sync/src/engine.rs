//! Reconciliation engine: fetch the directory, diff against the last snapshot,
//! apply the minimal set of target operations, then persist the new snapshot.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::{stream, StreamExt, TryStreamExt};
use idpscim_adapters::{DirectoryAdapter, ProvisioningAdapter, ProvisioningError, TargetResource};
use idpscim_core::{Group, GroupMembers, GroupRef, Member, PatchOp, Resource, State, User};
use idpscim_storage::StateRepository;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::batcher::{batch_member_patches, MAX_MEMBERS_PER_PATCH};
use crate::config::ApplyOrder;
use crate::diff::{Delta, Plan};
use crate::error::{Phase, ReconcileError, ReconcileSource};

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub apply_order: ApplyOrder,
    pub fetch_concurrency: usize,
    pub max_members_per_patch: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            apply_order: ApplyOrder::GroupsFirst,
            fetch_concurrency: 8,
            max_members_per_patch: MAX_MEMBERS_PER_PATCH,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            cancel,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub created: usize,
    pub adopted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl EntityCounts {
    pub fn operations(&self) -> usize {
        self.created + self.adopted + self.updated + self.deleted
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Top-level fingerprint of the directory snapshot this run observed.
    pub fingerprint: String,
    pub changed: bool,
    pub persisted: bool,
    pub groups: EntityCounts,
    pub users: EntityCounts,
    pub members_added: usize,
    pub members_removed: usize,
    pub patches_sent: usize,
}

impl ReconcileReport {
    fn new(run_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            started_at: now,
            finished_at: now,
            fingerprint: String::new(),
            changed: false,
            persisted: false,
            groups: EntityCounts::default(),
            users: EntityCounts::default(),
            members_added: 0,
            members_removed: 0,
            patches_sent: 0,
        }
    }

    /// Target calls that changed something: creates, adoptions, replaces, deletes and patches.
    pub fn operations(&self) -> usize {
        self.groups.operations() + self.users.operations() + self.patches_sent
    }
}

/// Target-side calls for one provisionable kind.
trait TargetKind: Resource + Clone + Send + Sync {
    /// Display name for groups, user name for users.
    fn target_name(&self) -> &str;
    fn list(target: &dyn ProvisioningAdapter) -> BoxFuture<'_, Result<Vec<TargetResource>, ProvisioningError>>;
    fn create<'a>(&'a self, target: &'a dyn ProvisioningAdapter) -> BoxFuture<'a, Result<String, ProvisioningError>>;
    fn replace<'a>(&'a self, target: &'a dyn ProvisioningAdapter) -> BoxFuture<'a, Result<(), ProvisioningError>>;
    fn delete<'a>(&'a self, target: &'a dyn ProvisioningAdapter) -> BoxFuture<'a, Result<(), ProvisioningError>>;
}

impl TargetKind for Group {
    fn target_name(&self) -> &str {
        &self.display_name
    }

    fn list(target: &dyn ProvisioningAdapter) -> BoxFuture<'_, Result<Vec<TargetResource>, ProvisioningError>> {
        target.list_groups()
    }

    fn create<'a>(&'a self, target: &'a dyn ProvisioningAdapter) -> BoxFuture<'a, Result<String, ProvisioningError>> {
        target.create_group(self)
    }

    fn replace<'a>(&'a self, target: &'a dyn ProvisioningAdapter) -> BoxFuture<'a, Result<(), ProvisioningError>> {
        target.replace_group(self)
    }

    fn delete<'a>(&'a self, target: &'a dyn ProvisioningAdapter) -> BoxFuture<'a, Result<(), ProvisioningError>> {
        target.delete_group(self)
    }
}

impl TargetKind for User {
    fn target_name(&self) -> &str {
        &self.user_name
    }

    fn list(target: &dyn ProvisioningAdapter) -> BoxFuture<'_, Result<Vec<TargetResource>, ProvisioningError>> {
        target.list_users()
    }

    fn create<'a>(&'a self, target: &'a dyn ProvisioningAdapter) -> BoxFuture<'a, Result<String, ProvisioningError>> {
        target.create_user(self)
    }

    fn replace<'a>(&'a self, target: &'a dyn ProvisioningAdapter) -> BoxFuture<'a, Result<(), ProvisioningError>> {
        target.replace_user(self)
    }

    fn delete<'a>(&'a self, target: &'a dyn ProvisioningAdapter) -> BoxFuture<'a, Result<(), ProvisioningError>> {
        target.delete_user(self)
    }
}

/// Existing target records, looked up by `externalId` first, then by name.
/// A name match never claims a record that carries another entity's `externalId`.
#[derive(Debug, Default)]
struct TargetIndex {
    by_external_id: HashMap<String, String>,
    by_name: HashMap<String, (String, Option<String>)>,
}

impl TargetIndex {
    fn new(records: Vec<TargetResource>) -> Self {
        let mut index = Self::default();
        for record in records {
            if let Some(external_id) = &record.external_id {
                index
                    .by_external_id
                    .insert(external_id.clone(), record.scimid.clone());
            }
            if !record.name.is_empty() {
                index.by_name.insert(
                    record.name.to_lowercase(),
                    (record.scimid, record.external_id),
                );
            }
        }
        index
    }

    fn find(&self, ipid: &str, name: &str) -> Option<&str> {
        if let Some(scimid) = self.by_external_id.get(ipid) {
            return Some(scimid);
        }
        self.by_name
            .get(&name.to_lowercase())
            .filter(|(_, owner)| owner.as_deref().map_or(true, |owner| owner == ipid))
            .map(|(scimid, _)| scimid.as_str())
    }
}

/// `ipid -> scimid` for every group and user the run knows about.
#[derive(Debug, Default)]
struct ScimIds {
    groups: HashMap<String, String>,
    users: HashMap<String, String>,
}

impl ScimIds {
    fn from_state(state: &State) -> Self {
        let mut ids = Self::default();
        for group in &state.groups.resources {
            if !group.scimid.is_empty() {
                ids.groups.insert(group.ipid.clone(), group.scimid.clone());
            }
        }
        for user in &state.users.resources {
            if !user.scimid.is_empty() {
                ids.users.insert(user.ipid.clone(), user.scimid.clone());
            }
        }
        ids
    }

    /// Fill `scimid`s by `ipid`. Fingerprints exclude `scimid`, so they stay valid.
    fn apply_to(&self, state: &mut State) {
        for group in &mut state.groups.resources {
            if let Some(scimid) = self.groups.get(&group.ipid) {
                group.scimid = scimid.clone();
            }
        }
        for user in &mut state.users.resources {
            if let Some(scimid) = self.users.get(&user.ipid) {
                user.scimid = scimid.clone();
            }
        }
        for gm in &mut state.group_members.resources {
            if let Some(scimid) = self.groups.get(&gm.group.ipid) {
                gm.group.scimid = scimid.clone();
            }
            for member in &mut gm.members {
                if let Some(scimid) = self.users.get(&member.ipid) {
                    member.scimid = scimid.clone();
                }
            }
        }
    }

    fn group_ref(&self, group: &Group) -> Result<GroupRef, ReconcileError> {
        let scimid = self.groups.get(&group.ipid).ok_or_else(|| {
            ReconcileError::phase(
                Phase::Apply,
                format!("group {}", group.display_name),
                ReconcileSource::MissingScimId {
                    kind: Group::KIND,
                    ipid: group.ipid.clone(),
                },
            )
        })?;
        Ok(GroupRef {
            scimid: scimid.clone(),
            display_name: group.display_name.clone(),
        })
    }

    fn resolve_members(&self, group: &Group, members: &[Member]) -> Result<Vec<Member>, ReconcileError> {
        members
            .iter()
            .map(|member| {
                let scimid = self.users.get(&member.ipid).ok_or_else(|| {
                    ReconcileError::phase(
                        Phase::Apply,
                        format!("member {} of group {}", member.user_name, group.display_name),
                        ReconcileSource::MissingScimId {
                            kind: User::KIND,
                            ipid: member.ipid.clone(),
                        },
                    )
                })?;
                Ok(Member {
                    scimid: scimid.clone(),
                    ..member.clone()
                })
            })
            .collect()
    }
}

/// Await `fut` unless the run is cancelled first; tag failures with the phase and entity.
async fn guarded<T, E, F>(
    cancel: &CancellationToken,
    phase: Phase,
    entity: String,
    fut: F,
) -> Result<T, ReconcileError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ReconcileSource>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ReconcileError::Cancelled { phase }),
        result = fut => result.map_err(|err| ReconcileError::phase(phase, entity, err)),
    }
}

pub struct Reconciler {
    directory: Arc<dyn DirectoryAdapter>,
    provisioning: Arc<dyn ProvisioningAdapter>,
    state: Arc<dyn StateRepository>,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(
        directory: Arc<dyn DirectoryAdapter>,
        provisioning: Arc<dyn ProvisioningAdapter>,
        state: Arc<dyn StateRepository>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            directory,
            provisioning,
            state,
            options,
        }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// One full reconciliation. The snapshot is written only when every
    /// target operation succeeded and the run was not cancelled.
    pub async fn reconcile(
        &self,
        ctx: &RunContext,
        filters: &[String],
    ) -> Result<ReconcileReport, ReconcileError> {
        let span = info_span!("reconcile", run_id = %ctx.run_id);
        self.reconcile_inner(ctx, filters).instrument(span).await
    }

    async fn reconcile_inner(
        &self,
        ctx: &RunContext,
        filters: &[String],
    ) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::new(ctx.run_id);

        let mut current = self.fetch_current(ctx, filters).await?;
        current
            .validate()
            .map_err(|err| ReconcileError::phase(Phase::Diff, "directory snapshot", err))?;

        let prior = guarded(
            &ctx.cancel,
            Phase::Fetch,
            format!("state {}", self.state.location()),
            self.state.get(),
        )
        .await?;
        let first_run = prior.is_none();
        let prior = prior.unwrap_or_else(State::empty);

        let mut ids = ScimIds::from_state(&prior);
        ids.apply_to(&mut current);
        report.fingerprint = current.fingerprint.clone();

        if !first_run && prior.fingerprint == current.fingerprint {
            info!(fingerprint = %current.fingerprint, "directory unchanged since last sync");
            report.groups.unchanged = current.groups.items;
            report.users.unchanged = current.users.items;
            report.finished_at = Utc::now();
            return Ok(report);
        }

        let plan = Plan::build(&prior, &current);
        report.groups.unchanged = plan.groups.unchanged.len();
        report.users.unchanged = plan.users.unchanged.len();
        info!(
            first_run,
            groups_create = plan.groups.create.len(),
            groups_update = plan.groups.update.len(),
            groups_delete = plan.groups.delete.len(),
            users_create = plan.users.create.len(),
            users_update = plan.users.update.len(),
            users_delete = plan.users.delete.len(),
            membership_changes = plan.memberships.len(),
            "planned reconciliation"
        );

        match self.options.apply_order {
            ApplyOrder::GroupsFirst => {
                ids.groups.extend(self.upsert(ctx, &plan.groups, &mut report.groups).await?);
                ids.users.extend(self.upsert(ctx, &plan.users, &mut report.users).await?);
            }
            ApplyOrder::UsersFirst => {
                ids.users.extend(self.upsert(ctx, &plan.users, &mut report.users).await?);
                ids.groups.extend(self.upsert(ctx, &plan.groups, &mut report.groups).await?);
            }
        }

        self.apply_memberships(ctx, &plan, &ids, &mut report).await?;
        self.delete_all(ctx, &plan.groups.delete, &mut report.groups).await?;
        self.delete_all(ctx, &plan.users.delete, &mut report.users).await?;

        ids.apply_to(&mut current);
        current.last_sync = Utc::now();
        report.changed = !plan.is_empty() || first_run;

        guarded(
            &ctx.cancel,
            Phase::Persist,
            format!("state {}", self.state.location()),
            self.state.put(&current),
        )
        .await?;
        report.persisted = true;
        report.finished_at = Utc::now();

        info!(
            operations = report.operations(),
            members_added = report.members_added,
            members_removed = report.members_removed,
            patches = report.patches_sent,
            "reconciliation complete"
        );
        Ok(report)
    }

    async fn fetch_current(
        &self,
        ctx: &RunContext,
        filters: &[String],
    ) -> Result<State, ReconcileError> {
        let queries: Vec<Option<&str>> = if filters.is_empty() {
            vec![None]
        } else {
            filters.iter().map(|f| Some(f.as_str())).collect()
        };

        let mut groups = Vec::new();
        let mut seen_groups = HashSet::new();
        for query in queries {
            let listed = guarded(
                &ctx.cancel,
                Phase::Fetch,
                format!("groups matching {}", query.unwrap_or("*")),
                self.directory.list_groups(query),
            )
            .await?;
            for group in listed {
                if seen_groups.insert(group.ipid.clone()) {
                    groups.push(group);
                }
            }
        }

        let concurrency = self.options.fetch_concurrency.max(1);
        let memberships: Vec<(Group, Vec<Member>)> = stream::iter(groups)
            .map(|group| async move {
                let members = guarded(
                    &ctx.cancel,
                    Phase::Fetch,
                    format!("members of group {}", group.display_name),
                    self.directory.list_group_members(&group.ipid),
                )
                .await?;
                Ok::<_, ReconcileError>((group, members))
            })
            .buffered(concurrency)
            .try_collect()
            .await?;

        let mut user_ids = Vec::new();
        let mut seen_users = HashSet::new();
        for (_, members) in &memberships {
            for member in members {
                if seen_users.insert(member.ipid.clone()) {
                    user_ids.push(member.ipid.clone());
                }
            }
        }

        let users: Vec<User> = stream::iter(user_ids)
            .map(|ipid| async move {
                guarded(
                    &ctx.cancel,
                    Phase::Fetch,
                    format!("user {ipid}"),
                    self.directory.get_user(&ipid),
                )
                .await
            })
            .buffered(concurrency)
            .try_collect()
            .await?;

        let by_id: HashMap<&str, &User> = users.iter().map(|u| (u.ipid.as_str(), u)).collect();
        let mut groups = Vec::with_capacity(memberships.len());
        let mut group_members = Vec::with_capacity(memberships.len());
        for (mut group, members) in memberships {
            group.refresh_fingerprint();
            let members = members
                .into_iter()
                .map(|m| by_id.get(m.ipid.as_str()).map(|u| u.as_member()).unwrap_or(m))
                .collect();
            group_members.push(GroupMembers::new(group.clone(), members));
            groups.push(group);
        }

        info!(
            groups = groups.len(),
            users = users.len(),
            "fetched directory snapshot"
        );
        Ok(State::new(groups, users, group_members))
    }

    /// Create (or adopt) new records and replace changed ones. Returns the
    /// `scimid`s assigned during this call.
    async fn upsert<T: TargetKind>(
        &self,
        ctx: &RunContext,
        delta: &Delta<T>,
        counts: &mut EntityCounts,
    ) -> Result<HashMap<String, String>, ReconcileError> {
        let target = self.provisioning.as_ref();
        let (unassigned, to_replace): (Vec<&T>, Vec<&T>) =
            delta.update.iter().partition(|r| r.scimid().is_empty());
        let to_create: Vec<&T> = delta.create.iter().chain(unassigned).collect();

        let existing = if to_create.is_empty() {
            TargetIndex::default()
        } else {
            TargetIndex::new(
                guarded(
                    &ctx.cancel,
                    Phase::Apply,
                    format!("listing target {}s", T::KIND),
                    T::list(target),
                )
                .await?,
            )
        };

        let mut assigned = HashMap::with_capacity(to_create.len());
        for resource in to_create {
            let mut resource = resource.clone();
            let entity = format!("{} {}", T::KIND, resource.target_name());
            match existing.find(resource.ipid(), resource.target_name()) {
                Some(scimid) => {
                    warn!(
                        kind = T::KIND,
                        ipid = resource.ipid(),
                        scimid,
                        "adopting existing target record"
                    );
                    resource.set_scimid(scimid.to_string());
                    guarded(&ctx.cancel, Phase::Apply, entity, resource.replace(target)).await?;
                    counts.adopted += 1;
                }
                None => {
                    let scimid =
                        guarded(&ctx.cancel, Phase::Apply, entity, resource.create(target)).await?;
                    resource.set_scimid(scimid);
                    counts.created += 1;
                }
            }
            assigned.insert(resource.ipid().to_string(), resource.scimid().to_string());
        }

        for resource in to_replace {
            let entity = format!("{} {}", T::KIND, resource.target_name());
            guarded(&ctx.cancel, Phase::Apply, entity, resource.replace(target)).await?;
            counts.updated += 1;
        }
        Ok(assigned)
    }

    /// Removals first, then additions. Groups about to be deleted get no removals.
    async fn apply_memberships(
        &self,
        ctx: &RunContext,
        plan: &Plan,
        ids: &ScimIds,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        let deleted: HashSet<&str> = plan.groups.delete.iter().map(|g| g.ipid.as_str()).collect();

        for change in &plan.memberships {
            if change.remove.is_empty() || deleted.contains(change.group.ipid.as_str()) {
                continue;
            }
            let group = ids.group_ref(&change.group)?;
            let members = ids.resolve_members(&change.group, &change.remove)?;
            report.patches_sent += self.send_patches(ctx, &group, PatchOp::Remove, &members).await?;
            report.members_removed += members.len();
        }

        for change in &plan.memberships {
            if change.add.is_empty() {
                continue;
            }
            let group = ids.group_ref(&change.group)?;
            let members = ids.resolve_members(&change.group, &change.add)?;
            report.patches_sent += self.send_patches(ctx, &group, PatchOp::Add, &members).await?;
            report.members_added += members.len();
        }
        Ok(())
    }

    async fn send_patches(
        &self,
        ctx: &RunContext,
        group: &GroupRef,
        op: PatchOp,
        members: &[Member],
    ) -> Result<usize, ReconcileError> {
        let patches =
            batch_member_patches(group, op, members, self.options.max_members_per_patch);
        for patch in &patches {
            guarded(
                &ctx.cancel,
                Phase::Apply,
                format!("{op} members of group {}", group.display_name),
                self.provisioning.patch_group(patch),
            )
            .await?;
        }
        debug!(group = %group.display_name, %op, members = members.len(), patches = patches.len(), "membership patched");
        Ok(patches.len())
    }

    /// A record already gone from the target counts as deleted.
    async fn delete_all<T: TargetKind>(
        &self,
        ctx: &RunContext,
        resources: &[T],
        counts: &mut EntityCounts,
    ) -> Result<(), ReconcileError> {
        let target = self.provisioning.as_ref();
        for resource in resources {
            if resource.scimid().is_empty() {
                warn!(
                    kind = T::KIND,
                    ipid = resource.ipid(),
                    "no provisioning id recorded; skipping delete"
                );
                continue;
            }
            let entity = format!("{} {}", T::KIND, resource.target_name());
            let removed = guarded(&ctx.cancel, Phase::Apply, entity, async {
                match resource.delete(target).await {
                    Ok(()) => Ok(true),
                    Err(err) if err.is_not_found() => Ok(false),
                    Err(err) => Err(err),
                }
            })
            .await?;
            if !removed {
                debug!(kind = T::KIND, ipid = resource.ipid(), "already absent from target");
            }
            counts.deleted += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idpscim_core::Email;

    fn user(ipid: &str) -> User {
        User::new(
            ipid,
            format!("{ipid}@example.com"),
            ipid,
            true,
            vec![Email::primary(format!("{ipid}@example.com"))],
        )
    }

    #[test]
    fn target_index_prefers_external_id_then_case_insensitive_name() {
        let index = TargetIndex::new(vec![
            TargetResource {
                scimid: "s1".into(),
                external_id: Some("g1".into()),
                name: "Renamed".into(),
            },
            TargetResource {
                scimid: "s2".into(),
                external_id: None,
                name: "Admins".into(),
            },
        ]);
        assert_eq!(index.find("g1", "Engineering"), Some("s1"));
        assert_eq!(index.find("g2", "admins"), Some("s2"));
        assert_eq!(index.find("g3", "Nobody"), None);
    }

    #[test]
    fn name_match_skips_records_owned_by_another_entity() {
        let index = TargetIndex::new(vec![TargetResource {
            scimid: "owned-by-other".into(),
            external_id: Some("g-other".into()),
            name: "Engineering".into(),
        }]);
        assert_eq!(index.find("g1", "Engineering"), None);
        assert_eq!(index.find("g-other", "Engineering"), Some("owned-by-other"));
    }

    #[test]
    fn scim_ids_carry_onto_members_without_touching_fingerprints() {
        let mut prior_user = user("u1");
        prior_user.scimid = "scim-u1".into();
        let mut prior_group = Group::new("g1", "Eng", None);
        prior_group.scimid = "scim-g1".into();
        let prior = State::new(vec![prior_group], vec![prior_user], vec![]);

        let group = Group::new("g1", "Eng", None);
        let u1 = user("u1");
        let mut current = State::new(
            vec![group.clone()],
            vec![u1.clone()],
            vec![GroupMembers::new(group, vec![u1.as_member()])],
        );
        let fingerprint = current.fingerprint.clone();

        ScimIds::from_state(&prior).apply_to(&mut current);
        assert_eq!(current.groups.resources[0].scimid, "scim-g1");
        assert_eq!(current.group_members.resources[0].group.scimid, "scim-g1");
        assert_eq!(current.group_members.resources[0].members[0].scimid, "scim-u1");
        assert_eq!(current.fingerprint, fingerprint);
    }

    #[test]
    fn unresolved_member_is_an_apply_error() {
        let ids = ScimIds::default();
        let group = Group::new("g1", "Eng", None);
        let err = ids
            .resolve_members(&group, &[user("u1").as_member()])
            .expect_err("unknown user");
        assert_eq!(err.failed_phase(), Phase::Apply);
    }
}
