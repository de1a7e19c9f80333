//! Sync cycle and loop

use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::RunMode;
use crate::flair::{
    ConflictResolver, FlairError, MatchRule, SuppressionLists, build_snapshots, merge_snapshots,
    plan_sync,
};
use crate::forum::{FlairSink, FlairSource};
use crate::sync::{CycleReport, ForumReport};

/// Everything a cycle needs besides the forum clients and the resolver
#[derive(Debug, Clone)]
pub struct SyncContext {
    /// Forums in merge order
    pub forums: Vec<String>,
    pub rule: MatchRule,
    pub suppression: SuppressionLists,
    pub dry_run: bool,
}

/// Run one full cycle: snapshot every forum, merge, plan, then upload each
/// forum's batch independently.
///
/// Snapshot and merge failures abort the cycle. Upload failures are recorded
/// per forum in the returned report.
pub async fn run_cycle(
    ctx: &SyncContext,
    source: &dyn FlairSource,
    sink: &dyn FlairSink,
    resolver: &mut dyn ConflictResolver,
) -> Result<CycleReport, FlairError> {
    let mut report = CycleReport::new(Utc::now(), ctx.dry_run);

    let snapshots = build_snapshots(source, &ctx.forums, &ctx.rule).await?;
    let outcome = merge_snapshots(&ctx.forums, &snapshots, &ctx.rule, resolver)?;
    let plan = plan_sync(
        &ctx.forums,
        &snapshots,
        &outcome.canonical,
        &ctx.rule,
        &ctx.suppression,
    );

    report.users_merged = outcome.canonical.len();
    report.conflicts = outcome.conflicts;

    for forum_plan in &plan.forums {
        let planned = forum_plan.updates.len();
        let mut forum_report = ForumReport {
            forum: forum_plan.forum.clone(),
            planned,
            applied: 0,
            error: None,
        };

        if planned == 0 {
            report.forums.push(forum_report);
            continue;
        }

        if ctx.dry_run {
            for update in &forum_plan.updates {
                info!(
                    forum = %forum_plan.forum,
                    user = %update.user,
                    flair_css_class = %update.flair_css_class,
                    flair_text = %update.flair_text,
                    "Dry run: would update flair"
                );
            }
            report.forums.push(forum_report);
            continue;
        }

        match sink.apply_flairs(&forum_plan.forum, &forum_plan.updates).await {
            Ok(()) => {
                forum_report.applied = planned;
            }
            Err(err) => {
                let err = FlairError::from_sink(&forum_plan.forum, planned, err);
                if let FlairError::PartialFailure { rejected, .. } = &err {
                    forum_report.applied = planned.saturating_sub(rejected.len());
                }
                error!(forum = %forum_plan.forum, error = %err, "Flair upload failed");
                forum_report.error = Some(err.to_string());
            }
        }

        report.forums.push(forum_report);
    }

    report.finished_at = Utc::now();
    report.log_summary();

    Ok(report)
}

/// Drive cycles until `shutdown` resolves, or run once.
///
/// Continuous mode logs a failed cycle and tries again after `interval`,
/// re-fetching everything. Once mode returns an error when the cycle or any
/// forum failed.
pub async fn run_sync_loop<S>(
    ctx: &SyncContext,
    source: &dyn FlairSource,
    sink: &dyn FlairSink,
    resolver: &mut dyn ConflictResolver,
    mode: RunMode,
    interval: Duration,
    shutdown: S,
) -> Result<(), FlairError>
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        let result = tokio::select! {
            result = run_cycle(ctx, source, sink, &mut *resolver) => result,
            _ = &mut shutdown => {
                info!("Shutdown requested, abandoning current cycle");
                return Ok(());
            }
        };

        if mode == RunMode::Once {
            let report = result?;
            if report.is_success() {
                return Ok(());
            }
            return Err(FlairError::CycleFailed {
                forums: report.failed_forums(),
            });
        }

        if let Err(err) = result {
            warn!(error = %err, retry_in_secs = interval.as_secs(), "Sync cycle failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = &mut shutdown => {
                info!("Shutdown requested");
                return Ok(());
            }
        }
    }
}
