//! The stats facade: one stable interface over the six collectors.
//!
//! Each accessor reads the memoised state of its underlying collector,
//! triggering that collector's single `collect()` when unset. One
//! `collect()` feeds several accessors, so an endpoint touching stars,
//! forks and languages costs exactly one repository pass.

use crate::collectors::Environment;
use crate::collectors::code_changes::CodeChangeAnalyzer;
use crate::collectors::commit_schedule::{CommitEvent, CommitScheduleCollector};
use crate::collectors::contributions::{ContributionTracker, Streak};
use crate::collectors::engagement::EngagementCollector;
use crate::collectors::repo_stats::{LanguageStats, RepoStatsCollector};
use crate::collectors::traffic::TrafficCollector;
use crate::db::TrafficStore;
use crate::github::GithubClient;
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

pub struct UserStats {
    env: Arc<Environment>,
    repo_stats: RepoStatsCollector,
    contributions: ContributionTracker,
    code_changes: CodeChangeAnalyzer,
    traffic: TrafficCollector,
    engagement: EngagementCollector,
    commit_schedule: CommitScheduleCollector,
}

impl UserStats {
    pub fn new(env: Environment, gh: GithubClient, traffic_store: Arc<TrafficStore>) -> Self {
        let env = Arc::new(env);
        UserStats {
            repo_stats: RepoStatsCollector::new(env.clone(), gh.clone()),
            contributions: ContributionTracker::new(gh.clone()),
            code_changes: CodeChangeAnalyzer::new(gh.clone(), &env.username),
            traffic: TrafficCollector::new(gh.clone(), traffic_store),
            engagement: EngagementCollector::new(gh.clone(), env.more_collabs),
            commit_schedule: CommitScheduleCollector::new(env.clone(), gh),
            env,
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub async fn name(&self) -> Result<String> {
        Ok(self.repo_stats.collect().await?.name.clone())
    }

    pub async fn followers(&self) -> Result<u64> {
        Ok(self.repo_stats.collect().await?.followers)
    }

    pub async fn following(&self) -> Result<u64> {
        Ok(self.repo_stats.collect().await?.following)
    }

    pub async fn stargazers(&self) -> Result<u64> {
        Ok(self.repo_stats.collect().await?.stargazers)
    }

    pub async fn forks(&self) -> Result<u64> {
        Ok(self.repo_stats.collect().await?.forks)
    }

    pub async fn languages(&self) -> Result<BTreeMap<String, LanguageStats>> {
        Ok(self.repo_stats.collect().await?.languages.clone())
    }

    pub async fn languages_proportional(&self) -> Result<BTreeMap<String, f64>> {
        Ok(self
            .repo_stats
            .collect()
            .await?
            .languages
            .iter()
            .map(|(name, stats)| (name.clone(), stats.prop))
            .collect())
    }

    pub async fn repos(&self) -> Result<&BTreeSet<String>> {
        Ok(&self.repo_stats.collect().await?.repos)
    }

    pub async fn repo_visibility(&self) -> Result<&HashMap<String, bool>> {
        Ok(&self.repo_stats.collect().await?.visibility)
    }

    pub async fn total_contributions(&self) -> Result<u64> {
        self.contributions.total_contributions().await
    }

    pub async fn current_streak(&self) -> Result<Streak> {
        Ok(self.contributions.calendar().await?.current)
    }

    pub async fn longest_streak(&self) -> Result<Streak> {
        Ok(self.contributions.calendar().await?.longest)
    }

    pub async fn recent_contributions(&self) -> Result<Vec<u64>> {
        self.contributions.recent_contributions().await
    }

    /// `(lines_added, lines_deleted)` by the user.
    pub async fn lines_changed(&self) -> Result<(u64, u64)> {
        let overview = self.repo_stats.collect().await?;
        let changes = self
            .code_changes
            .analyze(&overview.repos, &overview.empty_repos)
            .await?;
        Ok((changes.additions, changes.deletions))
    }

    pub async fn contributions_percentage(&self) -> Result<String> {
        let overview = self.repo_stats.collect().await?;
        let changes = self
            .code_changes
            .analyze(&overview.repos, &overview.empty_repos)
            .await?;
        Ok(changes.contributions_percentage.clone())
    }

    pub async fn avg_contribution_percent(&self) -> Result<String> {
        let overview = self.repo_stats.collect().await?;
        let changes = self
            .code_changes
            .analyze(&overview.repos, &overview.empty_repos)
            .await?;
        Ok(changes.avg_percent.clone())
    }

    pub async fn contributors(&self) -> Result<HashSet<String>> {
        let overview = self.repo_stats.collect().await?;
        let changes = self
            .code_changes
            .analyze(&overview.repos, &overview.empty_repos)
            .await?;
        Ok(changes.contributors.clone())
    }

    pub async fn views(&self) -> Result<u64> {
        let repos = self.repos().await?;
        Ok(self.traffic.views(repos).await?.count)
    }

    pub async fn views_from_date(&self) -> Result<String> {
        let repos = self.repos().await?;
        Ok(self.traffic.views(repos).await?.from_date.clone())
    }

    pub async fn clones(&self) -> Result<u64> {
        let repos = self.repos().await?;
        Ok(self.traffic.clones(repos).await?.count)
    }

    pub async fn clones_from_date(&self) -> Result<String> {
        let repos = self.repos().await?;
        Ok(self.traffic.clones(repos).await?.from_date.clone())
    }

    pub async fn pull_requests(&self) -> Result<u64> {
        let repos = self.repos().await?;
        self.engagement.pull_requests(repos).await
    }

    pub async fn issues(&self) -> Result<u64> {
        let repos = self.repos().await?;
        self.engagement.issues(repos).await
    }

    pub async fn collaborators(&self) -> Result<u64> {
        let repos = self.repos().await?;
        let contributors = self.contributors().await?;
        self.engagement.collaborators(repos, &contributors).await
    }

    pub async fn weekly_commit_schedule(&self) -> Result<Vec<CommitEvent>> {
        let repos = self.repos().await?;
        Ok(self.commit_schedule.weekly_schedule(repos).await?.clone())
    }
}
