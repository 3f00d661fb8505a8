//! Build version derivation.
//!
//! Release builds take the configured version verbatim. Development builds
//! derive a rolling version from the checkout's tag or branch via the
//! `versions` branch map, and fall back to `999.<timestamp>` whenever that
//! information is unavailable. Source-control problems only ever warn.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::assemble::{BuildType, EffectiveConfig};
use crate::error::{Error, Result};

/// Width of the abbreviated commit id.
pub const SHORT_COMMIT_LEN: usize = 14;
pub const DIRTY_SUFFIX: &str = "-dirty";
pub const FALLBACK_VERSION_PREFIX: &str = "999";

/// Minute-precision build stamp used inside version strings.
pub fn build_timestamp(now: &DateTime<Utc>) -> String {
    now.format("%Y%m%d%H%M").to_string()
}

pub fn build_date(now: &DateTime<Utc>) -> String {
    now.format("%a %d %b %Y %H:%M UTC").to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: String,
    pub build_uuid: String,
    pub build_timestamp: String,
    pub build_date: String,
    pub git_commit: String,
    pub git_branch: String,
    pub lts_build: bool,
}

/// What the checkout looks like. Each query answers `Ok(None)` when the
/// information simply does not exist (no tag at HEAD, detached HEAD) and
/// `Err` when the repository could not be read.
pub trait SourceControl {
    fn head_commit(&self) -> Result<String>;
    fn is_dirty(&self) -> Result<bool>;
    fn exact_tag(&self) -> Result<Option<String>>;
    fn current_branch(&self) -> Result<Option<String>>;
}

/// [`SourceControl`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCheckout {
    pub repo: PathBuf,
}

impl GitCheckout {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }

    fn git(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new("git")
            .arg("-C")
            .arg(&self.repo)
            .args(args)
            .output()
            .map_err(|e| {
                Error::msg(format!(
                    "failed to run git {} in {}: {e}",
                    args.join(" "),
                    self.repo.display()
                ))
            })
    }

    fn git_stdout(&self, args: &[&str]) -> Result<Option<String>> {
        let out = self.git(args)?;
        if !out.status.success() {
            return Ok(None);
        }
        let s = String::from_utf8_lossy(&out.stdout).trim().to_string();
        Ok(Some(s).filter(|s| !s.is_empty()))
    }
}

impl SourceControl for GitCheckout {
    fn head_commit(&self) -> Result<String> {
        let out = self.git(&["rev-parse", "--verify", "HEAD"])?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(Error::msg(format!(
                "git rev-parse HEAD failed in {}: {}",
                self.repo.display(),
                stderr.trim()
            )));
        }
        let parsed = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if parsed.is_empty() {
            return Err(Error::msg(format!(
                "git rev-parse HEAD returned empty output in {}",
                self.repo.display()
            )));
        }
        Ok(parsed)
    }

    fn is_dirty(&self) -> Result<bool> {
        let out = self.git(&["status", "--porcelain", "--untracked-files=no"])?;
        if !out.status.success() {
            return Err(Error::msg(format!(
                "git status failed in {}",
                self.repo.display()
            )));
        }
        Ok(!out.stdout.iter().all(u8::is_ascii_whitespace))
    }

    fn exact_tag(&self) -> Result<Option<String>> {
        self.git_stdout(&["describe", "--tags", "--exact-match", "HEAD"])
    }

    fn current_branch(&self) -> Result<Option<String>> {
        self.git_stdout(&["symbolic-ref", "--quiet", "--short", "HEAD"])
    }
}

/// Commit id and human-readable ref, or the reason they are unavailable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckoutState {
    pub commit: String,
    pub ref_name: String,
}

pub fn probe_checkout(scm: &dyn SourceControl) -> std::result::Result<CheckoutState, String> {
    let head = scm.head_commit().map_err(|e| e.to_string())?;
    let mut commit: String = head.chars().take(SHORT_COMMIT_LEN).collect();
    if scm.is_dirty().map_err(|e| e.to_string())? {
        commit.push_str(DIRTY_SUFFIX);
    }
    let ref_name = match scm.exact_tag().map_err(|e| e.to_string())? {
        Some(tag) => tag,
        None => scm
            .current_branch()
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "HEAD is detached and not at a tag".to_string())?,
    };
    Ok(CheckoutState { commit, ref_name })
}

/// Branch → version prefix, read from a JSON object.
#[derive(Debug, Clone, Default)]
pub struct VersionMap {
    entries: BTreeMap<String, String>,
}

impl VersionMap {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| {
            Error::not_found(format!(
                "failed to read branch version map {}: {e}",
                path.display()
            ))
        })?;
        let entries: BTreeMap<String, String> = serde_json::from_str(&data).map_err(|e| {
            Error::parse(format!(
                "invalid branch version map {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self { entries })
    }

    pub fn prefix_for(&self, ref_name: &str) -> Option<&str> {
        self.entries.get(ref_name).map(String::as_str)
    }
}

impl FromIterator<(String, String)> for VersionMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

pub fn rolling_version(prefix: &str, timestamp: &str) -> String {
    format!("{prefix}-rolling-{timestamp}")
}

pub fn fallback_version(timestamp: &str) -> String {
    format!("{FALLBACK_VERSION_PREFIX}.{timestamp}")
}

/// Development version for `ref_name`; the map result is only consulted when
/// a ref was obtained.
pub fn development_version(
    ref_name: &str,
    map: impl FnOnce() -> Result<VersionMap>,
    timestamp: &str,
) -> String {
    if ref_name.is_empty() {
        warn!("could not determine the current branch or tag; using fallback version");
        return fallback_version(timestamp);
    }
    match map() {
        Ok(map) => match map.prefix_for(ref_name) {
            Some(prefix) => rolling_version(prefix, timestamp),
            None => {
                warn!("branch '{ref_name}' has no version mapping; using fallback version");
                fallback_version(timestamp)
            }
        },
        Err(e) => {
            warn!("{e}; using fallback version");
            fallback_version(timestamp)
        }
    }
}

pub struct VersionResolver<'a> {
    pub scm: &'a dyn SourceControl,
    pub version_map: PathBuf,
}

impl<'a> VersionResolver<'a> {
    pub fn new(scm: &'a dyn SourceControl, version_map: impl Into<PathBuf>) -> Self {
        Self {
            scm,
            version_map: version_map.into(),
        }
    }

    pub fn resolve(&self, cfg: &EffectiveConfig, now: DateTime<Utc>) -> Result<VersionInfo> {
        let timestamp = build_timestamp(&now);

        let checkout = match probe_checkout(self.scm) {
            Ok(state) => state,
            Err(reason) => {
                warn!("could not read source control state: {reason}");
                CheckoutState::default()
            }
        };
        debug!(
            "checkout commit='{}' ref='{}'",
            checkout.commit, checkout.ref_name
        );

        let (version, lts_build) = match cfg.build_type() {
            BuildType::Release => {
                let version = cfg.version().ok_or_else(|| {
                    Error::validation("release builds require a version (--version)")
                })?;
                (version.to_string(), true)
            }
            BuildType::Development => (
                development_version(
                    &checkout.ref_name,
                    || VersionMap::load(&self.version_map),
                    &timestamp,
                ),
                false,
            ),
        };

        Ok(VersionInfo {
            version,
            build_uuid: Uuid::new_v4().to_string(),
            build_timestamp: timestamp,
            build_date: build_date(&now),
            git_commit: checkout.commit,
            git_branch: checkout.ref_name,
            lts_build,
        })
    }
}
