use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::constants::inflight::{
    CLAIM_EXTENSION, CLAIM_HASH_SEED, EXPIRED_INFIX, HEARTBEAT_DIVISOR,
};
use crate::errors::RollupError;
use crate::hash::hex_digest;
use crate::types::{OwnerId, PathString};

/// Persisted in-flight claim for one input file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightClaim {
    /// Claimed input path (checkpoint spelling).
    pub path: PathString,
    /// Orchestrator instance holding the claim.
    pub owner: OwnerId,
    /// Process id of the holder, for operators.
    pub pid: u32,
    /// When processing started.
    pub started_at: DateTime<Utc>,
    /// Last liveness refresh.
    pub heartbeat_at: DateTime<Utc>,
}

impl InFlightClaim {
    /// True when the last heartbeat is older than `ttl` at `now`.
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(self.heartbeat_at) > ttl
    }
}

/// Directory of claim documents marking files currently being processed.
///
/// Claims are created atomically (no-clobber rename), refreshed by heartbeats,
/// and removed when processing ends. A claim left behind by a crashed process
/// stops counting once its heartbeat is older than the TTL and can then be
/// taken over.
#[derive(Clone, Debug)]
pub struct InFlightRegistry {
    dir: PathBuf,
    ttl: Duration,
    owner: OwnerId,
}

/// Live claim held by this process.
///
/// Dropping an unreleased handle removes the claim best-effort.
#[derive(Debug)]
pub struct ClaimHandle {
    dir: PathBuf,
    file: PathBuf,
    claim: InFlightClaim,
    heartbeat_every: Duration,
    last_beat: Instant,
    released: bool,
}

impl InFlightRegistry {
    /// Registry rooted at `dir`, expiring claims after `ttl`, claiming as `owner`.
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration, owner: impl Into<OwnerId>) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            owner: owner.into(),
        }
    }

    /// Registry directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every readable claim document, live or expired.
    pub fn claims(&self) -> Result<Vec<InFlightClaim>, RollupError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(RollupError::directory(self.dir.to_string_lossy(), err)),
        };
        let mut claims = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| RollupError::directory(self.dir.to_string_lossy(), err))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(CLAIM_EXTENSION) {
                continue;
            }
            match read_claim(&path) {
                Ok(Some(claim)) => claims.push(claim),
                Ok(None) => {}
                Err(err) => {
                    warn!(claim = %path.display(), error = %err, "skipping unreadable claim");
                }
            }
        }
        claims.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(claims)
    }

    /// Paths with a live (non-expired) claim.
    pub fn active(&self) -> Result<HashSet<PathString>, RollupError> {
        let now = Utc::now();
        let mut active = HashSet::new();
        for claim in self.claims()? {
            if claim.is_expired(self.ttl, now) {
                warn!(
                    file = %claim.path,
                    owner = %claim.owner,
                    heartbeat_at = %claim.heartbeat_at,
                    "ignoring expired in-flight claim"
                );
                continue;
            }
            active.insert(claim.path);
        }
        Ok(active)
    }

    /// Claim `path` for this owner.
    ///
    /// Returns `Ok(None)` when another owner holds a live claim. Expired or
    /// unreadable claims are moved aside and replaced.
    pub fn claim(&self, path: &str) -> Result<Option<ClaimHandle>, RollupError> {
        fs::create_dir_all(&self.dir)
            .map_err(|err| RollupError::directory(self.dir.to_string_lossy(), err))?;
        let file = self.claim_file(path);

        for _ in 0..3 {
            let now = Utc::now();
            let claim = InFlightClaim {
                path: path.to_string(),
                owner: self.owner.clone(),
                pid: std::process::id(),
                started_at: now,
                heartbeat_at: now,
            };
            match write_claim(&self.dir, &file, &claim, false) {
                Ok(()) => {
                    debug!(file = %path, owner = %self.owner, "claimed");
                    return Ok(Some(ClaimHandle {
                        dir: self.dir.clone(),
                        file,
                        claim,
                        heartbeat_every: self.ttl / HEARTBEAT_DIVISOR,
                        last_beat: Instant::now(),
                        released: false,
                    }));
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(self.claim_err(path, err)),
            }

            let observed = match read_claim(&file) {
                Ok(None) => continue,
                Ok(Some(existing)) if !existing.is_expired(self.ttl, now) => {
                    debug!(file = %path, holder = %existing.owner, "live claim held elsewhere");
                    return Ok(None);
                }
                Ok(Some(existing)) => {
                    warn!(
                        file = %path,
                        holder = %existing.owner,
                        heartbeat_at = %existing.heartbeat_at,
                        "taking over expired claim"
                    );
                    Some(existing)
                }
                Err(err) => {
                    warn!(file = %path, error = %err, "replacing unreadable claim");
                    None
                }
            };
            if !self.retire(&file, observed.as_ref())? {
                return Ok(None);
            }
        }
        Ok(None)
    }

    /// Move a stale claim aside. Returns `false` if a fresh claim was found in its
    /// place (it is restored and the caller must back off).
    fn retire(
        &self,
        file: &Path,
        observed: Option<&InFlightClaim>,
    ) -> Result<bool, RollupError> {
        let aside = file.with_extension(format!(
            "{EXPIRED_INFIX}-{}",
            hex_digest(CLAIM_HASH_SEED, &self.owner)
        ));
        match fs::rename(file, &aside) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(err) => return Err(RollupError::InFlight(err.to_string())),
        }
        let moved = read_claim(&aside).ok().flatten();
        if observed.is_some() && moved.as_ref() != observed {
            // Someone replaced the stale claim between our read and rename.
            self.restore(&aside, file);
            return Ok(false);
        }
        if let Err(err) = fs::remove_file(&aside) {
            warn!(claim = %aside.display(), error = %err, "failed to remove retired claim");
        }
        Ok(true)
    }

    /// Put a live claim moved aside by mistake back in place.
    ///
    /// The aside copy is kept if it cannot be restored: a third owner may
    /// already have claimed `file`, and the copy is then only a stray document.
    fn restore(&self, aside: &Path, file: &Path) {
        if file.exists() {
            warn!(
                claim = %file.display(),
                aside = %aside.display(),
                "claim recreated before a live claim could be restored"
            );
            return;
        }
        if let Err(err) = fs::rename(aside, file) {
            warn!(
                claim = %file.display(),
                aside = %aside.display(),
                error = %err,
                "failed to restore live claim"
            );
        }
    }

    fn claim_file(&self, path: &str) -> PathBuf {
        self.dir.join(format!(
            "{}.{CLAIM_EXTENSION}",
            hex_digest(CLAIM_HASH_SEED, path)
        ))
    }

    fn claim_err(&self, path: &str, err: io::Error) -> RollupError {
        RollupError::InFlight(format!("cannot claim '{path}': {err}"))
    }
}

impl ClaimHandle {
    /// The persisted claim.
    pub fn claim(&self) -> &InFlightClaim {
        &self.claim
    }

    /// Refresh the heartbeat if at least a quarter TTL has passed since the last one.
    pub fn heartbeat(&mut self) -> Result<(), RollupError> {
        if self.last_beat.elapsed() < self.heartbeat_every {
            return Ok(());
        }
        self.beat_now()
    }

    /// Refresh the heartbeat unconditionally.
    ///
    /// Fails if the claim was taken over by another owner.
    pub fn beat_now(&mut self) -> Result<(), RollupError> {
        match read_claim(&self.file) {
            Ok(Some(current)) if current.owner == self.claim.owner => {}
            Ok(Some(current)) => {
                return Err(RollupError::InFlight(format!(
                    "claim on '{}' taken over by {}",
                    self.claim.path, current.owner
                )));
            }
            Ok(None) => {
                return Err(RollupError::InFlight(format!(
                    "claim on '{}' disappeared",
                    self.claim.path
                )));
            }
            Err(err) => return Err(RollupError::InFlight(err.to_string())),
        }
        self.claim.heartbeat_at = Utc::now();
        write_claim(&self.dir, &self.file, &self.claim, true)
            .map_err(|err| RollupError::InFlight(err.to_string()))?;
        self.last_beat = Instant::now();
        Ok(())
    }

    /// Remove the claim.
    pub fn release(mut self) -> Result<(), RollupError> {
        self.released = true;
        self.remove_if_owned()
    }

    fn remove_if_owned(&self) -> Result<(), RollupError> {
        match read_claim(&self.file) {
            Ok(Some(current)) if current.owner != self.claim.owner => return Ok(()),
            Ok(None) => return Ok(()),
            _ => {}
        }
        match fs::remove_file(&self.file) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(RollupError::InFlight(err.to_string())),
        }
    }
}

impl Drop for ClaimHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.remove_if_owned() {
            warn!(file = %self.claim.path, error = %err, "failed to release claim");
        }
    }
}

fn read_claim(path: &Path) -> io::Result<Option<InFlightClaim>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

fn write_claim(dir: &Path, target: &Path, claim: &InFlightClaim, clobber: bool) -> io::Result<()> {
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(temp.as_file_mut(), claim)?;
    temp.as_file_mut().write_all(b"\n")?;
    temp.as_file().sync_all()?;
    if clobber {
        temp.persist(target).map_err(|err| err.error)?;
    } else {
        temp.persist_noclobber(target).map_err(|err| err.error)?;
    }
    Ok(())
}
