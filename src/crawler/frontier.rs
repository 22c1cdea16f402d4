//! URL frontier: the dedup set and work queue of one crawl run
//!
//! Every URL a run ever sees has exactly one entry here, keyed by its
//! normalized URL key. Workers move entries through
//! `Pending -> InFlight -> Done | Failed` only via the methods below, each of
//! which runs under a single lock, so transitions are linearizable.

use crate::state::PageState;
use crate::url::{normalize_url, NormalizationRules};
use crate::{CrawlError, UrlResult};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use url::Url;

/// One URL tracked by the frontier
#[derive(Debug, Clone, PartialEq)]
pub struct FrontierEntry {
    /// Normalized URL key
    pub key: String,
    /// First-seen form of the URL, used for fetching
    pub url: Url,
    pub state: PageState,
    pub attempts: u32,
    pub discovered_at: DateTime<Utc>,
}

/// A URL handed to exactly one worker
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedUrl {
    pub key: String,
    pub url: Url,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    Url(ClaimedUrl),
    /// Nothing Pending right now
    Empty,
    /// The run's page budget has been spent
    BudgetExhausted,
}

/// Result of waiting for work
#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    Claimed(ClaimedUrl),
    Quiescent,
    BudgetExhausted,
    Cancelled,
}

/// Terminal outcome reported by a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Done,
    Failed,
}

impl From<PageOutcome> for PageState {
    fn from(outcome: PageOutcome) -> Self {
        match outcome {
            PageOutcome::Done => PageState::Done,
            PageOutcome::Failed => PageState::Failed,
        }
    }
}

/// Entry counts per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrontierSnapshot {
    pub pending: usize,
    pub in_flight: usize,
    pub done: usize,
    pub failed: usize,
}

impl FrontierSnapshot {
    pub fn total(&self) -> usize {
        self.pending + self.in_flight + self.done + self.failed
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, FrontierEntry>,
    /// Keys of Pending entries in discovery order
    pending: VecDeque<String>,
    in_flight: usize,
    claimed_total: u64,
}

impl Inner {
    fn is_quiescent(&self) -> bool {
        self.pending.is_empty() && self.in_flight == 0
    }
}

#[derive(Debug)]
pub struct Frontier {
    inner: Mutex<Inner>,
    notify: Notify,
    rules: NormalizationRules,
    claim_budget: Option<u64>,
}

impl Frontier {
    pub fn new(rules: NormalizationRules) -> Self {
        Self::with_budget(rules, None)
    }

    /// Creates a frontier that hands out at most `claim_budget` URLs
    pub fn with_budget(rules: NormalizationRules, claim_budget: Option<u64>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            rules,
            claim_budget,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a URL as Pending unless its key is already known
    ///
    /// Discovery is idempotent and never resets the state of a known entry.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The URL was new and is now Pending
    /// * `Ok(false)` - The key was already known (in any state)
    /// * `Err(UrlError)` - The URL could not be normalized
    pub fn discover(&self, raw: &str) -> UrlResult<bool> {
        let key = normalize_url(raw, &self.rules)?.to_string();
        let mut url = Url::parse(raw).map_err(|e| crate::UrlError::Parse(e.to_string()))?;
        url.set_fragment(None);

        let mut inner = self.lock();
        if inner.entries.contains_key(&key) {
            return Ok(false);
        }

        tracing::trace!("Discovered {}", key);
        inner.entries.insert(
            key.clone(),
            FrontierEntry {
                key: key.clone(),
                url,
                state: PageState::Pending,
                attempts: 0,
                discovered_at: Utc::now(),
            },
        );
        inner.pending.push_back(key);
        drop(inner);

        self.notify.notify_waiters();
        Ok(true)
    }

    /// Atomically moves one Pending entry to InFlight
    pub fn claim(&self) -> Result<Claim, CrawlError> {
        let mut inner = self.lock();

        if inner.pending.is_empty() {
            return Ok(Claim::Empty);
        }

        if let Some(budget) = self.claim_budget {
            if inner.claimed_total >= budget {
                return Ok(Claim::BudgetExhausted);
            }
        }

        let Some(key) = inner.pending.pop_front() else {
            return Ok(Claim::Empty);
        };

        let entry = inner
            .entries
            .get_mut(&key)
            .ok_or_else(|| CrawlError::Invariant(format!("queued key {} has no entry", key)))?;

        if entry.state != PageState::Pending {
            return Err(CrawlError::Invariant(format!(
                "queued entry {} is {}, expected pending",
                key, entry.state
            )));
        }

        entry.state = PageState::InFlight;
        let claimed = ClaimedUrl {
            key: entry.key.clone(),
            url: entry.url.clone(),
        };
        inner.in_flight += 1;
        inner.claimed_total += 1;

        Ok(Claim::Url(claimed))
    }

    /// Moves an InFlight entry to Done or Failed and records its attempts
    ///
    /// Completing an entry that is not InFlight is a coordination failure.
    pub fn complete(&self, key: &str, outcome: PageOutcome, attempts: u32) -> Result<(), CrawlError> {
        let mut inner = self.lock();

        let entry = inner
            .entries
            .get_mut(key)
            .ok_or_else(|| CrawlError::Invariant(format!("completed unknown key {}", key)))?;

        if entry.state != PageState::InFlight {
            return Err(CrawlError::Invariant(format!(
                "completed entry {} is {}, expected in_flight",
                key, entry.state
            )));
        }

        entry.state = outcome.into();
        entry.attempts = attempts;
        inner.in_flight -= 1;
        drop(inner);

        self.notify.notify_waiters();
        Ok(())
    }

    /// No Pending and no InFlight entries
    pub fn is_quiescent(&self) -> bool {
        self.lock().is_quiescent()
    }

    /// Claims the next URL, waiting while other workers may still discover work
    ///
    /// Wakes on every discover/complete, and re-checks at least every
    /// `idle_poll` in case a wakeup was coalesced.
    pub async fn next(
        &self,
        cancel: &CancellationToken,
        idle_poll: Duration,
    ) -> Result<Next, CrawlError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(Next::Cancelled);
            }

            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.claim()? {
                Claim::Url(claimed) => return Ok(Next::Claimed(claimed)),
                Claim::BudgetExhausted => return Ok(Next::BudgetExhausted),
                Claim::Empty => {
                    if self.is_quiescent() {
                        return Ok(Next::Quiescent);
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(Next::Cancelled),
                _ = &mut notified => {}
                _ = tokio::time::sleep(idle_poll) => {}
            }
        }
    }

    pub fn snapshot(&self) -> FrontierSnapshot {
        let inner = self.lock();
        let mut snapshot = FrontierSnapshot::default();
        for entry in inner.entries.values() {
            match entry.state {
                PageState::Pending => snapshot.pending += 1,
                PageState::InFlight => snapshot.in_flight += 1,
                PageState::Done => snapshot.done += 1,
                PageState::Failed => snapshot.failed += 1,
            }
        }
        snapshot
    }

    /// Looks up the entry a URL normalizes to
    pub fn entry(&self, raw: &str) -> Option<FrontierEntry> {
        let key = normalize_url(raw, &self.rules).ok()?.to_string();
        self.lock().entries.get(&key).cloned()
    }

    /// Whether the claim budget has been spent
    pub fn budget_exhausted(&self) -> bool {
        match self.claim_budget {
            Some(budget) => self.lock().claimed_total >= budget,
            None => false,
        }
    }
}
