//! Monthly usage quota.
//!
//! Every processed image counts against the caller's plan for the current
//! calendar month (UTC). The service asks the [`QuotaGate`] before doing any
//! decode or encode work; a rejection ends the request.
//!
//! # Plans
//!
//! | Plan | Images per month | Max upload |
//! |------|------------------|------------|
//! | free | 50 | 10 MiB |
//! | pro | 5 000 | 50 MiB |
//! | business | 50 000 | 100 MiB |
//!
//! Identities use the configured default plan unless an override assigns
//! them another one.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const MIB: u64 = 1024 * 1024;

/// Default number of (identity, period) counters kept in memory
pub const DEFAULT_USAGE_ENTRIES: usize = 100_000;

pub const FREE_MONTHLY_IMAGES: u64 = 50;
pub const FREE_MAX_FILE_SIZE: u64 = 10 * MIB;
pub const PRO_MONTHLY_IMAGES: u64 = 5_000;
pub const PRO_MAX_FILE_SIZE: u64 = 50 * MIB;
pub const BUSINESS_MONTHLY_IMAGES: u64 = 50_000;
pub const BUSINESS_MAX_FILE_SIZE: u64 = 100 * MIB;

// =============================================================================
// Plans
// =============================================================================

/// A subscription plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Pro,
    Business,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Pro => "pro",
            Plan::Business => "business",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "pro" => Ok(Plan::Pro),
            "business" => Ok(Plan::Business),
            other => Err(format!(
                "Unknown plan '{}' (expected free, pro or business)",
                other
            )),
        }
    }
}

/// What a plan allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    /// Images processed per calendar month
    pub monthly_images: u64,
    /// Largest accepted upload in bytes
    pub max_file_size: u64,
}

/// Limits for every plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanCatalog {
    pub free: PlanLimits,
    pub pro: PlanLimits,
    pub business: PlanLimits,
}

impl PlanCatalog {
    pub fn limits(&self, plan: Plan) -> PlanLimits {
        match plan {
            Plan::Free => self.free,
            Plan::Pro => self.pro,
            Plan::Business => self.business,
        }
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self {
            free: PlanLimits {
                monthly_images: FREE_MONTHLY_IMAGES,
                max_file_size: FREE_MAX_FILE_SIZE,
            },
            pro: PlanLimits {
                monthly_images: PRO_MONTHLY_IMAGES,
                max_file_size: PRO_MAX_FILE_SIZE,
            },
            business: PlanLimits {
                monthly_images: BUSINESS_MONTHLY_IMAGES,
                max_file_size: BUSINESS_MAX_FILE_SIZE,
            },
        }
    }
}

/// An `identity=plan` assignment from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOverride {
    pub identity: String,
    pub plan: Plan,
}

impl FromStr for PlanOverride {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (identity, plan) = s
            .rsplit_once('=')
            .ok_or_else(|| format!("Expected IDENTITY=PLAN, got '{}'", s))?;

        let identity = identity.trim();
        if identity.is_empty() {
            return Err(format!("Missing identity in '{}'", s));
        }

        Ok(Self {
            identity: identity.to_string(),
            plan: plan.parse()?,
        })
    }
}

// =============================================================================
// Period
// =============================================================================

/// Usage period containing `now`: the calendar month as `YYYY-MM`.
pub fn period_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// Usage period for the current instant.
pub fn current_period() -> String {
    period_key(Utc::now())
}

// =============================================================================
// Quota Gate
// =============================================================================

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    /// Images counted this period, including this one when allowed
    pub used: u64,
    pub limit: u64,
}

/// Per-identity usage counter with a hard monthly ceiling.
///
/// `check_and_consume` must be atomic: two concurrent calls at `limit - 1`
/// may not both be allowed.
#[async_trait]
pub trait QuotaGate: Send + Sync {
    /// The plan an identity is on.
    async fn plan_for(&self, identity: &str) -> Plan;

    /// Limits of a plan.
    fn limits(&self, plan: Plan) -> PlanLimits;

    /// Count one image against `period` if the plan still allows it.
    ///
    /// A rejection leaves the counter unchanged.
    async fn check_and_consume(&self, identity: &str, period: &str) -> QuotaDecision;

    /// Current usage without consuming anything.
    async fn usage(&self, identity: &str, period: &str) -> QuotaDecision;
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// Quota gate keeping counters in process memory.
///
/// Counters live in a bounded LRU map. When it is full, counters for past
/// periods are dropped first; a live counter is only evicted once every entry
/// belongs to the current period, and that identity then starts the month
/// from zero again. Suitable for a single instance; a shared deployment needs
/// a store behind the same trait.
pub struct InMemoryUsageStore {
    catalog: PlanCatalog,
    default_plan: Plan,
    overrides: HashMap<String, Plan>,
    counters: Mutex<LruCache<(String, String), u64>>,
}

impl InMemoryUsageStore {
    /// Create a store where everyone is on the free plan.
    pub fn new() -> Self {
        Self::with_catalog(PlanCatalog::default(), Plan::Free)
    }

    pub fn with_catalog(catalog: PlanCatalog, default_plan: Plan) -> Self {
        Self::with_capacity(catalog, default_plan, DEFAULT_USAGE_ENTRIES)
    }

    /// Create a store keeping at most `max_entries` counters.
    pub fn with_capacity(catalog: PlanCatalog, default_plan: Plan, max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            catalog,
            default_plan,
            overrides: HashMap::new(),
            counters: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Assign plans to specific identities.
    pub fn with_overrides(mut self, overrides: impl IntoIterator<Item = PlanOverride>) -> Self {
        for entry in overrides {
            self.overrides.insert(entry.identity, entry.plan);
        }
        self
    }

    fn plan_of(&self, identity: &str) -> Plan {
        self.overrides
            .get(identity)
            .copied()
            .unwrap_or(self.default_plan)
    }

    /// Number of counters currently held.
    pub async fn tracked(&self) -> usize {
        self.counters.lock().await.len()
    }
}

impl Default for InMemoryUsageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuotaGate for InMemoryUsageStore {
    async fn plan_for(&self, identity: &str) -> Plan {
        self.plan_of(identity)
    }

    fn limits(&self, plan: Plan) -> PlanLimits {
        self.catalog.limits(plan)
    }

    async fn check_and_consume(&self, identity: &str, period: &str) -> QuotaDecision {
        let limit = self.limits(self.plan_of(identity)).monthly_images;
        let key = (identity.to_string(), period.to_string());

        let mut counters = self.counters.lock().await;
        let used = counters.get(&key).copied().unwrap_or(0);
        if !counters.contains(&key) {
            make_room(&mut counters, period);
        }

        if used >= limit {
            debug!(identity, period, used, limit, "Quota exhausted");
            return QuotaDecision {
                allowed: false,
                used,
                limit,
            };
        }

        counters.put(key, used + 1);
        QuotaDecision {
            allowed: true,
            used: used + 1,
            limit,
        }
    }

    async fn usage(&self, identity: &str, period: &str) -> QuotaDecision {
        let limit = self.limits(self.plan_of(identity)).monthly_images;
        let key = (identity.to_string(), period.to_string());
        let used = self.counters.lock().await.peek(&key).copied().unwrap_or(0);

        QuotaDecision {
            allowed: used < limit,
            used,
            limit,
        }
    }
}

/// Free a slot for a new counter in `period`, preferring stale periods.
fn make_room(counters: &mut LruCache<(String, String), u64>, period: &str) {
    if counters.len() < counters.cap().get() {
        return;
    }

    let stale: Vec<(String, String)> = counters
        .iter()
        .filter(|((_, p), _)| p != period)
        .map(|(key, _)| key.clone())
        .collect();

    if stale.is_empty() {
        warn!(
            capacity = counters.cap().get(),
            "Usage table full, evicting the least recently used counter"
        );
        return;
    }

    for key in &stale {
        counters.pop(key);
    }
    debug!(dropped = stale.len(), "Dropped usage counters from past periods");
}
