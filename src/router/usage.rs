//! Process-wide synthetic cost and usage totals. Nothing is persisted.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::llm::Usage;
use crate::registry::ProviderConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderUsage {
    pub requests: u64,
    pub tokens: u64,
    pub assets: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub total_cost: f64,
    pub requests: u64,
    pub tokens: u64,
    pub by_provider: BTreeMap<String, ProviderUsage>,
}

/// Shared accumulator; clones see the same totals.
#[derive(Debug, Clone, Default)]
pub struct UsageAccumulator {
    totals: Arc<Mutex<UsageTotals>>,
}

impl UsageAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one successful call. Returns the cost it contributed.
    pub fn record(&self, provider: &ProviderConfig, usage: &Usage) -> f64 {
        let cost = provider.cost_for(usage);
        let mut totals = self.totals.lock();
        totals.total_cost += cost;
        totals.requests += 1;
        totals.tokens += usage.total_tokens;

        let entry = totals.by_provider.entry(provider.id.clone()).or_default();
        entry.requests += 1;
        entry.tokens += usage.total_tokens;
        entry.assets += u64::from(usage.assets);
        entry.cost += cost;
        cost
    }

    #[must_use]
    pub fn total_cost(&self) -> f64 {
        self.totals.lock().total_cost
    }

    #[must_use]
    pub fn snapshot(&self) -> UsageTotals {
        self.totals.lock().clone()
    }
}
