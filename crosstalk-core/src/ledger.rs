//! Token cost accounting
//!
//! Prices are never stored on messages. A [`Ledger`] wraps an immutable
//! [`PriceTable`] and turns `(provider, model, usage)` into dollars whenever
//! a cost view is requested, so swapping the table re-prices a whole
//! conversation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::Result;
use crate::model::Provider;
use crate::token::TokenUsage;

const PER_MILLION: f64 = 1_000_000.0;

/// Matches the date stamp vendors append to pinned snapshots,
/// e.g. `-20241022` or `-2024-08-06`, and the `-latest` alias suffix.
static SNAPSHOT_SUFFIX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"-(\d{8}|\d{4}-\d{2}-\d{2}|latest)$").ok());

/// USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
}

impl ModelPricing {
    pub const fn new(input: f64, output: f64) -> Self {
        Self { input, output }
    }

    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.input as f64 * self.input + usage.output as f64 * self.output) / PER_MILLION
    }
}

/// Per-million-token prices keyed by provider, then model id
///
/// The JSON form is the same nesting, which makes it easy to ship updated
/// prices as configuration:
///
/// ```
/// use crosstalk_core::{PriceTable, Provider};
///
/// let table = PriceTable::from_json(r#"{
///     "openai": { "gpt-4o": { "input": 2.5, "output": 10.0 } }
/// }"#).unwrap();
/// assert!(table.lookup(Provider::OpenAI, "gpt-4o-2024-08-06").is_some());
/// assert!(table.lookup(Provider::Google, "gemini-2.5-pro").is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceTable {
    prices: HashMap<Provider, HashMap<String, ModelPricing>>,
}

const BUILTIN_PRICES: &[(Provider, &str, f64, f64)] = &[
    (Provider::Anthropic, "claude-opus-4-1", 15.0, 75.0),
    (Provider::Anthropic, "claude-opus-4", 15.0, 75.0),
    (Provider::Anthropic, "claude-sonnet-4-5", 3.0, 15.0),
    (Provider::Anthropic, "claude-sonnet-4", 3.0, 15.0),
    (Provider::Anthropic, "claude-haiku-4-5", 1.0, 5.0),
    (Provider::Anthropic, "claude-3-7-sonnet", 3.0, 15.0),
    (Provider::Anthropic, "claude-3-5-sonnet", 3.0, 15.0),
    (Provider::Anthropic, "claude-3-5-haiku", 0.8, 4.0),
    (Provider::Anthropic, "claude-3-haiku", 0.25, 1.25),
    (Provider::Anthropic, "claude-3-opus", 15.0, 75.0),
    (Provider::OpenAI, "gpt-5", 1.25, 10.0),
    (Provider::OpenAI, "gpt-5-mini", 0.25, 2.0),
    (Provider::OpenAI, "gpt-5-nano", 0.05, 0.4),
    (Provider::OpenAI, "gpt-4.1", 2.0, 8.0),
    (Provider::OpenAI, "gpt-4.1-mini", 0.4, 1.6),
    (Provider::OpenAI, "gpt-4.1-nano", 0.1, 0.4),
    (Provider::OpenAI, "gpt-4o", 2.5, 10.0),
    (Provider::OpenAI, "gpt-4o-mini", 0.15, 0.6),
    (Provider::OpenAI, "o1", 15.0, 60.0),
    (Provider::OpenAI, "o3", 2.0, 8.0),
    (Provider::OpenAI, "o3-mini", 1.1, 4.4),
    (Provider::OpenAI, "o4-mini", 1.1, 4.4),
    (Provider::Google, "gemini-2.5-pro", 1.25, 10.0),
    (Provider::Google, "gemini-2.5-flash", 0.3, 2.5),
    (Provider::Google, "gemini-2.5-flash-lite", 0.1, 0.4),
    (Provider::Google, "gemini-2.0-flash", 0.1, 0.4),
    (Provider::Google, "gemini-2.0-flash-lite", 0.075, 0.3),
    (Provider::Google, "gemini-1.5-pro", 1.25, 5.0),
    (Provider::Google, "gemini-1.5-flash", 0.075, 0.3),
];

impl PriceTable {
    /// An empty table; every lookup misses and every cost is zero
    pub fn empty() -> Self {
        Self::default()
    }

    /// Published list prices for the models this crate knows about
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        for &(provider, model, input, output) in BUILTIN_PRICES {
            table.insert(provider, model, ModelPricing::new(input, output));
        }
        table
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let table: Self = serde_json::from_str(json)?;
        debug!(
            models = table.prices.values().map(HashMap::len).sum::<usize>(),
            "Loaded price table"
        );
        Ok(table)
    }

    pub fn insert(&mut self, provider: Provider, model: impl Into<String>, pricing: ModelPricing) {
        self.prices
            .entry(provider)
            .or_default()
            .insert(model.into(), pricing);
    }

    #[must_use]
    pub fn with_price(mut self, provider: Provider, model: impl Into<String>, pricing: ModelPricing) -> Self {
        self.insert(provider, model, pricing);
        self
    }

    /// Finds the pricing for a model, falling back from a dated snapshot id
    /// to its undated alias
    pub fn lookup(&self, provider: Provider, model: &str) -> Option<&ModelPricing> {
        let models = self.prices.get(&provider)?;
        if let Some(pricing) = models.get(model) {
            return Some(pricing);
        }
        let alias = Option::as_ref(&SNAPSHOT_SUFFIX)?.replace(model, "");
        models.get(&*alias)
    }
}

/// Prices token usage against a shared [`PriceTable`]
///
/// Cloning a ledger is cheap; clones share the same table.
///
/// # Examples
///
/// ```
/// use crosstalk_core::{Ledger, Provider, TokenUsage};
///
/// let ledger = Ledger::default();
/// let cost = ledger.cost(Provider::Anthropic, "claude-3-5-haiku-20241022", &TokenUsage::new(0, 1000));
/// assert!((cost - 0.004).abs() < 1e-12);
///
/// // Unknown models are free rather than an error
/// assert_eq!(ledger.cost(Provider::OpenAI, "my-finetune", &TokenUsage::new(10, 10)), 0.0);
/// ```
#[derive(Debug, Clone)]
pub struct Ledger {
    table: Arc<PriceTable>,
}

impl Ledger {
    pub fn new(table: PriceTable) -> Self {
        Self {
            table: Arc::new(table),
        }
    }

    pub fn from_shared(table: Arc<PriceTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &PriceTable {
        &self.table
    }

    /// Returns the USD cost of `usage`, or 0 when the model is not priced
    pub fn cost(&self, provider: Provider, model: &str, usage: &TokenUsage) -> f64 {
        match self.table.lookup(provider, model) {
            Some(pricing) => pricing.cost(usage),
            None => {
                trace!(%provider, model, "No pricing for model, counting as free");
                0.0
            }
        }
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(PriceTable::builtin())
    }
}

/// Tokens and dollars accumulated for one grouping key
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UsageSummary {
    pub tokens: TokenUsage,
    pub cost: f64,
}

impl UsageSummary {
    fn add(&mut self, tokens: TokenUsage, cost: f64) {
        self.tokens += tokens;
        self.cost += cost;
    }
}

/// Running totals over many exchanges, grouped by provider and by model
///
/// Recording is commutative and `merge` is associative, so totals can be
/// built per conversation and combined in any order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageTotals {
    pub total: UsageSummary,
    pub by_provider: BTreeMap<Provider, UsageSummary>,
    pub by_model: BTreeMap<String, UsageSummary>,
}

impl UsageTotals {
    pub fn record(&mut self, provider: Provider, model: &str, tokens: TokenUsage, cost: f64) {
        self.total.add(tokens, cost);
        self.by_provider.entry(provider).or_default().add(tokens, cost);
        self.by_model
            .entry(model.to_string())
            .or_default()
            .add(tokens, cost);
    }

    pub fn merge(&mut self, other: &UsageTotals) {
        self.total.add(other.total.tokens, other.total.cost);
        for (provider, summary) in &other.by_provider {
            self.by_provider
                .entry(*provider)
                .or_default()
                .add(summary.tokens, summary.cost);
        }
        for (model, summary) in &other.by_model {
            self.by_model
                .entry(model.clone())
                .or_default()
                .add(summary.tokens, summary.cost);
        }
    }
}
