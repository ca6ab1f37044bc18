//! Transaction Tracer
//!
//! Bounded breadth-first traversal of the upstream fund flow. Starting
//! from the analyzed transaction's source addresses at distance 1, each
//! layer resolves address metadata through both cache tiers, stops at
//! definitively tagged (or degraded) nodes, and walks the remaining nodes
//! one hop further through their latest incoming transaction.
//!
//! Determinism contract: within a layer, fetches run concurrently (bounded
//! by `fetch_parallelism`), but completed nodes are processed sorted by
//! address before anything is enqueued for the next layer. Two runs over
//! identical provider/cache state produce identical reports.
//!
//! Budgets (`max_addresses_visited`, `max_api_calls`, the wall-clock
//! deadline) end the traversal normally: the report is still produced and
//! cached, with a "traversal bounded by ..." note in the reasons.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{self, Cache};
use crate::chains;
use crate::config::Settings;
use crate::core::scorer;
use crate::models::errors::{AppError, AppResult};
use crate::models::types::{
    AddressMeta, FlaggedEntity, RiskReport, RiskTag, TraceNode, TxRecord, TAGS_BY_WEIGHT,
};
use crate::providers::BlockchainProvider;

/// Shortest transaction id the engine accepts
const MIN_TX_ID_LEN: usize = 10;

/// How many recent tx ids are scanned to find the latest incoming transfer
const RECENT_TX_SCAN: usize = 5;

/// Work item: an address to resolve at the next distance
#[derive(Debug, Clone)]
struct QueueEntry {
    address: String,
    contribution: f64,
    /// Transaction we arrived through; skipped when scanning upstream so
    /// the walk does not immediately bounce back
    via_tx: String,
}

/// Result of resolving one queue entry
struct NodeOutcome {
    address: String,
    contribution: f64,
    /// None when the metadata fetch failed (degraded node)
    meta: Option<AddressMeta>,
    /// Budget ran out before the fetch; the node was not analyzed at all
    skipped: bool,
    upstream: Vec<QueueEntry>,
    /// Budget ran out while walking upstream
    budget_hit: bool,
}

// ============================================
// TWO-TIER FETCHER
// ============================================

/// Per-analysis fetch layer: an in-process memoization map in front of the
/// shared persistent cache in front of the provider. Also owns the
/// analysis' API-call budget.
struct AnalysisFetcher {
    provider: Arc<dyn BlockchainProvider>,
    cache: Arc<dyn Cache>,
    ttl: Duration,
    memo_tx: DashMap<String, TxRecord>,
    memo_addr: DashMap<String, AddressMeta>,
    api_calls: AtomicU32,
    max_api_calls: u32,
}

impl AnalysisFetcher {
    fn new(
        provider: Arc<dyn BlockchainProvider>,
        cache: Arc<dyn Cache>,
        ttl: Duration,
        max_api_calls: u32,
    ) -> Self {
        Self {
            provider,
            cache,
            ttl,
            memo_tx: DashMap::new(),
            memo_addr: DashMap::new(),
            api_calls: AtomicU32::new(0),
            max_api_calls: max_api_calls.max(1),
        }
    }

    fn api_calls_used(&self) -> u32 {
        self.api_calls.load(Ordering::Relaxed)
    }

    /// Distinct transactions examined during the analysis
    fn transactions_traced(&self) -> u32 {
        self.memo_tx.len() as u32
    }

    fn budget_left(&self) -> bool {
        self.api_calls_used() < self.max_api_calls
    }

    /// Ok(None) means the API-call budget is exhausted
    async fn fetch_tx(&self, chain: &str, tx_id: &str) -> AppResult<Option<TxRecord>> {
        let key = cache::tx_key(chain, tx_id);
        if let Some(tx) = self.memo_tx.get(&key) {
            return Ok(Some(tx.clone()));
        }
        if let Some(bytes) = self.cache.get(&key).await {
            if let Ok(tx) = serde_json::from_slice::<TxRecord>(&bytes) {
                self.memo_tx.insert(key, tx.clone());
                return Ok(Some(tx));
            }
        }
        if !self.budget_left() {
            return Ok(None);
        }
        self.api_calls.fetch_add(1, Ordering::Relaxed);
        let tx = self.provider.get_transaction(chain, tx_id).await?;
        if let Ok(bytes) = serde_json::to_vec(&tx) {
            self.cache.put(&key, &bytes, self.ttl).await;
        }
        self.memo_tx.insert(key, tx.clone());
        Ok(Some(tx))
    }

    /// Ok(None) means the API-call budget is exhausted
    async fn fetch_meta(&self, chain: &str, address: &str) -> AppResult<Option<AddressMeta>> {
        let key = cache::addr_key(chain, address);
        if let Some(meta) = self.memo_addr.get(&key) {
            return Ok(Some(meta.clone()));
        }
        if let Some(bytes) = self.cache.get(&key).await {
            if let Ok(meta) = serde_json::from_slice::<AddressMeta>(&bytes) {
                self.memo_addr.insert(key, meta.clone());
                return Ok(Some(meta));
            }
        }
        if !self.budget_left() {
            return Ok(None);
        }
        self.api_calls.fetch_add(1, Ordering::Relaxed);
        let meta = self.provider.get_address_meta(chain, address).await?;
        if let Ok(bytes) = serde_json::to_vec(&meta) {
            self.cache.put(&key, &bytes, self.ttl).await;
        }
        self.memo_addr.insert(key, meta.clone());
        Ok(Some(meta))
    }
}

// ============================================
// TRACER
// ============================================

pub struct Tracer {
    provider: Arc<dyn BlockchainProvider>,
    cache: Arc<dyn Cache>,
    settings: Settings,
}

impl Tracer {
    pub fn new(
        provider: Arc<dyn BlockchainProvider>,
        cache: Arc<dyn Cache>,
        settings: Settings,
    ) -> Self {
        Self {
            provider,
            cache,
            settings,
        }
    }

    pub fn default_depth(&self) -> u32 {
        self.settings.trace.default_depth
    }

    /// Run one full analysis: cache lookup, root fetch, BFS, scoring,
    /// report cache write-back.
    pub async fn analyze(&self, chain: &str, tx_id: &str, depth: u32) -> AppResult<RiskReport> {
        let spec = chains::get_chain(chain)?;
        let tx_id = tx_id.trim();
        if tx_id.len() < MIN_TX_ID_LEN {
            return Err(AppError::invalid_input(format!(
                "Transaction id too short (minimum {} characters)",
                MIN_TX_ID_LEN
            )));
        }
        if depth < 1 || depth > self.settings.trace.max_depth {
            return Err(AppError::invalid_input(format!(
                "Depth must be between 1 and {}",
                self.settings.trace.max_depth
            )));
        }

        // report cache first
        let report_key = cache::report_key(spec.id, tx_id, depth);
        if let Some(bytes) = self.cache.get(&report_key).await {
            if let Ok(report) = serde_json::from_slice::<RiskReport>(&bytes) {
                info!("✅ report cache hit for {} on {}", tx_id, spec.id);
                return Ok(report);
            }
        }

        info!(
            "🔍 tracing {} on {} to depth {}",
            tx_id, spec.id, depth
        );
        let deadline = Instant::now() + self.settings.trace.deadline;
        let fetcher = Arc::new(AnalysisFetcher::new(
            self.provider.clone(),
            self.cache.clone(),
            self.settings.cache.ttl,
            self.settings.trace.max_api_calls,
        ));

        // root fetch: TxNotFound here aborts the whole analysis
        let root = fetcher
            .fetch_tx(spec.id, tx_id)
            .await?
            .ok_or_else(|| AppError::internal("API budget exhausted before root fetch"))?;

        let (visited, circular_paths, mut notes) =
            self.bfs(spec.id, &root, depth, &fetcher, deadline).await;

        let flagged = collect_flagged(&visited);
        let unavailable = visited.values().filter(|n| n.meta_unavailable).count();
        if unavailable > 0 {
            notes.push(format!(
                "metadata unavailable for {} address(es)",
                unavailable
            ));
        }

        let risk_score = scorer::score(
            &flagged,
            circular_paths,
            &notes,
            self.settings.score.contribution_k,
        );

        let report = RiskReport {
            tx_id: tx_id.to_string(),
            chain: spec.id.to_string(),
            depth,
            risk_score,
            flagged_entities: flagged,
            total_addresses_analyzed: visited.len() as u32,
            transactions_traced: fetcher.transactions_traced(),
            api_calls_used: fetcher.api_calls_used(),
            circular_paths,
            generated_at: Utc::now(),
        };

        // degraded reports are cached too; only error outcomes are not
        if let Ok(bytes) = serde_json::to_vec(&report) {
            self.cache
                .put(&report_key, &bytes, self.settings.cache.ttl)
                .await;
        }

        info!(
            "📊 {} on {}: score {} ({:?}), {} addresses, {} api calls",
            tx_id,
            spec.id,
            report.risk_score.score,
            report.risk_score.level,
            report.total_addresses_analyzed,
            report.api_calls_used
        );
        Ok(report)
    }

    /// Layer-by-layer traversal. Returns the visited set, the circular
    /// path count and the traversal notes.
    async fn bfs(
        &self,
        chain: &'static str,
        root: &TxRecord,
        depth: u32,
        fetcher: &Arc<AnalysisFetcher>,
        deadline: Instant,
    ) -> (HashMap<String, TraceNode>, u32, Vec<String>) {
        let mut visited: HashMap<String, TraceNode> = HashMap::new();
        let mut circular_paths = 0u32;
        let mut notes: Vec<String> = Vec::new();

        let root_via = root.tx_id.clone();
        let mut layer = merge_entries(
            root.source_addresses()
                .into_iter()
                .map(|(address, contribution)| QueueEntry {
                    address,
                    contribution,
                    via_tx: root_via.clone(),
                })
                .collect(),
        );

        let semaphore = Arc::new(Semaphore::new(
            self.settings.trace.fetch_parallelism.max(1),
        ));

        for d in 1..=depth {
            if layer.is_empty() {
                break;
            }

            // fold re-encounters into the existing nodes: distance never
            // decreases, contribution sums, nothing is re-expanded
            let mut to_fetch: Vec<QueueEntry> = Vec::new();
            for entry in std::mem::take(&mut layer) {
                if let Some(node) = visited.get_mut(&entry.address) {
                    node.contribution += entry.contribution;
                    circular_paths += 1;
                    debug!("🔁 circular path through {}", entry.address);
                } else {
                    to_fetch.push(entry);
                }
            }
            if to_fetch.is_empty() {
                continue;
            }

            // address budget
            let available = self
                .settings
                .trace
                .max_addresses_visited
                .saturating_sub(visited.len());
            let bounded_addresses = to_fetch.len() > available;
            if bounded_addresses {
                to_fetch.truncate(available);
            }

            let expand = d < depth;
            let mut tasks: JoinSet<NodeOutcome> = JoinSet::new();
            for entry in to_fetch {
                tasks.spawn(process_node(
                    fetcher.clone(),
                    semaphore.clone(),
                    chain,
                    entry,
                    expand,
                ));
            }

            // harvest the layer; abandon in-flight fetches at the deadline
            // (they may still populate the shared cache, but they cannot
            // touch this analysis)
            let mut outcomes: Vec<NodeOutcome> = Vec::new();
            let mut deadline_hit = false;
            loop {
                match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                    Ok(Some(Ok(outcome))) => outcomes.push(outcome),
                    Ok(Some(Err(e))) => warn!("⚠️ trace task failed: {}", e),
                    Ok(None) => break,
                    Err(_) => {
                        deadline_hit = true;
                        tasks.abort_all();
                        break;
                    }
                }
            }

            // deterministic expansion order
            outcomes.sort_by(|a, b| a.address.cmp(&b.address));

            let mut budget_hit = false;
            let mut next_layer: Vec<QueueEntry> = Vec::new();
            for outcome in outcomes {
                if outcome.skipped {
                    budget_hit = true;
                    continue;
                }
                let (tags, label, unavailable) = match outcome.meta {
                    Some(meta) => (meta.tags, meta.label, false),
                    None => (Vec::new(), None, true),
                };
                let terminal = unavailable || tags.iter().any(RiskTag::is_definitive);
                visited.insert(
                    outcome.address.clone(),
                    TraceNode {
                        address: outcome.address,
                        distance: d,
                        contribution: outcome.contribution,
                        tags,
                        label,
                        terminal,
                        meta_unavailable: unavailable,
                    },
                );
                budget_hit |= outcome.budget_hit;
                if !terminal {
                    next_layer.extend(outcome.upstream);
                }
            }

            if bounded_addresses {
                notes.push(format!(
                    "traversal bounded by max_addresses_visited ({})",
                    self.settings.trace.max_addresses_visited
                ));
                break;
            }
            if deadline_hit {
                notes.push(format!(
                    "traversal bounded by deadline ({}s)",
                    self.settings.trace.deadline.as_secs()
                ));
                break;
            }
            if budget_hit {
                notes.push(format!(
                    "traversal bounded by max_api_calls ({})",
                    self.settings.trace.max_api_calls
                ));
                break;
            }

            layer = merge_entries(next_layer);
        }

        (visited, circular_paths, notes)
    }
}

/// Resolve one address: metadata through both cache tiers, then (for
/// non-terminal nodes below the depth limit) the upstream expansion.
async fn process_node(
    fetcher: Arc<AnalysisFetcher>,
    semaphore: Arc<Semaphore>,
    chain: &'static str,
    entry: QueueEntry,
    expand: bool,
) -> NodeOutcome {
    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            return NodeOutcome {
                address: entry.address,
                contribution: entry.contribution,
                meta: None,
                skipped: true,
                upstream: Vec::new(),
                budget_hit: false,
            }
        }
    };

    let meta = match fetcher.fetch_meta(chain, &entry.address).await {
        Ok(Some(meta)) => meta,
        Ok(None) => {
            return NodeOutcome {
                address: entry.address,
                contribution: entry.contribution,
                meta: None,
                skipped: true,
                upstream: Vec::new(),
                budget_hit: true,
            }
        }
        Err(e) => {
            // non-root failures degrade the node instead of aborting
            warn!("⚠️ metadata unavailable for {}: {}", entry.address, e);
            return NodeOutcome {
                address: entry.address,
                contribution: entry.contribution,
                meta: None,
                skipped: false,
                upstream: Vec::new(),
                budget_hit: false,
            };
        }
    };

    let mut upstream = Vec::new();
    let mut budget_hit = false;
    if expand && !meta.has_definitive_tag() {
        (upstream, budget_hit) = expand_upstream(&fetcher, chain, &entry, &meta).await;
    }

    NodeOutcome {
        address: entry.address,
        contribution: entry.contribution,
        meta: Some(meta),
        skipped: false,
        upstream,
        budget_hit,
    }
}

/// Find the latest incoming transaction for the address and allocate the
/// node's contribution across that transaction's sources, proportional to
/// their input value shares.
async fn expand_upstream(
    fetcher: &AnalysisFetcher,
    chain: &'static str,
    entry: &QueueEntry,
    meta: &AddressMeta,
) -> (Vec<QueueEntry>, bool) {
    for tx_id in meta.recent_tx_ids.iter().take(RECENT_TX_SCAN) {
        // don't bounce straight back through the transaction we came from
        if tx_id.eq_ignore_ascii_case(&entry.via_tx) {
            continue;
        }
        let tx = match fetcher.fetch_tx(chain, tx_id).await {
            Ok(Some(tx)) => tx,
            Ok(None) => return (Vec::new(), true),
            Err(_) => continue, // pruned or transient: try the next candidate
        };
        if !tx.pays(&entry.address) {
            continue; // outgoing transaction, keep scanning
        }

        let sources = tx.source_addresses();
        let total: f64 = sources.iter().map(|(_, v)| v).sum();
        let entries = sources
            .into_iter()
            .map(|(address, value)| QueueEntry {
                address,
                contribution: if total > 0.0 {
                    entry.contribution * value / total
                } else {
                    0.0
                },
                via_tx: tx.tx_id.clone(),
            })
            .collect();
        return (entries, false);
    }
    (Vec::new(), false)
}

/// Merge duplicate addresses within one layer, summing contributions and
/// preserving first-appearance order
fn merge_entries(entries: Vec<QueueEntry>) -> Vec<QueueEntry> {
    let mut order: Vec<QueueEntry> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for entry in entries {
        match index.get(&entry.address) {
            Some(&i) => order[i].contribution += entry.contribution,
            None => {
                index.insert(entry.address.clone(), order.len());
                order.push(entry);
            }
        }
    }
    order
}

/// Flagged entities from the visited set, strongest signal first:
/// |W*D| desc, then weight desc, distance asc, contribution desc,
/// address asc. This ordering is part of the report contract.
fn collect_flagged(visited: &HashMap<String, TraceNode>) -> Vec<FlaggedEntity> {
    let mut flagged: Vec<FlaggedEntity> = visited
        .values()
        .filter(|n| !n.meta_unavailable)
        .filter_map(|n| {
            TAGS_BY_WEIGHT
                .iter()
                .find(|&&t| t.is_definitive() && n.tags.contains(&t))
                .map(|tag| FlaggedEntity {
                    address: n.address.clone(),
                    tag: *tag,
                    distance: n.distance,
                    contribution: n.contribution,
                    label: n.label.clone(),
                })
        })
        .collect();

    flagged.sort_by(|a, b| {
        use std::cmp::Ordering::Equal;
        let wd_a = (a.tag.weight() * scorer::distance_decay(a.distance)).abs();
        let wd_b = (b.tag.weight() * scorer::distance_decay(b.distance)).abs();
        wd_b.partial_cmp(&wd_a)
            .unwrap_or(Equal)
            .then(b.tag.weight().partial_cmp(&a.tag.weight()).unwrap_or(Equal))
            .then(a.distance.cmp(&b.distance))
            .then(b.contribution.partial_cmp(&a.contribution).unwrap_or(Equal))
            .then(a.address.cmp(&b.address))
    });
    flagged
}
