//! The engine: incremental sync passes, ranked queries and knowledge base
//! management behind one access-checked surface.
//!
//! A sync pass holds the base's async mutex from start to finish. It lists
//! the source, computes the delta, converts pending items on a bounded set of
//! tasks, then commits records, documents, chunks, state and cursor in one
//! transaction before publishing the new index generation. Queries never take
//! the mutex; they read whichever generation is published.

use crate::converters::{Capability, ConverterRegistry};
use crate::error::IngestResult;
use crate::knowledge_base::KnowledgeBaseRegistry;
use crate::normalizer::Normalizer;
use crate::source::SourceProvider;
use crate::store::ContentStore;
use crate::sync::{compute_delta, RetryPolicy};
use chrono::Utc;
use lore_config::Config;
use lore_core::{
    AccessMode, ChunkPriority, ConversionFailure, ConversionStatus, Document, Error, Fingerprint,
    KbId, KnowledgeBase, KnowledgeBaseState, Result, SourceItem, SourceRef, SyncCursor, SyncRecord,
};
use lore_db::{Database, DbError, KnowledgeBaseStats, SyncCommit};
use lore_index::{scorer_from_config, ChunkConfig, Chunker, GenerationBuilder, Index};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A conversion that failed during a pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub origin_id: String,
    pub failure: ConversionFailure,
}

/// What a sync pass did.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub kb_id: KbId,
    pub kb_name: String,
    /// Cursor version after the pass; unchanged when it was cancelled.
    pub version: Option<u64>,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub retried: usize,
    /// Items whose marker changed but whose bytes did not.
    pub touched: usize,
    pub failed: Vec<ItemFailure>,
    /// Origins converted with `partial` status.
    pub partial: Vec<String>,
    pub cancelled: bool,
    pub duration: Duration,
}

impl SyncReport {
    /// Items that went through conversion in this pass.
    pub fn converted(&self) -> usize {
        self.added + self.updated + self.retried
    }
}

/// A ranked chunk with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub kb_id: KbId,
    pub kb_name: String,
    pub origin_id: String,
    pub chunk_index: u32,
    pub start: usize,
    pub end: usize,
    pub priority: ChunkPriority,
    pub text: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub passages: Vec<Passage>,
    /// The query deadline passed before every chunk was scored.
    pub partial: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Added,
    Updated,
    Retry,
}

enum Outcome {
    /// Same bytes under a new marker: only the record's proxy moves.
    Touched(SyncRecord),
    Converted {
        change: Change,
        item: SourceItem,
        doc: Document,
    },
}

/// Ingestion and retrieval engine over one database.
pub struct Engine {
    db: Database,
    registry: KnowledgeBaseRegistry,
    store: ContentStore,
    normalizer: Arc<Normalizer>,
    index: Arc<Index>,
    retry: RetryPolicy,
    max_concurrent: usize,
    retain_history: bool,
    query_timeout: Duration,
    default_top_k: usize,
    locks: Mutex<HashMap<KbId, Arc<tokio::sync::Mutex<()>>>>,
    running: Mutex<HashMap<KbId, CancellationToken>>,
}

impl Engine {
    /// Open the engine with the default converter backends.
    pub fn new(db: Database, config: &Config) -> Result<Self> {
        let converters = ConverterRegistry::from_config(&config.convert);
        Self::with_converters(db, config, converters)
    }

    /// Open the engine with an explicit converter registry.
    ///
    /// Bases left in `syncing` by an interrupted process are recovered and
    /// every base's index generation is rebuilt from persisted chunks.
    pub fn with_converters(
        db: Database,
        config: &Config,
        converters: ConverterRegistry,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;
        let chunker = Chunker::new(ChunkConfig::from_config(&config.chunking)?);
        let scorer = scorer_from_config(&config.retrieval)?;

        let engine = Self {
            registry: KnowledgeBaseRegistry::new(db.clone()),
            store: ContentStore::new(db.clone()),
            normalizer: Arc::new(Normalizer::new(Arc::new(converters), &config.convert)),
            index: Arc::new(Index::new(chunker, scorer)),
            retry: RetryPolicy::from_config(&config.sync),
            max_concurrent: config.sync.max_concurrent_conversions.max(1),
            retain_history: config.store.retain_history,
            query_timeout: Duration::from_millis(config.retrieval.query_timeout_ms),
            default_top_k: config.retrieval.top_k,
            locks: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            db,
        };
        engine.recover()?;
        Ok(engine)
    }

    fn recover(&self) -> Result<()> {
        for kb in self.registry.list()? {
            if kb.state == KnowledgeBaseState::Syncing {
                let discarded = self.store.discard_staged(&kb.id)?;
                let state = if self.db.load_sync_records(&kb.id)?.is_empty() {
                    KnowledgeBaseState::Empty
                } else {
                    KnowledgeBaseState::Ready
                };
                warn!(
                    "Recovered '{}' from an interrupted sync ({} staged documents discarded)",
                    kb.name, discarded
                );
                self.db.set_knowledge_base_state(&kb.id, state)?;
            }

            let chunks = self.db.chunks_for_kb(&kb.id)?;
            let count = chunks.len();
            self.index.load(&kb.id, chunks);
            debug!("Loaded {} chunks for '{}'", count, kb.name);
        }
        Ok(())
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// Capabilities with a registered backend.
    pub fn capabilities(&self) -> Vec<Capability> {
        self.normalizer.registry().enabled()
    }

    // --- Sync ---

    /// Run one sync pass of `kb` against `source`.
    ///
    /// Item-level conversion failures are reported, not raised. A source that
    /// cannot be listed or fetched aborts the pass: staged writes are dropped
    /// and the base returns to its prior state. Cancelling `cancel` stops the
    /// pass between items; completed items are still committed.
    pub async fn sync(
        &self,
        principal: &str,
        kb: &str,
        source: Arc<dyn SourceProvider>,
        cancel: CancellationToken,
    ) -> Result<SyncReport> {
        let found = self.registry.resolve(kb)?;
        if !found.policy.can_sync(principal) {
            return Err(Error::unauthorized(principal, "sync", &found.name));
        }

        let lock = self.kb_lock(&found.id);
        let _guard = lock.lock().await;

        // Deleted or changed while waiting for the lock
        let kb = self.registry.resolve(&found.id)?;
        let prior = self.registry.transition(&kb.id, KnowledgeBaseState::Syncing)?;

        let token = cancel.child_token();
        self.running_map().insert(kb.id.clone(), token.clone());

        let started = Instant::now();
        let result = self.run_pass(&kb, source, &token).await;
        self.running_map().remove(&kb.id);

        match result {
            Ok(mut report) => {
                report.duration = started.elapsed();
                info!(
                    "Synced '{}': {} added, {} updated, {} removed, {} unchanged, {} failed{}",
                    kb.name,
                    report.added,
                    report.updated,
                    report.removed,
                    report.unchanged,
                    report.failed.len(),
                    if report.cancelled { " (cancelled)" } else { "" }
                );
                Ok(report)
            }
            Err(e) => {
                warn!("Sync of '{}' aborted: {}", kb.name, e);
                if let Err(cleanup) = self.abort_pass(&kb.id, prior) {
                    warn!("Cleanup after aborted sync of '{}' failed: {}", kb.name, cleanup);
                }
                Err(e)
            }
        }
    }

    async fn run_pass(
        &self,
        kb: &KnowledgeBase,
        source: Arc<dyn SourceProvider>,
        token: &CancellationToken,
    ) -> Result<SyncReport> {
        let listing = source.list().await?;
        let records = self.db.load_sync_records(&kb.id)?;
        let delta = compute_delta(&records, listing, &self.retry, Utc::now());
        debug!(
            "Delta for '{}' from {}: {} added, {} updated, {} removed, {} retry, {} unchanged",
            kb.name,
            source.describe(),
            delta.added.len(),
            delta.updated.len(),
            delta.removed.len(),
            delta.retry.len(),
            delta.unchanged.len()
        );

        let mut report = SyncReport {
            kb_id: kb.id.clone(),
            kb_name: kb.name.clone(),
            unchanged: delta.unchanged.len(),
            ..Default::default()
        };
        let mut commit = SyncCommit::new(&kb.id, KnowledgeBaseState::Ready);
        let mut builder = self.index.begin(&kb.id);

        for origin in &delta.removed {
            if let Some(record) = records.get(origin) {
                commit.deleted.push(record.fingerprint.clone());
            }
            commit.removed.push(origin.clone());
            builder.remove_origin(origin);
        }
        report.removed = delta.removed.len();

        let pending: Vec<(Change, SourceItem)> = delta
            .added
            .into_iter()
            .map(|item| (Change::Added, item))
            .chain(delta.updated.into_iter().map(|item| (Change::Updated, item)))
            .chain(delta.retry.into_iter().map(|item| (Change::Retry, item)))
            .collect();

        let (outcomes, cancelled) = self.convert_pending(&kb.id, pending, &records, source, token).await?;
        report.cancelled = cancelled;

        let mut new_origins = 0;
        for outcome in outcomes {
            match outcome {
                Outcome::Touched(record) => {
                    report.touched += 1;
                    commit.records.push(record);
                }
                Outcome::Converted { change, item, doc } => {
                    match change {
                        Change::Added => report.added += 1,
                        Change::Updated => report.updated += 1,
                        Change::Retry => report.retried += 1,
                    }

                    let previous = records.get(&item.origin_id);
                    if previous.is_none() {
                        new_origins += 1;
                    }
                    let record = self.stage(&mut commit, &mut builder, &item, &doc, previous)?;
                    commit.records.push(record);

                    match (&doc.status, &doc.failure) {
                        (ConversionStatus::Failed, Some(failure)) => report.failed.push(ItemFailure {
                            origin_id: item.origin_id.clone(),
                            failure: failure.clone(),
                        }),
                        (ConversionStatus::Partial, _) => report.partial.push(item.origin_id.clone()),
                        _ => {}
                    }
                }
            }
        }

        let remaining = records.len() - delta.removed.len() + new_origins;
        commit.state = if remaining > 0 {
            KnowledgeBaseState::Ready
        } else {
            KnowledgeBaseState::Empty
        };
        if !cancelled {
            let cursor = SyncCursor::advance(kb.cursor.as_ref());
            report.version = Some(cursor.version);
            commit.cursor = Some(cursor);
        } else {
            report.version = kb.cursor.map(|c| c.version);
        }

        self.db.commit_sync(&commit).map_err(|e| match e {
            DbError::Conflict(_) => {
                Error::NotFound(format!("Knowledge base was deleted during sync: {}", kb.name))
            }
            other => other.into(),
        })?;
        let generation = self.index.publish(builder);
        debug!("Published generation {} for '{}'", generation, kb.name);

        if !self.retain_history {
            match self.store.purge_superseded(&kb.id) {
                Ok(0) => {}
                Ok(purged) => debug!("Purged {} superseded documents of '{}'", purged, kb.name),
                Err(e) => warn!("Could not purge superseded documents of '{}': {}", kb.name, e),
            }
        }

        Ok(report)
    }

    /// Fetch and convert pending items on at most `max_concurrent` tasks.
    ///
    /// Outcomes come back in listing order. The token is checked before each
    /// item is started; items already running finish.
    async fn convert_pending(
        &self,
        kb_id: &str,
        pending: Vec<(Change, SourceItem)>,
        records: &HashMap<String, SyncRecord>,
        source: Arc<dyn SourceProvider>,
        token: &CancellationToken,
    ) -> Result<(Vec<Outcome>, bool)> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks: JoinSet<(usize, IngestResult<Outcome>)> = JoinSet::new();
        let mut cancelled = false;

        for (i, (change, item)) in pending.into_iter().enumerate() {
            if token.is_cancelled() {
                cancelled = true;
                break;
            }
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => {
                    permit.map_err(|e| Error::Other(e.to_string()))?
                }
            };

            let previous = records.get(&item.origin_id).cloned();
            let source = source.clone();
            let normalizer = self.normalizer.clone();
            let kb_id = kb_id.to_string();
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = process_item(source, normalizer, kb_id, change, item, previous).await;
                (i, outcome)
            });
        }

        let mut slots: Vec<Option<Outcome>> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (i, outcome) = joined.map_err(|e| Error::Other(format!("conversion task failed: {}", e)))?;
            // A source failure aborts the pass; dropping the set aborts the rest
            let outcome = outcome?;
            if slots.len() <= i {
                slots.resize_with(i + 1, || None);
            }
            slots[i] = Some(outcome);
        }

        if cancelled {
            info!("Sync of {} cancelled after {} items", kb_id, slots.iter().flatten().count());
        }
        Ok((slots.into_iter().flatten().collect(), cancelled))
    }

    /// Write a converted document and queue its lifecycle and chunk changes.
    fn stage(
        &self,
        commit: &mut SyncCommit,
        builder: &mut GenerationBuilder,
        item: &SourceItem,
        doc: &Document,
        previous: Option<&SyncRecord>,
    ) -> Result<SyncRecord> {
        self.store.put(doc)?;

        let mut record = SyncRecord::new(
            &item.origin_id,
            item.proxy(),
            doc.fingerprint.clone(),
            doc.status,
        );
        if let Some(previous) = previous {
            if previous.fingerprint == doc.fingerprint {
                if previous.status == ConversionStatus::Failed {
                    record.attempts = previous.attempts.saturating_add(1);
                }
            } else {
                commit.retired.push(previous.fingerprint.clone());
            }
        }

        commit.promoted.push(doc.fingerprint.clone());
        let chunks = builder.add(doc);
        commit.chunks.push((doc.fingerprint.clone(), chunks));
        Ok(record)
    }

    fn abort_pass(&self, kb_id: &str, prior: KnowledgeBaseState) -> Result<()> {
        let discarded = self.store.discard_staged(kb_id)?;
        if discarded > 0 {
            debug!("Discarded {} staged documents of {}", discarded, kb_id);
        }
        self.registry.restore(kb_id, prior)
    }

    /// Cancel the running pass of a base. Returns whether one was running.
    pub fn cancel_sync(&self, kb_id: &str) -> bool {
        match self.running_map().get(kb_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    // --- Query ---

    /// Rank passages from the given bases, or from every readable base when
    /// `kbs` is empty.
    ///
    /// Naming a base the principal cannot read is an error; bases are never
    /// silently dropped from an explicit list.
    pub async fn query(
        &self,
        principal: &str,
        kbs: &[String],
        question: &str,
        top_k: Option<usize>,
    ) -> Result<QueryResult> {
        let bases = self.readable_bases(principal, kbs)?;
        if bases.is_empty() {
            return Ok(QueryResult::default());
        }

        let names: HashMap<KbId, String> = bases
            .iter()
            .map(|kb| (kb.id.clone(), kb.name.clone()))
            .collect();
        let kb_ids: Vec<KbId> = bases.into_iter().map(|kb| kb.id).collect();
        let top_k = top_k.unwrap_or(self.default_top_k);
        let deadline = Instant::now() + self.query_timeout;
        let index = self.index.clone();
        let question = question.to_string();

        let outcome = tokio::task::spawn_blocking(move || {
            index.query(&kb_ids, &question, top_k, Some(deadline))
        })
        .await
        .map_err(|e| Error::Other(format!("query task failed: {}", e)))?;

        if outcome.partial {
            warn!(
                "Query deadline of {}ms reached, returning partial results",
                self.query_timeout.as_millis()
            );
        }

        let passages = outcome
            .hits
            .into_iter()
            .map(|hit| Passage {
                kb_name: names.get(&hit.chunk.kb_id).cloned().unwrap_or_default(),
                kb_id: hit.chunk.kb_id,
                origin_id: hit.chunk.origin_id,
                chunk_index: hit.chunk.chunk_index,
                start: hit.chunk.start,
                end: hit.chunk.end,
                priority: hit.chunk.priority,
                text: hit.chunk.text,
                score: hit.score,
            })
            .collect();

        Ok(QueryResult {
            passages,
            partial: outcome.partial,
        })
    }

    fn readable_bases(&self, principal: &str, kbs: &[String]) -> Result<Vec<KnowledgeBase>> {
        if kbs.is_empty() {
            return Ok(self
                .registry
                .list()?
                .into_iter()
                .filter(|kb| kb.policy.can_read(principal))
                .collect());
        }

        let mut seen = HashSet::new();
        let mut bases = Vec::new();
        for name in kbs {
            let kb = self.readable(principal, name)?;
            if seen.insert(kb.id.clone()) {
                bases.push(kb);
            }
        }
        Ok(bases)
    }

    // --- Management ---

    pub fn create_kb(&self, principal: &str, name: &str) -> Result<KnowledgeBase> {
        self.registry.create(name, principal)
    }

    /// Bases the principal can read.
    pub fn list_kbs(&self, principal: &str) -> Result<Vec<KnowledgeBase>> {
        self.readable_bases(principal, &[])
    }

    pub fn kb(&self, principal: &str, name: &str) -> Result<KnowledgeBase> {
        self.readable(principal, name)
    }

    pub fn stats(&self, principal: &str, name: &str) -> Result<KnowledgeBaseStats> {
        let kb = self.readable(principal, name)?;
        Ok(self.db.kb_stats(&kb.id)?)
    }

    /// Current documents whose conversion failed.
    pub fn failed_documents(&self, principal: &str, name: &str) -> Result<Vec<Document>> {
        let kb = self.readable(principal, name)?;
        Ok(self.db.list_documents_by_status(&kb.id, ConversionStatus::Failed)?)
    }

    pub fn documents(&self, principal: &str, name: &str) -> Result<Vec<(SourceRef, Fingerprint)>> {
        let kb = self.readable(principal, name)?;
        self.store.list(&kb.id)
    }

    pub fn grant(&self, principal: &str, name: &str, grantee: &str, mode: AccessMode) -> Result<()> {
        let kb = self.owned(principal, name, "grant access to")?;
        self.registry.grant(&kb.id, grantee, mode)?;
        info!("Granted {} on '{}' to {}", mode, kb.name, grantee);
        Ok(())
    }

    pub fn revoke(&self, principal: &str, name: &str, grantee: &str) -> Result<bool> {
        let kb = self.owned(principal, name, "revoke access to")?;
        let revoked = self.registry.revoke(&kb.id, grantee)?;
        if revoked {
            info!("Revoked access to '{}' from {}", kb.name, grantee);
        }
        Ok(revoked)
    }

    pub fn set_public(&self, principal: &str, name: &str, public: bool) -> Result<()> {
        let kb = self.owned(principal, name, "change visibility of")?;
        self.registry.set_public(&kb.id, public)
    }

    /// Delete a base with its documents, chunks and records.
    ///
    /// A running pass is cancelled; its commit then fails and its staged
    /// writes are discarded.
    pub async fn delete_kb(&self, principal: &str, name: &str) -> Result<()> {
        let kb = self.owned(principal, name, "delete")?;
        self.registry.transition(&kb.id, KnowledgeBaseState::Deleted)?;
        if self.cancel_sync(&kb.id) {
            info!("Cancelled running sync of '{}'", kb.name);
        }

        let lock = self.kb_lock(&kb.id);
        let _guard = lock.lock().await;
        self.registry.purge(&kb.id)?;
        self.index.drop_base(&kb.id);
        self.locks_map().remove(&kb.id);
        info!("Deleted knowledge base '{}'", kb.name);
        Ok(())
    }

    fn readable(&self, principal: &str, name: &str) -> Result<KnowledgeBase> {
        let kb = self.registry.resolve(name)?;
        if !kb.policy.can_read(principal) {
            return Err(Error::unauthorized(principal, "read", &kb.name));
        }
        Ok(kb)
    }

    fn owned(&self, principal: &str, name: &str, action: &str) -> Result<KnowledgeBase> {
        let kb = self.registry.resolve(name)?;
        if !kb.policy.is_owner(principal) {
            return Err(Error::unauthorized(principal, action, &kb.name));
        }
        Ok(kb)
    }

    fn kb_lock(&self, kb_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks_map().entry(kb_id.to_string()).or_default().clone()
    }

    fn locks_map(&self) -> std::sync::MutexGuard<'_, HashMap<KbId, Arc<tokio::sync::Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn running_map(&self) -> std::sync::MutexGuard<'_, HashMap<KbId, CancellationToken>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn process_item(
    source: Arc<dyn SourceProvider>,
    normalizer: Arc<Normalizer>,
    kb_id: KbId,
    change: Change,
    item: SourceItem,
    previous: Option<SyncRecord>,
) -> IngestResult<Outcome> {
    let bytes = source.fetch(&item.origin_id).await?;
    let fingerprint = Fingerprint::compute(&kb_id, &item.origin_id, &bytes);

    if let Some(previous) = previous {
        if previous.fingerprint == fingerprint && change != Change::Retry {
            debug!("{} touched without content change", item.origin_id);
            return Ok(Outcome::Touched(SyncRecord {
                proxy: item.proxy(),
                ..previous
            }));
        }
    }

    let source_ref = SourceRef::new(kb_id, item.origin_id.clone());
    let doc = normalizer
        .normalize(fingerprint, &source_ref, &item.signature, &bytes)
        .await;
    Ok(Outcome::Converted { change, item, doc })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converters::{Converted, Converter, TextConverter};
    use crate::error::ConvertError;
    use crate::source::{FolderSource, MemorySource};
    use async_trait::async_trait;
    use lore_core::{FailureKind, TypeSignature};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Handles `.pdf` by echoing the bytes; fails on bytes containing "corrupt".
    struct Recording {
        calls: Arc<AtomicUsize>,
        hook: Option<Box<dyn Fn() + Send + Sync>>,
    }

    #[async_trait]
    impl Converter for Recording {
        fn capability(&self) -> Capability {
            Capability::Pdf
        }

        async fn convert(
            &self,
            bytes: &[u8],
            _signature: &TypeSignature,
        ) -> std::result::Result<Converted, ConvertError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(hook) = &self.hook {
                hook();
            }
            let text = String::from_utf8_lossy(bytes).to_string();
            if text.contains("corrupt") {
                return Err(ConvertError::failed("bad xref table"));
            }
            Ok(Converted::new(text))
        }
    }

    /// A source with a fixed listing, for markers that change without content.
    struct Fixed {
        items: Vec<(SourceItem, Vec<u8>)>,
    }

    #[async_trait]
    impl SourceProvider for Fixed {
        fn describe(&self) -> String {
            "fixed".to_string()
        }

        async fn list(&self) -> IngestResult<Vec<SourceItem>> {
            Ok(self.items.iter().map(|(item, _)| item.clone()).collect())
        }

        async fn fetch(&self, origin_id: &str) -> IngestResult<Vec<u8>> {
            self.items
                .iter()
                .find(|(item, _)| item.origin_id == origin_id)
                .map(|(_, bytes)| bytes.clone())
                .ok_or_else(|| crate::error::IngestError::unavailable(origin_id, "missing"))
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.sync.max_concurrent_conversions = 1;
        config
    }

    fn engine_on(
        db: Database,
        config: &Config,
        hook: Option<Box<dyn Fn() + Send + Sync>>,
    ) -> (Engine, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut converters = ConverterRegistry::empty();
        converters.register(Arc::new(TextConverter));
        converters.register(Arc::new(Recording {
            calls: calls.clone(),
            hook,
        }));
        (Engine::with_converters(db, config, converters).unwrap(), calls)
    }

    fn engine() -> (Engine, Arc<AtomicUsize>) {
        engine_on(Database::open_in_memory().unwrap(), &test_config(), None)
    }

    fn handbook() -> MemorySource {
        let source = MemorySource::new();
        source.put(
            "it/vpn.md",
            "# VPN\n\nConnect to the corporate VPN with the client from the portal.",
        );
        source.put("office/lunch.md", "# Lunch\n\nThe canteen opens at noon on weekdays.");
        source.put("reports/2023.pdf", "Revenue grew while costs stayed flat.");
        source
    }

    async fn sync(engine: &Engine, principal: &str, source: &MemorySource) -> Result<SyncReport> {
        engine
            .sync(principal, "handbook", Arc::new(source.clone()), CancellationToken::new())
            .await
    }

    async fn origins(engine: &Engine, principal: &str, question: &str) -> Vec<String> {
        engine
            .query(principal, &[], question, None)
            .await
            .unwrap()
            .passages
            .into_iter()
            .map(|p| p.origin_id)
            .collect()
    }

    #[tokio::test]
    async fn test_sync_then_query() {
        let (engine, calls) = engine();
        engine.create_kb("alice", "handbook").unwrap();
        let source = handbook();

        let report = sync(&engine, "alice", &source).await.unwrap();
        assert_eq!(report.added, 3);
        assert!(report.failed.is_empty());
        assert!(!report.cancelled);
        assert_eq!(report.version, Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let kb = engine.kb("alice", "handbook").unwrap();
        assert_eq!(kb.state, KnowledgeBaseState::Ready);
        assert_eq!(kb.cursor.map(|c| c.version), Some(1));

        let result = engine
            .query("alice", &["handbook".to_string()], "how do I connect to the VPN?", None)
            .await
            .unwrap();
        assert!(!result.partial);
        let top = &result.passages[0];
        assert_eq!(top.origin_id, "it/vpn.md");
        assert_eq!(top.kb_name, "handbook");
        assert!(top.score > 0.0);
        assert!(top.text.contains("corporate VPN"));
    }

    #[tokio::test]
    async fn test_resync_is_idempotent() {
        let (engine, calls) = engine();
        engine.create_kb("alice", "handbook").unwrap();
        let source = handbook();
        sync(&engine, "alice", &source).await.unwrap();
        let before = engine.query("alice", &[], "canteen noon", None).await.unwrap();
        let stats_before = engine.stats("alice", "handbook").unwrap();

        let report = sync(&engine, "alice", &source).await.unwrap();
        assert_eq!(report.converted(), 0);
        assert_eq!(report.unchanged, 3);
        assert_eq!(report.version, Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let after = engine.query("alice", &[], "canteen noon", None).await.unwrap();
        assert_eq!(before.passages, after.passages);
        assert_eq!(engine.stats("alice", "handbook").unwrap(), stats_before);
    }

    #[tokio::test]
    async fn test_updates_and_removals() {
        let (engine, _) = engine();
        engine.create_kb("alice", "handbook").unwrap();
        let source = handbook();
        sync(&engine, "alice", &source).await.unwrap();

        source.put("it/vpn.md", "# VPN\n\nThe VPN was replaced by zero trust access.");
        source.remove("office/lunch.md");
        let report = sync(&engine, "alice", &source).await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(report.unchanged, 1);

        assert!(origins(&engine, "alice", "canteen").await.is_empty());
        assert!(origins(&engine, "alice", "corporate portal").await.is_empty());
        assert_eq!(origins(&engine, "alice", "zero trust").await, vec!["it/vpn.md"]);

        let stats = engine.stats("alice", "handbook").unwrap();
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.superseded, 0);
        assert_eq!(engine.documents("alice", "handbook").unwrap().len(), 2);

        source.remove("it/vpn.md");
        source.remove("reports/2023.pdf");
        sync(&engine, "alice", &source).await.unwrap();
        let kb = engine.kb("alice", "handbook").unwrap();
        assert_eq!(kb.state, KnowledgeBaseState::Empty);
        assert_eq!(engine.stats("alice", "handbook").unwrap().chunks, 0);
    }

    #[tokio::test]
    async fn test_retain_history_keeps_superseded() {
        let mut config = test_config();
        config.store.retain_history = true;
        let (engine, _) = engine_on(Database::open_in_memory().unwrap(), &config, None);
        engine.create_kb("alice", "handbook").unwrap();
        let source = handbook();
        sync(&engine, "alice", &source).await.unwrap();

        source.put("it/vpn.md", "# VPN\n\nNew instructions.");
        sync(&engine, "alice", &source).await.unwrap();
        let stats = engine.stats("alice", "handbook").unwrap();
        assert_eq!(stats.documents, 3);
        assert_eq!(stats.superseded, 1);
        assert!(origins(&engine, "alice", "corporate portal").await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_conversion_is_isolated() {
        let (engine, calls) = engine();
        engine.create_kb("alice", "handbook").unwrap();
        let source = handbook();
        source.put("scans/contract.pdf", "corrupt stream");

        let report = sync(&engine, "alice", &source).await.unwrap();
        assert_eq!(report.added, 4);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].origin_id, "scans/contract.pdf");
        assert_eq!(report.failed[0].failure.kind, FailureKind::Conversion);
        assert_eq!(origins(&engine, "alice", "VPN").await, vec!["it/vpn.md"]);
        assert!(origins(&engine, "alice", "corrupt stream").await.is_empty());

        let failed = engine.failed_documents("alice", "handbook").unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].failure.as_ref().unwrap().reason, "bad xref table");

        // Not due again for an hour
        let report = sync(&engine, "alice", &source).await.unwrap();
        assert_eq!(report.retried, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_items_are_retried_when_due() {
        let mut config = test_config();
        config.sync.retry_failed_after_seconds = 0;
        config.sync.max_retry_attempts = 2;
        let db = Database::open_in_memory().unwrap();
        let (engine, calls) = engine_on(db.clone(), &config, None);
        let kb = engine.create_kb("alice", "handbook").unwrap();
        let source = MemorySource::new();
        source.put("scan.pdf", "corrupt");

        sync(&engine, "alice", &source).await.unwrap();
        let report = sync(&engine, "alice", &source).await.unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(db.load_sync_records(&kb.id).unwrap()["scan.pdf"].attempts, 2);

        let report = sync(&engine, "alice", &source).await.unwrap();
        assert_eq!(report.retried, 0);
        assert_eq!(report.unchanged, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// Handles `.pdf`, failing the first call.
    struct FlakyOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Converter for FlakyOnce {
        fn capability(&self) -> Capability {
            Capability::Pdf
        }

        async fn convert(
            &self,
            bytes: &[u8],
            _signature: &TypeSignature,
        ) -> std::result::Result<Converted, ConvertError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(ConvertError::failed("backend restarting"));
            }
            Ok(Converted::new(String::from_utf8_lossy(bytes).to_string()))
        }
    }

    #[tokio::test]
    async fn test_successful_retry_replaces_failure_on_commit() {
        let mut config = test_config();
        config.sync.retry_failed_after_seconds = 0;
        let db = Database::open_in_memory().unwrap();
        let mut converters = ConverterRegistry::empty();
        converters.register(Arc::new(FlakyOnce {
            calls: AtomicUsize::new(0),
        }));
        let engine = Engine::with_converters(db.clone(), &config, converters).unwrap();
        let kb = engine.create_kb("alice", "handbook").unwrap();
        let source = MemorySource::new();
        source.put("scan.pdf", "quarterly invoice totals");

        let report = sync(&engine, "alice", &source).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(engine.failed_documents("alice", "handbook").unwrap().len(), 1);

        let report = sync(&engine, "alice", &source).await.unwrap();
        assert_eq!(report.retried, 1);
        assert!(report.failed.is_empty());
        assert!(engine.failed_documents("alice", "handbook").unwrap().is_empty());
        assert_eq!(db.pending_retries(&kb.id).unwrap(), 0);
        assert_eq!(origins(&engine, "alice", "invoice totals").await, vec!["scan.pdf"]);
    }

    #[tokio::test]
    async fn test_touch_without_change_skips_conversion() {
        let db = Database::open_in_memory().unwrap();
        let (engine, calls) = engine_on(db.clone(), &test_config(), None);
        let kb = engine.create_kb("alice", "handbook").unwrap();
        let bytes = b"Quarterly numbers".to_vec();

        let first = Fixed {
            items: vec![(SourceItem::at_unix("q1.pdf", 17, 100), bytes.clone())],
        };
        let touched = Fixed {
            items: vec![(SourceItem::at_unix("q1.pdf", 17, 200), bytes)],
        };

        engine
            .sync("alice", "handbook", Arc::new(first), CancellationToken::new())
            .await
            .unwrap();
        let report = engine
            .sync("alice", "handbook", Arc::new(touched), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.touched, 1);
        assert_eq!(report.converted(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let record = &db.load_sync_records(&kb.id).unwrap()["q1.pdf"];
        assert_eq!(record.proxy, SourceItem::at_unix("q1.pdf", 17, 200).proxy());
        assert_eq!(origins(&engine, "alice", "quarterly").await, vec!["q1.pdf"]);
    }

    #[tokio::test]
    async fn test_authorization() {
        let (engine, _) = engine();
        engine.create_kb("alice", "handbook").unwrap();
        let source = handbook();

        assert!(matches!(
            sync(&engine, "bob", &source).await,
            Err(Error::Unauthorized { .. })
        ));
        sync(&engine, "alice", &source).await.unwrap();

        let explicit = ["handbook".to_string()];
        assert!(matches!(
            engine.query("bob", &explicit, "VPN", None).await,
            Err(Error::Unauthorized { .. })
        ));
        assert!(origins(&engine, "bob", "VPN").await.is_empty());
        assert!(engine.list_kbs("bob").unwrap().is_empty());
        assert!(matches!(
            engine.grant("bob", "handbook", "bob", AccessMode::Sync),
            Err(Error::Unauthorized { .. })
        ));

        engine.grant("alice", "handbook", "bob", AccessMode::Read).unwrap();
        assert_eq!(origins(&engine, "bob", "VPN").await, vec!["it/vpn.md"]);
        assert!(matches!(
            sync(&engine, "bob", &source).await,
            Err(Error::Unauthorized { .. })
        ));

        engine.grant("alice", "handbook", "bob", AccessMode::Sync).unwrap();
        sync(&engine, "bob", &source).await.unwrap();

        assert!(origins(&engine, "carol", "VPN").await.is_empty());
        engine.set_public("alice", "handbook", true).unwrap();
        assert_eq!(origins(&engine, "carol", "VPN").await, vec!["it/vpn.md"]);

        assert!(engine.revoke("alice", "handbook", "bob").unwrap());
        engine.set_public("alice", "handbook", false).unwrap();
        assert!(origins(&engine, "bob", "VPN").await.is_empty());
    }

    #[tokio::test]
    async fn test_queries_only_see_selected_bases() {
        let (engine, _) = engine();
        engine.create_kb("alice", "handbook").unwrap();
        engine.create_kb("alice", "archive").unwrap();
        sync(&engine, "alice", &handbook()).await.unwrap();

        let archive = MemorySource::new();
        archive.put("old/vpn.md", "# VPN\n\nThe legacy VPN concentrator was retired.");
        engine
            .sync("alice", "archive", Arc::new(archive), CancellationToken::new())
            .await
            .unwrap();

        let only_archive = engine
            .query("alice", &["archive".to_string()], "VPN", None)
            .await
            .unwrap();
        assert!(only_archive.passages.iter().all(|p| p.kb_name == "archive"));
        assert_eq!(origins(&engine, "alice", "VPN").await.len(), 2);
    }

    #[tokio::test]
    async fn test_top_k_is_a_hard_cap() {
        let (engine, _) = engine();
        engine.create_kb("alice", "handbook").unwrap();
        let source = MemorySource::new();
        for i in 0..12 {
            source.put(&format!("policy-{:02}.md", i), format!("Travel policy number {}.", i));
        }
        sync(&engine, "alice", &source).await.unwrap();

        let limited = engine.query("alice", &[], "travel policy", Some(3)).await.unwrap();
        assert_eq!(limited.passages.len(), 3);
        let default = engine.query("alice", &[], "travel policy", None).await.unwrap();
        assert_eq!(default.passages.len(), 5);
        let none = engine.query("alice", &[], "travel policy", Some(0)).await.unwrap();
        assert!(none.passages.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_commits_completed_items() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let db = Database::open_in_memory().unwrap();
        let (engine, calls) = engine_on(
            db.clone(),
            &test_config(),
            Some(Box::new(move || trigger.cancel())),
        );
        let kb = engine.create_kb("alice", "handbook").unwrap();
        let source = MemorySource::new();
        source.put("a.pdf", "alpha report");
        source.put("b.pdf", "beta report");
        source.put("c.pdf", "gamma report");

        let report = engine
            .sync("alice", "handbook", Arc::new(source.clone()), token)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.added, 1);
        assert_eq!(report.version, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let kb = engine.kb("alice", &kb.id).unwrap();
        assert_eq!(kb.state, KnowledgeBaseState::Ready);
        assert!(kb.cursor.is_none());
        assert_eq!(db.load_sync_records(&kb.id).unwrap().len(), 1);
        assert_eq!(origins(&engine, "alice", "alpha").await, vec!["a.pdf"]);

        let report = sync(&engine, "alice", &source).await.unwrap();
        assert!(!report.cancelled);
        assert_eq!(report.added, 2);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.version, Some(1));
    }

    #[tokio::test]
    async fn test_source_failure_aborts_pass() {
        let (engine, _) = engine();
        engine.create_kb("alice", "handbook").unwrap();
        let missing = FolderSource::new("/nonexistent/lore-handbook", &[]).unwrap();

        let err = engine
            .sync("alice", "handbook", Arc::new(missing), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable { .. }));
        assert_eq!(
            engine.kb("alice", "handbook").unwrap().state,
            KnowledgeBaseState::Empty
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_discards_staged_writes() {
        let db = Database::open_in_memory().unwrap();
        let (engine, _) = engine_on(db.clone(), &test_config(), None);
        let kb = engine.create_kb("alice", "handbook").unwrap();
        sync(&engine, "alice", &handbook()).await.unwrap();

        // Listed but not fetchable
        let mut broken = Fixed {
            items: vec![(SourceItem::at_unix("new.md", 3, 1), b"new".to_vec())],
        };
        broken.items.push((SourceItem::at_unix("gone.md", 1, 1), Vec::new()));
        let broken = Arc::new(BrokenFetch(broken));
        let err = engine
            .sync("alice", "handbook", broken, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable { .. }));

        let kb = engine.kb("alice", &kb.id).unwrap();
        assert_eq!(kb.state, KnowledgeBaseState::Ready);
        assert_eq!(db.discard_staged(&kb.id).unwrap(), 0);
        assert_eq!(db.load_sync_records(&kb.id).unwrap().len(), 3);
        assert_eq!(origins(&engine, "alice", "VPN").await, vec!["it/vpn.md"]);
    }

    /// Fails to fetch `gone.md`.
    struct BrokenFetch(Fixed);

    #[async_trait]
    impl SourceProvider for BrokenFetch {
        fn describe(&self) -> String {
            self.0.describe()
        }

        async fn list(&self) -> IngestResult<Vec<SourceItem>> {
            self.0.list().await
        }

        async fn fetch(&self, origin_id: &str) -> IngestResult<Vec<u8>> {
            if origin_id == "gone.md" {
                return Err(crate::error::IngestError::unavailable(origin_id, "vanished"));
            }
            self.0.fetch(origin_id).await
        }
    }

    #[tokio::test]
    async fn test_delete_kb() {
        let (engine, _) = engine();
        let kb = engine.create_kb("alice", "handbook").unwrap();
        sync(&engine, "alice", &handbook()).await.unwrap();

        assert!(matches!(
            engine.delete_kb("bob", "handbook").await,
            Err(Error::Unauthorized { .. })
        ));
        engine.delete_kb("alice", "handbook").await.unwrap();

        assert!(matches!(
            engine.query("alice", &["handbook".to_string()], "VPN", None).await,
            Err(Error::NotFound(_))
        ));
        assert!(engine.index().generation(&kb.id).is_none());
        assert!(engine.list_kbs("alice").unwrap().is_empty());
        assert!(engine.create_kb("alice", "handbook").is_ok());
    }

    #[tokio::test]
    async fn test_deleted_during_sync_discards_writes() {
        let db = Database::open_in_memory().unwrap();
        let kb = KnowledgeBase::new("handbook", "alice");
        db.create_knowledge_base(&kb).unwrap();

        let hook_db = db.clone();
        let kb_id = kb.id.clone();
        let (engine, _) = engine_on(
            db.clone(),
            &test_config(),
            Some(Box::new(move || {
                let _ = hook_db.set_knowledge_base_state(&kb_id, KnowledgeBaseState::Deleted);
            })),
        );
        let source = MemorySource::new();
        source.put("a.pdf", "alpha");

        let err = sync(&engine, "alice", &source).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(db.discard_staged(&kb.id).unwrap(), 0);
        assert!(db.load_sync_records(&kb.id).unwrap().is_empty());
        let indexed = engine.index().generation(&kb.id).map(|g| g.chunk_count());
        assert_eq!(indexed.unwrap_or(0), 0);
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_index_and_recovers() {
        let db = Database::open_in_memory().unwrap();
        let (engine, _) = engine_on(db.clone(), &test_config(), None);
        let kb = engine.create_kb("alice", "handbook").unwrap();
        let stuck = engine.create_kb("alice", "stuck").unwrap();
        sync(&engine, "alice", &handbook()).await.unwrap();
        drop(engine);

        db.set_knowledge_base_state(&stuck.id, KnowledgeBaseState::Syncing).unwrap();
        let staged = Document::new(
            Fingerprint::compute(&stuck.id, "x.md", b"x"),
            &SourceRef::new(&stuck.id, "x.md"),
            "x",
        );
        db.put_document(&staged).unwrap();

        let (reopened, _) = engine_on(db.clone(), &test_config(), None);
        assert_eq!(origins(&reopened, "alice", "canteen").await, vec!["office/lunch.md"]);
        assert!(reopened.index().generation(&kb.id).is_some());
        assert_eq!(
            reopened.kb("alice", "stuck").unwrap().state,
            KnowledgeBaseState::Empty
        );
        assert_eq!(db.discard_staged(&stuck.id).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mixed_archive_goes_through_signature_table() {
        let dir = tempfile::TempDir::new().unwrap();
        let bundle = crate::archive::tests::zip_bytes(&[
            ("policies/", ""),
            ("policies/travel.md", "# Travel\n\nBook flights through the travel desk."),
            ("policies/budget.csv", "item,cost\nhotel,120\n"),
            ("tools/setup.exe", "MZ"),
        ]);
        std::fs::write(dir.path().join("bundle.zip"), &bundle).unwrap();
        std::fs::write(dir.path().join("readme.md"), "# Readme\n\nSee the bundle.").unwrap();

        let config = test_config();
        let engine = Engine::with_converters(
            Database::open_in_memory().unwrap(),
            &config,
            ConverterRegistry::from_config(&config.convert),
        )
        .unwrap();
        engine.create_kb("alice", "handbook").unwrap();
        let source = FolderSource::new(dir.path(), &[])
            .unwrap()
            .with_archives(crate::archive::ArchiveLimits::from_config(&config.sync));

        let report = engine
            .sync("alice", "handbook", Arc::new(source), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.added, 4);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].origin_id, "bundle.zip!/tools/setup.exe");
        assert_eq!(report.failed[0].failure.kind, FailureKind::Unsupported);

        assert_eq!(
            origins(&engine, "alice", "travel desk flights").await[0],
            "bundle.zip!/policies/travel.md"
        );
        assert!(origins(&engine, "alice", "hotel cost")
            .await
            .contains(&"bundle.zip!/policies/budget.csv".to_string()));
    }
}
