//! Graph builder: turns tagged relations and token batches into graph mutations.
//!
//! Each call runs as one store transaction. Retryable store failures are
//! retried with exponential backoff before surfacing as `StoreUnavailable`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use url::Url;

use super::edge::{self, Edge};
use super::identity::{self, Node, NodeKey, Resolution, TokenNormalizer};
use super::query;
use super::relation::RelationKind;
use super::tokens::{self, TaggedToken};
use crate::cache::NodeCache;
use crate::config::{Config, IngestMode, ScopePolicy};
use crate::db::{lifecycle, Db, DEFAULT_TIMEOUT};
use crate::error::{DepgraphError, Result};

/// Address of a store opened through [`GraphBuilder::connect`].
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// `file:///path/to/location` or `sqlite:///path/to/location`
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Builder behaviour
#[derive(Debug, Clone)]
pub struct BuilderOptions {
    pub scope: ScopePolicy,
    pub mode: IngestMode,
    pub normalizer: TokenNormalizer,
    /// 0 disables the node cache
    pub cache_capacity: usize,
    pub timeout: Duration,
    pub max_retries: usize,
    pub retry_backoff: Duration,
    /// Close the store on Ctrl-C / SIGTERM, then exit the process
    pub close_on_signal: bool,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            scope: ScopePolicy::default(),
            mode: IngestMode::default(),
            normalizer: TokenNormalizer::default(),
            cache_capacity: 1024,
            timeout: DEFAULT_TIMEOUT,
            max_retries: 3,
            retry_backoff: Duration::from_millis(50),
            close_on_signal: true,
        }
    }
}

impl BuilderOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scope: config.graph.scope,
            mode: config.graph.mode,
            normalizer: TokenNormalizer {
                lowercase: config.graph.lowercase_tokens,
            },
            cache_capacity: config.graph.cache_capacity,
            timeout: config.store.timeout(),
            max_retries: config.store.max_retries,
            retry_backoff: config.store.retry_backoff(),
            close_on_signal: config.graph.close_on_signal,
        }
    }
}

/// Builds the entity/relation graph on top of one shared store handle.
///
/// Unless `close_on_signal` is off, opening a builder registers a handler that
/// closes the store on Ctrl-C / SIGTERM and exits with
/// [`lifecycle::SIGNAL_EXIT_CODE`]. Dropping the builder unregisters it.
pub struct GraphBuilder {
    db: Arc<Db>,
    options: BuilderOptions,
    cache: Option<Arc<NodeCache>>,
    shutdown: Option<JoinHandle<()>>,
}

impl GraphBuilder {
    /// Open the store at `location` with default options.
    ///
    /// **Destructive:** `reset_existing = true` deletes any graph already stored at `location`.
    pub async fn new(location: impl AsRef<Path>, reset_existing: bool) -> Result<Self> {
        Self::open(location, reset_existing, BuilderOptions::default()).await
    }

    /// Open the store at `location`.
    ///
    /// **Destructive:** `reset_existing = true` deletes any graph already stored at `location`.
    pub async fn open(
        location: impl AsRef<Path>,
        reset_existing: bool,
        options: BuilderOptions,
    ) -> Result<Self> {
        let db = lifecycle::open(location.as_ref(), reset_existing, options.timeout).await?;
        Ok(Self::from_db(Arc::new(db), options))
    }

    /// Attach to a store addressed by URL. Existing data is kept.
    ///
    /// The embedded backend has no authentication; the user is only recorded in
    /// the log and the password is not used.
    pub async fn connect(info: &ConnectionInfo, options: BuilderOptions) -> Result<Self> {
        let location = store_location(&info.url)?;
        log::info!(
            "Attaching to graph store {} as {}",
            location.display(),
            info.user.as_deref().unwrap_or("<anonymous>")
        );
        Self::open(location, false, options).await
    }

    /// Construct from configuration, preferring `[remote]` when present.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let options = BuilderOptions::from_config(config);
        match &config.remote {
            Some(remote) => {
                if config.graph.reset_existing {
                    log::warn!(
                        "graph.reset_existing not applied: remote store {} is never reset",
                        remote.url
                    );
                }
                let password = match &remote.password_env {
                    Some(var) => Some(std::env::var(var).map_err(|_| {
                        DepgraphError::Config(format!("Environment variable {} not set", var))
                    })?),
                    None => None,
                };
                let info = ConnectionInfo {
                    url: remote.url.clone(),
                    user: remote.user.clone(),
                    password,
                };
                Self::connect(&info, options).await
            }
            None => Self::open(config.location(), config.graph.reset_existing, options).await,
        }
    }

    fn from_db(db: Arc<Db>, options: BuilderOptions) -> Self {
        let cache = (options.cache_capacity > 0)
            .then(|| Arc::new(NodeCache::new(options.cache_capacity)));
        let shutdown = options
            .close_on_signal
            .then(|| lifecycle::install_shutdown_handler(&db));
        Self {
            db,
            options,
            cache,
            shutdown,
        }
    }

    pub fn options(&self) -> &BuilderOptions {
        &self.options
    }

    /// The shared store handle. All mutation goes through it.
    pub fn store(&self) -> &Arc<Db> {
        &self.db
    }

    /// Key a caller would resolve to under this builder's normalization and scope policy.
    pub fn node_key(
        &self,
        token: &str,
        pos: &str,
        entity_type: Option<&str>,
        scope: Option<&str>,
    ) -> Result<NodeKey> {
        self.options
            .normalizer
            .key(token, pos, entity_type, self.effective_scope(scope))
    }

    fn effective_scope<'a>(&self, scope: Option<&'a str>) -> Option<&'a str> {
        match self.options.scope {
            ScopePolicy::PerSentence => scope,
            ScopePolicy::Global => None,
        }
    }

    fn endpoint_key(&self, endpoint: &TaggedToken, scope: Option<&str>) -> Result<NodeKey> {
        let entity_type = match (&endpoint.entity_type, self.options.mode) {
            (Some(t), _) => Some(t.as_str()),
            (None, IngestMode::EntitiesOnly) => None,
            (None, IngestMode::EntitiesAndRelations) => {
                return Err(DepgraphError::InvalidInput(format!(
                    "entity type is required for relation endpoint {:?}",
                    endpoint.token
                )))
            }
        };
        self.options
            .normalizer
            .key(&endpoint.token, &endpoint.pos, entity_type, scope)
    }

    /// Add `src --relation_label--> dst`, creating either endpoint on first reference.
    ///
    /// Returns `Ok(false)` without touching the store when either token is empty.
    /// Every other failure is an `Err`; nothing is written unless the whole
    /// relation commits.
    pub async fn add_relation(
        &self,
        src: &TaggedToken,
        dst: &TaggedToken,
        relation_label: &str,
        scope: Option<&str>,
    ) -> Result<bool> {
        if !src.has_token() || !dst.has_token() {
            log::debug!("Skipping {:?} relation with an empty endpoint token", relation_label);
            return Ok(false);
        }

        let scope = self.effective_scope(scope);
        let src_key = self.endpoint_key(src, scope)?;
        let dst_key = self.endpoint_key(dst, scope)?;
        let kind = RelationKind::classify(relation_label);
        let with_edge = self.options.mode == IngestMode::EntitiesAndRelations;

        let (source, target) = self
            .with_retry("add_relation", || {
                let src_key = src_key.clone();
                let dst_key = dst_key.clone();
                let label = relation_label.to_string();
                let cache = self.cache.clone();
                self.db.with_transaction(move |tx| {
                    let cache = cache.as_deref();
                    let source = identity::resolve(tx, &src_key, cache)?;
                    let target = identity::resolve(tx, &dst_key, cache)?;
                    if with_edge {
                        edge::insert_edge(
                            tx,
                            &source.node,
                            &target.node,
                            kind,
                            &label,
                            src_key.scope(),
                        )?;
                    }
                    Ok((source, target))
                })
            })
            .await?;

        self.remember([&source, &target]);
        Ok(true)
    }

    /// Add standalone nodes for `token/POS[/NER]` items, with global identity and no edges.
    ///
    /// Fail-fast: the whole batch is parsed first and a malformed item aborts it with
    /// `MalformedInput` before anything is written. Returns how many nodes were created.
    pub async fn add_tokens<S: AsRef<str>>(&self, tagged_tokens: &[S]) -> Result<usize> {
        let parsed = tokens::parse_batch(tagged_tokens)?;
        let keys = parsed
            .iter()
            .map(|t| {
                self.options
                    .normalizer
                    .key(&t.token, &t.pos, t.entity_type.as_deref(), None)
            })
            .collect::<Result<Vec<_>>>()?;

        if keys.is_empty() {
            return Ok(0);
        }

        let resolutions = self
            .with_retry("add_tokens", || {
                let keys = keys.clone();
                let cache = self.cache.clone();
                self.db.with_transaction(move |tx| {
                    keys.iter()
                        .map(|key| identity::resolve(tx, key, cache.as_deref()))
                        .collect::<Result<Vec<_>>>()
                })
            })
            .await?;

        self.remember(&resolutions);
        let created = resolutions.iter().filter(|r| r.created).count();
        log::debug!("Ingested {} tagged tokens ({} new nodes)", keys.len(), created);
        Ok(created)
    }

    /// Flush and close the store. Safe to call more than once.
    pub async fn terminate(&self) -> Result<()> {
        if self.db.close().await? {
            log::info!("Graph builder terminated");
        }
        Ok(())
    }

    pub async fn node_count(&self) -> Result<u64> {
        self.db.with_connection(|conn| query::node_count(conn)).await
    }

    pub async fn edge_count(&self) -> Result<u64> {
        self.db.with_connection(|conn| query::edge_count(conn)).await
    }

    pub async fn find_node(&self, key: &NodeKey) -> Result<Option<Node>> {
        let key = key.clone();
        self.db
            .with_connection(move |conn| identity::find_node(conn, &key))
            .await
    }

    pub async fn edges_from(&self, node: &Node) -> Result<Vec<Edge>> {
        let node_id = node.id;
        self.db
            .with_connection(move |conn| query::edges_from(conn, node_id))
            .await
    }

    pub async fn kind_counts(&self) -> Result<Vec<(RelationKind, u64)>> {
        self.db.with_connection(|conn| query::kind_counts(conn)).await
    }

    /// Cache nodes only after their transaction committed.
    fn remember<'a>(&self, resolved: impl IntoIterator<Item = &'a Resolution>) {
        if let Some(cache) = &self.cache {
            for resolution in resolved {
                cache.put(resolution.node.clone());
            }
        }
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut attempt_once: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_retries = self.options.max_retries;
        let mut attempt = 0;
        let mut delay = self.options.retry_backoff;

        loop {
            match attempt_once().await {
                Ok(out) => return Ok(out),
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    log::warn!(
                        "{} retry {}/{} after error: {}",
                        operation,
                        attempt + 1,
                        max_retries,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    return Err(DepgraphError::StoreUnavailable(format!(
                        "{} failed after {} attempts: {}",
                        operation,
                        attempt + 1,
                        e
                    )))
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Drop for GraphBuilder {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.abort();
        }
    }
}

/// Storage location addressed by a `file:` or `sqlite:` URL.
fn store_location(url: &str) -> Result<PathBuf> {
    let normalized = match url.strip_prefix("sqlite:") {
        Some(rest) => format!("file:{}", rest),
        None => url.to_string(),
    };

    let parsed = Url::parse(&normalized)
        .map_err(|e| DepgraphError::Config(format!("invalid store url {}: {}", url, e)))?;

    if parsed.scheme() != "file" {
        return Err(DepgraphError::Config(format!(
            "unsupported store url scheme {:?} (expected file or sqlite)",
            parsed.scheme()
        )));
    }

    parsed
        .to_file_path()
        .map_err(|_| DepgraphError::Config(format!("store url {} is not a local path", url)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn run() -> TaggedToken {
        TaggedToken::new("run", "VB", "O")
    }

    fn dog() -> TaggedToken {
        TaggedToken::new("dog", "NN", "ANIMAL")
    }

    fn options() -> BuilderOptions {
        BuilderOptions {
            retry_backoff: Duration::from_millis(5),
            ..BuilderOptions::default()
        }
    }

    async fn setup_builder_with(options: BuilderOptions) -> (GraphBuilder, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let builder = GraphBuilder::open(temp_dir.path().join("store"), true, options)
            .await
            .unwrap();
        (builder, temp_dir)
    }

    async fn setup_builder() -> (GraphBuilder, TempDir) {
        setup_builder_with(options()).await
    }

    async fn counts(builder: &GraphBuilder) -> (u64, u64) {
        (
            builder.node_count().await.unwrap(),
            builder.edge_count().await.unwrap(),
        )
    }

    async fn inject_edge_failure(builder: &GraphBuilder) {
        builder
            .store()
            .with_connection(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER fail_edges BEFORE INSERT ON edges \
                     BEGIN SELECT RAISE(ABORT, 'injected edge failure'); END;",
                )?;
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_end_to_end_scoped_relation() {
        let (builder, _temp) = setup_builder().await;

        assert!(builder.add_relation(&run(), &dog(), "nsubj", Some("s1")).await.unwrap());

        let run_key = builder.node_key("run", "VB", Some("O"), Some("s1")).unwrap();
        let dog_key = builder.node_key("dog", "NN", Some("ANIMAL"), Some("s1")).unwrap();
        assert_eq!(run_key.to_string(), "run:VB:O@s1");
        assert_eq!(dog_key.to_string(), "dog:NN:ANIMAL@s1");

        let run_node = builder.find_node(&run_key).await.unwrap().unwrap();
        let dog_node = builder.find_node(&dog_key).await.unwrap().unwrap();

        let edges = builder.edges_from(&run_node).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].kind, RelationKind::Nsubj);
        assert_eq!(edges[0].target, dog_node.id);
        assert_eq!(edges[0].scope.as_deref(), Some("s1"));
        assert_eq!(counts(&builder).await, (2, 1));

        // Re-ingesting adds a parallel edge but no nodes
        assert!(builder.add_relation(&run(), &dog(), "nsubj", Some("s1")).await.unwrap());
        assert_eq!(counts(&builder).await, (2, 2));
    }

    #[tokio::test]
    async fn test_empty_token_is_rejected_without_mutation() {
        let (builder, _temp) = setup_builder().await;

        let blank = TaggedToken::new("  ", "NN", "O");
        assert!(!builder.add_relation(&blank, &dog(), "nsubj", None).await.unwrap());
        assert!(!builder.add_relation(&run(), &blank, "nsubj", None).await.unwrap());
        assert_eq!(counts(&builder).await, (0, 0));
    }

    #[tokio::test]
    async fn test_missing_pos_or_type_is_invalid_input() {
        let (builder, _temp) = setup_builder().await;

        let no_pos = TaggedToken::new("dog", "", "ANIMAL");
        let err = builder.add_relation(&run(), &no_pos, "nsubj", None).await.unwrap_err();
        assert!(matches!(err, DepgraphError::InvalidInput(_)));

        let untyped = TaggedToken::untyped("dog", "NN");
        let err = builder.add_relation(&run(), &untyped, "nsubj", None).await.unwrap_err();
        assert!(matches!(err, DepgraphError::InvalidInput(_)));

        let err = builder.add_relation(&run(), &dog(), "nsubj", Some("")).await.unwrap_err();
        assert!(matches!(err, DepgraphError::InvalidInput(_)));

        assert_eq!(counts(&builder).await, (0, 0));
    }

    #[tokio::test]
    async fn test_unknown_label_creates_unknown_edge() {
        let (builder, _temp) = setup_builder().await;
        builder.add_relation(&run(), &dog(), "nmod:tmod", None).await.unwrap();

        let run_node = builder
            .find_node(&builder.node_key("run", "VB", Some("O"), None).unwrap())
            .await
            .unwrap()
            .unwrap();
        let edges = builder.edges_from(&run_node).await.unwrap();
        assert_eq!(edges[0].kind, RelationKind::Unknown);
        assert_eq!(edges[0].label, "nmod:tmod");
    }

    #[tokio::test]
    async fn test_scopes_keep_sentences_apart() {
        let (builder, _temp) = setup_builder().await;
        builder.add_relation(&run(), &dog(), "nsubj", Some("s1")).await.unwrap();
        builder.add_relation(&run(), &dog(), "nsubj", Some("s2")).await.unwrap();
        assert_eq!(counts(&builder).await, (4, 2));
    }

    #[tokio::test]
    async fn test_global_scope_policy_ignores_scope() {
        let (builder, _temp) = setup_builder_with(BuilderOptions {
            scope: ScopePolicy::Global,
            ..options()
        })
        .await;
        builder.add_relation(&run(), &dog(), "nsubj", Some("s1")).await.unwrap();
        builder.add_relation(&run(), &dog(), "nsubj", Some("s2")).await.unwrap();
        assert_eq!(counts(&builder).await, (2, 2));

        let key = builder.node_key("run", "VB", Some("O"), Some("s9")).unwrap();
        assert_eq!(key.scope(), None);
    }

    #[tokio::test]
    async fn test_entities_only_mode_creates_no_edges() {
        let (builder, _temp) = setup_builder_with(BuilderOptions {
            mode: IngestMode::EntitiesOnly,
            ..options()
        })
        .await;
        let untyped = TaggedToken::untyped("dog", "NN");
        assert!(builder.add_relation(&run(), &untyped, "nsubj", None).await.unwrap());
        assert_eq!(counts(&builder).await, (2, 0));
    }

    #[tokio::test]
    async fn test_add_tokens_dedupes_globally() {
        let (builder, _temp) = setup_builder().await;

        let created = builder
            .add_tokens(&["The/DT/O", "Dog/NN/ANIMAL", "dog/NN/ANIMAL", "barks/VBZ"])
            .await
            .unwrap();
        assert_eq!(created, 3);
        assert_eq!(counts(&builder).await, (3, 0));

        let again = builder.add_tokens(&["dog/NN/ANIMAL"]).await.unwrap();
        assert_eq!(again, 0);
        assert_eq!(builder.node_count().await.unwrap(), 3);

        let key = builder.node_key("the", "DT", Some("O"), None).unwrap();
        assert!(builder.find_node(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_case_policy_shared_by_both_paths() {
        let (builder, _temp) = setup_builder().await;
        builder.add_tokens(&["Dog/NN/ANIMAL", "RUN/VB/O"]).await.unwrap();
        builder
            .add_relation(
                &TaggedToken::new("Run", "VB", "O"),
                &TaggedToken::new("DOG", "NN", "ANIMAL"),
                "nsubj",
                None,
            )
            .await
            .unwrap();
        assert_eq!(counts(&builder).await, (2, 1));
    }

    #[tokio::test]
    async fn test_add_tokens_malformed_fails_fast() {
        let (builder, _temp) = setup_builder().await;

        let err = builder
            .add_tokens(&["the/DT/O", "dog/NN/ANIMAL", "barks"])
            .await
            .unwrap_err();
        match err {
            DepgraphError::MalformedInput { index, item, .. } => {
                assert_eq!(index, 2);
                assert_eq!(item, "barks");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(builder.node_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_tokens_empty_batch() {
        let (builder, _temp) = setup_builder().await;
        let empty: [&str; 0] = [];
        assert_eq!(builder.add_tokens(&empty).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_edge_rolls_back_new_nodes() {
        let (builder, _temp) = setup_builder().await;
        inject_edge_failure(&builder).await;

        let err = builder.add_relation(&run(), &dog(), "nsubj", Some("s1")).await.unwrap_err();
        assert!(err.to_string().contains("injected edge failure"), "{}", err);
        assert_eq!(counts(&builder).await, (0, 0));
    }

    #[tokio::test]
    async fn test_rolled_back_nodes_are_not_cached() {
        let (builder, _temp) = setup_builder().await;
        inject_edge_failure(&builder).await;
        assert!(builder.add_relation(&run(), &dog(), "nsubj", None).await.is_err());

        builder
            .store()
            .with_connection(|conn| {
                conn.execute_batch("DROP TRIGGER fail_edges;")?;
                Ok(())
            })
            .await
            .unwrap();

        assert!(builder.add_relation(&run(), &dog(), "nsubj", None).await.unwrap());
        assert_eq!(counts(&builder).await, (2, 1));
    }

    #[tokio::test]
    async fn test_locked_store_surfaces_store_unavailable() {
        let (builder, _temp) = setup_builder_with(BuilderOptions {
            timeout: Duration::from_millis(100),
            max_retries: 1,
            retry_backoff: Duration::from_millis(5),
            ..BuilderOptions::default()
        })
        .await;

        let blocker = rusqlite::Connection::open(builder.store().path()).unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

        let err = builder.add_relation(&run(), &dog(), "nsubj", None).await.unwrap_err();
        assert!(matches!(err, DepgraphError::StoreUnavailable(_)), "{}", err);

        blocker.execute_batch("ROLLBACK").unwrap();
        assert_eq!(counts(&builder).await, (0, 0));
    }

    #[tokio::test]
    async fn test_transient_lock_is_retried() {
        let (builder, _temp) = setup_builder_with(BuilderOptions {
            timeout: Duration::from_millis(100),
            max_retries: 5,
            retry_backoff: Duration::from_millis(50),
            ..options()
        })
        .await;

        let blocker = rusqlite::Connection::open(builder.store().path()).unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE").unwrap();
        let release = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            blocker.execute_batch("ROLLBACK").unwrap();
        });

        assert!(builder.add_relation(&run(), &dog(), "nsubj", None).await.unwrap());
        release.join().unwrap();
        assert_eq!(counts(&builder).await, (2, 1));
    }

    #[tokio::test]
    async fn test_reset_by_another_handle_keeps_edges_on_their_nodes() {
        let temp_dir = TempDir::new().unwrap();
        let location = temp_dir.path().join("store");

        let first = GraphBuilder::open(&location, true, options()).await.unwrap();
        assert!(first.add_relation(&run(), &dog(), "nsubj", None).await.unwrap());

        // Same ids, different entities
        let second = GraphBuilder::open(&location, true, options()).await.unwrap();
        let cat = TaggedToken::new("cat", "NN", "ANIMAL");
        let fish = TaggedToken::new("fish", "NN", "ANIMAL");
        assert!(second.add_relation(&cat, &fish, "dobj", None).await.unwrap());

        assert!(first.add_relation(&run(), &dog(), "nsubj", None).await.unwrap());
        assert_eq!(counts(&second).await, (4, 2));

        let lookup = |token: &str, pos: &str, ner: &str| second.node_key(token, pos, Some(ner), None).unwrap();
        let run_node = second.find_node(&lookup("run", "VB", "O")).await.unwrap().unwrap();
        let dog_node = second.find_node(&lookup("dog", "NN", "ANIMAL")).await.unwrap().unwrap();
        let cat_node = second.find_node(&lookup("cat", "NN", "ANIMAL")).await.unwrap().unwrap();

        let run_edges = second.edges_from(&run_node).await.unwrap();
        assert_eq!(run_edges.len(), 1);
        assert_eq!(run_edges[0].kind, RelationKind::Nsubj);
        assert_eq!(run_edges[0].target, dog_node.id);

        let cat_edges = second.edges_from(&cat_node).await.unwrap();
        assert_eq!(cat_edges.len(), 1);
        assert_eq!(cat_edges[0].kind, RelationKind::Dobj);
    }

    #[tokio::test]
    async fn test_open_registers_shutdown_handler() {
        let (builder, _temp) = setup_builder().await;
        let handler = builder.shutdown.as_ref().unwrap().abort_handle();
        assert!(!handler.is_finished());

        drop(builder);
        for _ in 0..100 {
            if handler.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(handler.is_finished());

        let (quiet, _quiet_temp) = setup_builder_with(BuilderOptions {
            close_on_signal: false,
            ..options()
        })
        .await;
        assert!(quiet.shutdown.is_none());
    }

    #[tokio::test]
    async fn test_destructive_reset_empties_graph() {
        let temp_dir = TempDir::new().unwrap();
        let location = temp_dir.path().join("store");

        {
            let builder = GraphBuilder::new(&location, true).await.unwrap();
            builder.add_relation(&run(), &dog(), "nsubj", Some("s1")).await.unwrap();
            builder.terminate().await.unwrap();
        }

        let kept = GraphBuilder::new(&location, false).await.unwrap();
        assert_eq!(counts(&kept).await, (2, 1));
        kept.terminate().await.unwrap();
        drop(kept);

        let reset = GraphBuilder::new(&location, true).await.unwrap();
        assert_eq!(counts(&reset).await, (0, 0));
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let (builder, _temp) = setup_builder().await;
        builder.add_tokens(&["dog/NN/O"]).await.unwrap();

        builder.terminate().await.unwrap();
        builder.terminate().await.unwrap();

        let err = builder.add_relation(&run(), &dog(), "nsubj", None).await.unwrap_err();
        assert!(matches!(err, DepgraphError::StoreClosed));
        let err = builder.add_tokens(&["cat/NN/O"]).await.unwrap_err();
        assert!(matches!(err, DepgraphError::StoreClosed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_relations_share_one_endpoint() {
        let (builder, _temp) = setup_builder_with(BuilderOptions {
            cache_capacity: 0,
            ..options()
        })
        .await;
        let builder = Arc::new(builder);

        let mut handles = Vec::new();
        for i in 0..16 {
            let builder = Arc::clone(&builder);
            handles.push(tokio::spawn(async move {
                let dst = TaggedToken::new(&format!("dog{}", i), "NN", "ANIMAL");
                builder.add_relation(&run(), &dst, "nsubj", Some("s1")).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap());
        }

        assert_eq!(counts(&builder).await, (17, 16));
        let run_key = builder.node_key("run", "VB", Some("O"), Some("s1")).unwrap();
        let run_node = builder.find_node(&run_key).await.unwrap().unwrap();
        assert_eq!(builder.edges_from(&run_node).await.unwrap().len(), 16);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_identical_relations() {
        let (builder, _temp) = setup_builder().await;
        let builder = Arc::new(builder);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let builder = Arc::clone(&builder);
            handles.push(tokio::spawn(async move {
                builder.add_relation(&run(), &dog(), "dobj", Some("s1")).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap());
        }

        assert_eq!(counts(&builder).await, (2, 8));
    }

    #[tokio::test]
    async fn test_cancelled_call_is_all_or_nothing() {
        let (builder, _temp) = setup_builder().await;
        let builder = Arc::new(builder);

        let task = {
            let builder = Arc::clone(&builder);
            tokio::spawn(async move { builder.add_relation(&run(), &dog(), "nsubj", None).await })
        };
        task.abort();
        let _ = task.await;

        // Let any blocking transaction that already started finish
        tokio::time::sleep(Duration::from_millis(200)).await;
        let state = counts(&builder).await;
        assert!(state == (0, 0) || state == (2, 1), "partial state {:?}", state);
    }

    #[tokio::test]
    async fn test_connect_attaches_without_reset() {
        let temp_dir = TempDir::new().unwrap();
        let location = temp_dir.path().join("store");
        {
            let builder = GraphBuilder::new(&location, true).await.unwrap();
            builder.add_relation(&run(), &dog(), "nsubj", None).await.unwrap();
        }

        let info = ConnectionInfo {
            url: Url::from_file_path(&location).unwrap().to_string(),
            user: Some("ingest".to_string()),
            password: Some("unused".to_string()),
        };
        let remote = GraphBuilder::connect(&info, options()).await.unwrap();
        assert_eq!(counts(&remote).await, (2, 1));
    }

    #[test]
    fn test_store_location_urls() {
        assert_eq!(
            store_location("file:///var/lib/depgraph").unwrap(),
            PathBuf::from("/var/lib/depgraph")
        );
        assert_eq!(
            store_location("sqlite:///var/lib/depgraph").unwrap(),
            PathBuf::from("/var/lib/depgraph")
        );
        assert!(matches!(
            store_location("bolt://localhost:7687"),
            Err(DepgraphError::Config(_))
        ));
        assert!(matches!(store_location("not a url"), Err(DepgraphError::Config(_))));
    }
}
