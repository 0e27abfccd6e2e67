//! In-memory upstream catalog for sync tests.

#![allow(dead_code)]

use async_trait::async_trait;
use mirror_db::{
    CatalogRecord, EdgeSet, EntityRecord, Junction, NewSource, ReadinessGate, ReplicaDb,
    SceneAttrs, SourceConfig, TagAttrs,
};
use mirror_ids::EntityKind;
use mirror_sync::{
    CatalogClient, CatalogPage, SourceConnector, SourceError, SyncEngine, SyncOptions,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

/// One recorded listing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub kind: EntityKind,
    pub since: Option<i64>,
    pub page: u32,
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<(EntityKind, String), CatalogRecord>,
    calls: Vec<Call>,
    /// Fail listing calls for this kind from this page on.
    fail_from: Option<(EntityKind, u32, bool)>,
}

/// A catalog whose contents tests edit directly.
#[derive(Default)]
pub struct FakeCatalog {
    inner: Mutex<Inner>,
    /// When set, every listing call waits for a permit.
    hold: Option<Arc<Semaphore>>,
    pub entered: Notify,
}

impl FakeCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A catalog whose listing calls block until [`release`](Self::release).
    pub fn held() -> Arc<Self> {
        Arc::new(Self {
            hold: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        })
    }

    pub fn release(&self) {
        if let Some(hold) = &self.hold {
            hold.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    /// Let exactly one waiting listing call through.
    pub fn release_one(&self) {
        if let Some(hold) = &self.hold {
            hold.add_permits(1);
        }
    }

    pub fn put(&self, record: impl Into<CatalogRecord>) {
        let record = record.into();
        let key = (record.kind(), record.id().to_string());
        self.inner.lock().unwrap().records.insert(key, record);
    }

    pub fn remove(&self, kind: EntityKind, id: &str) {
        self.inner
            .lock()
            .unwrap()
            .records
            .remove(&(kind, id.to_string()));
    }

    /// Make listing calls for `kind` fail from `page` on.
    pub fn fail_from(&self, kind: EntityKind, page: u32, transient: bool) {
        self.inner.lock().unwrap().fail_from = Some((kind, page, transient));
    }

    pub fn heal(&self) {
        self.inner.lock().unwrap().fail_from = None;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    async fn list(
        &self,
        kind: EntityKind,
        since: Option<i64>,
        page: u32,
        per_page: u32,
    ) -> Result<CatalogPage, SourceError> {
        self.entered.notify_one();
        if let Some(hold) = &self.hold {
            hold.acquire()
                .await
                .map_err(|_| SourceError::transient("catalog closed"))?
                .forget();
        }

        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call { kind, since, page });

        if let Some((fail_kind, fail_page, transient)) = inner.fail_from {
            if fail_kind == kind && page >= fail_page {
                return Err(if transient {
                    SourceError::transient("connection reset")
                } else {
                    SourceError::malformed("unexpected payload")
                });
            }
        }

        // Full listings by id, change listings by ascending updated_at.
        let mut matching: Vec<&CatalogRecord> = inner
            .records
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, record)| record)
            .filter(|record| match since {
                Some(since) => record.updated_at().unwrap_or(0) >= since,
                None => true,
            })
            .collect();
        match since {
            Some(_) => matching.sort_by_key(|record| (record.updated_at(), id_order(record.id()))),
            None => matching.sort_by_key(|record| id_order(record.id())),
        }

        let total = matching.len() as u64;
        let start = ((page.max(1) - 1) * per_page) as usize;
        let records = matching
            .into_iter()
            .skip(start)
            .take(per_page as usize)
            .cloned()
            .collect();
        Ok(CatalogPage { total, records })
    }
}

/// Numeric ids in numeric order, like the upstream `id` sort.
fn id_order(id: &str) -> (Option<u64>, String) {
    (id.parse().ok(), id.to_string())
}

#[async_trait]
impl CatalogClient for FakeCatalog {
    async fn list_all(
        &self,
        kind: EntityKind,
        page: u32,
        per_page: u32,
    ) -> Result<CatalogPage, SourceError> {
        self.list(kind, None, page, per_page).await
    }

    async fn list_updated_since(
        &self,
        kind: EntityKind,
        since: i64,
        page: u32,
        per_page: u32,
    ) -> Result<CatalogPage, SourceError> {
        self.list(kind, Some(since), page, per_page).await
    }
}

/// Runs an edit against the wrapped catalog right after the first full
/// listing page has been served, as an upstream change mid-pass would.
pub struct EditAfterFirstPage {
    catalog: Arc<FakeCatalog>,
    edit: Mutex<Option<Box<dyn FnOnce(&FakeCatalog) + Send>>>,
}

impl EditAfterFirstPage {
    pub fn new(
        catalog: Arc<FakeCatalog>,
        edit: impl FnOnce(&FakeCatalog) + Send + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            edit: Mutex::new(Some(Box::new(edit))),
        })
    }
}

#[async_trait]
impl CatalogClient for EditAfterFirstPage {
    async fn list_all(
        &self,
        kind: EntityKind,
        page: u32,
        per_page: u32,
    ) -> Result<CatalogPage, SourceError> {
        let listing = self.catalog.list_all(kind, page, per_page).await?;
        if page == 1 {
            let edit = self.edit.lock().unwrap().take();
            if let Some(edit) = edit {
                edit(self.catalog.as_ref());
            }
        }
        Ok(listing)
    }

    async fn list_updated_since(
        &self,
        kind: EntityKind,
        since: i64,
        page: u32,
        per_page: u32,
    ) -> Result<CatalogPage, SourceError> {
        self.catalog.list_updated_since(kind, since, page, per_page).await
    }
}

/// Hands out fake catalogs by source id.
#[derive(Default)]
pub struct FakeConnector {
    catalogs: Mutex<HashMap<String, Arc<dyn CatalogClient>>>,
}

impl FakeConnector {
    pub fn attach(&self, source_id: &str, catalog: Arc<dyn CatalogClient>) {
        self.catalogs
            .lock()
            .unwrap()
            .insert(source_id.to_string(), catalog);
    }
}

impl SourceConnector for FakeConnector {
    fn connect(&self, source: &SourceConfig) -> Result<Arc<dyn CatalogClient>, SourceError> {
        let catalogs = self.catalogs.lock().unwrap();
        match catalogs.get(&source.id) {
            Some(catalog) => Ok(Arc::clone(catalog)),
            None => Err(SourceError::Upstream {
                status: 404,
                message: format!("no catalog at {}", source.endpoint),
            }),
        }
    }
}

pub struct Harness {
    pub _tmp: TempDir,
    pub db: ReplicaDb,
    pub gate: ReadinessGate,
    pub connector: Arc<FakeConnector>,
    pub engine: SyncEngine,
}

/// A replica plus an engine wired to fake catalogs, paging 2 at a time.
pub async fn harness(required_kinds: Vec<EntityKind>) -> Harness {
    let tmp = TempDir::new().unwrap();
    let db = ReplicaDb::open(tmp.path().join("replica.db")).await.unwrap();
    let gate = ReadinessGate::new();
    let connector = Arc::new(FakeConnector::default());
    let engine = SyncEngine::with_options(
        db.clone(),
        connector.clone(),
        gate.clone(),
        SyncOptions {
            page_size: 2,
            required_kinds,
        },
    );
    Harness {
        _tmp: tmp,
        db,
        gate,
        connector,
        engine,
    }
}

impl Harness {
    pub async fn add_source(&self, id: &str, catalog: Arc<FakeCatalog>) {
        self.add_client(id, catalog).await;
    }

    pub async fn add_client(&self, id: &str, client: Arc<dyn CatalogClient>) {
        self.db
            .add_source(NewSource {
                id: Some(id.to_string()),
                name: format!("source-{id}"),
                endpoint: format!("http://{id}.test/graphql"),
                api_key: None,
                priority: 0,
            })
            .await
            .unwrap();
        self.connector.attach(id, client);
    }
}

pub fn scene(id: &str, title: &str, updated_at: i64) -> EntityRecord<SceneAttrs> {
    EntityRecord::new(
        id,
        SceneAttrs {
            title: Some(title.to_string()),
            ..Default::default()
        },
    )
    .updated_at(updated_at)
}

pub fn scene_with_tags(id: &str, title: &str, updated_at: i64, tags: &[&str]) -> EntityRecord<SceneAttrs> {
    scene(id, title, updated_at).with_edges(EdgeSet::new(
        Junction::SceneTags,
        tags.iter().map(|t| t.to_string()),
    ))
}

pub fn tag(id: &str, name: &str, updated_at: i64) -> EntityRecord<TagAttrs> {
    EntityRecord::new(
        id,
        TagAttrs {
            name: Some(name.to_string()),
            ..Default::default()
        },
    )
    .updated_at(updated_at)
}
