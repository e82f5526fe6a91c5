//! Concurrent creation of named indexes.

use kernstore_core::index::{
    ConfigStoreIndexCreator, IndexConfigStore, IndexCreator, IndexProviders,
};
use kernstore_core::{Config, CoreError, CoreResult, IndexConfig, IndexEntityType, LegacyIndexStore};
use kernstore_storage::EphemeralFileSystem;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

/// Slows creation down so racing callers pile up on the lock.
struct SlowCreator {
    inner: ConfigStoreIndexCreator,
    created: AtomicUsize,
}

impl IndexCreator for SlowCreator {
    fn create_index(&self, kind: IndexEntityType, name: &str, config: &IndexConfig) -> CoreResult<()> {
        self.created.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        self.inner.create_index(kind, name, config)
    }
}

fn legacy_store() -> (Arc<LegacyIndexStore>, Arc<SlowCreator>) {
    let fs = Arc::new(EphemeralFileSystem::new());
    let store = Arc::new(IndexConfigStore::open(fs, Path::new("/db")).unwrap());
    let creator = Arc::new(SlowCreator {
        inner: ConfigStoreIndexCreator::new(Arc::clone(&store)),
        created: AtomicUsize::new(0),
    });
    let legacy = LegacyIndexStore::new(
        store,
        Config::default(),
        IndexProviders::new(),
        Arc::clone(&creator) as Arc<dyn IndexCreator>,
    );
    (Arc::new(legacy), creator)
}

fn config(kind: &str) -> IndexConfig {
    IndexConfig::from([("type".to_owned(), kind.to_owned())])
}

fn race(legacy: &Arc<LegacyIndexStore>, configs: Vec<IndexConfig>) -> Vec<CoreResult<IndexConfig>> {
    let barrier = Arc::new(Barrier::new(configs.len()));
    let handles: Vec<_> = configs
        .into_iter()
        .map(|supplied| {
            let legacy = Arc::clone(legacy);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                legacy.get_or_create_node_index_config("people", Some(&supplied))
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn matching_configurations_all_see_one_index() {
    let (legacy, creator) = legacy_store();
    let results = race(&legacy, vec![config("exact"); 8]);

    let configs: Vec<IndexConfig> = results.into_iter().map(Result::unwrap).collect();
    assert!(configs.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(configs[0].get("provider").map(String::as_str), Some("native"));
    assert_eq!(creator.created.load(Ordering::SeqCst), 1);
    assert_eq!(legacy.all_node_index_names(), vec!["people"]);
}

#[test]
fn conflicting_configurations_have_one_winner() {
    let (legacy, creator) = legacy_store();
    let results = race(&legacy, vec![config("exact"), config("fulltext")]);

    let (won, lost): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
    assert_eq!((won.len(), lost.len()), (1, 1));
    assert_eq!(creator.created.load(Ordering::SeqCst), 1);

    let stored = legacy.node_index_configuration("people").unwrap();
    assert_eq!(won.into_iter().next().unwrap().unwrap(), stored);
    match lost.into_iter().next().unwrap() {
        Err(CoreError::IndexConfigMismatch {
            index,
            supplied,
            stored,
        }) => {
            assert_eq!(index, "people");
            assert_ne!(supplied, stored);
        }
        other => panic!("expected a configuration mismatch, got {other:?}"),
    }
}
