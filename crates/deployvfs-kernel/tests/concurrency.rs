//! Concurrent mount table and temp provider behavior.

mod common;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use deployvfs_kernel::temp::TempRoot;
use deployvfs_kernel::vfs::{MemoryBackend, MountHandle, MountTable, VfsError, VirtualPath};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const WORKERS: usize = 8;
const STEPS: usize = 400;

/// Points owned by one worker. Siblings share a table row with other
/// workers' points, so swaps race.
fn owned_points(worker: usize) -> Vec<VirtualPath> {
    [
        format!("/shared/w{}", worker),
        format!("/shared/w{}/inner", worker),
        format!("/own{}", worker),
        format!("/deep/a/b/w{}", worker),
    ]
    .iter()
    .map(|p| VirtualPath::new(p).unwrap())
    .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mounts_match_model() {
    let table = MountTable::new(Arc::new(MemoryBackend::new()));

    let mut tasks = Vec::new();
    for worker in 0..WORKERS {
        let table = table.clone();
        tasks.push(tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(worker as u64);
            let points = owned_points(worker);
            let mut held: HashMap<VirtualPath, MountHandle> = HashMap::new();
            for _ in 0..STEPS {
                let point = &points[rng.gen_range(0..points.len())];
                match held.remove(point) {
                    Some(handle) => handle.close(),
                    None => {
                        let handle = table
                            .mount(point, Arc::new(MemoryBackend::new()))
                            .expect("owned point is free");
                        held.insert(point.clone(), handle);
                    }
                }
                if rng.gen_bool(0.2) {
                    tokio::task::yield_now().await;
                }
            }
            held
        }));
    }

    let mut model: BTreeSet<VirtualPath> = BTreeSet::new();
    let mut handles = Vec::new();
    for task in tasks {
        let held = task.await.unwrap();
        model.extend(held.keys().cloned());
        handles.extend(held.into_values());
    }

    let actual: BTreeSet<VirtualPath> = table.list_mounts().into_iter().map(|m| m.point).collect();
    assert_eq!(actual, model);
    for handle in &handles {
        assert!(Arc::ptr_eq(&table.resolve(handle.point()), handle.mount()));
    }

    for handle in handles {
        handle.close();
    }
    assert!(table.list_mounts().is_empty());
}

#[test]
fn test_concurrent_temp_dirs_are_distinct() {
    let scratch = tempfile::tempdir().unwrap();
    let root = TempRoot::init(&common::config(scratch.path())).unwrap();
    let provider = root.provider("deploy").unwrap();

    let dirs: Vec<_> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..WORKERS)
            .map(|_| {
                let provider = provider.clone();
                scope.spawn(move || {
                    (0..16)
                        .map(|_| provider.create_temp_dir("same-label").unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
    });

    let unique: HashSet<_> = dirs.iter().map(|d| d.root().to_path_buf()).collect();
    assert_eq!(unique.len(), WORKERS * 16);
    assert!(dirs.iter().all(|d| d.root().is_dir()));

    provider.close();
    assert!(matches!(
        provider.create_temp_dir("late"),
        Err(VfsError::ProviderClosed(_))
    ));
    assert!(dirs.iter().all(|d| !d.root().exists()));
    root.shutdown();
}
