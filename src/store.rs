// Ordered task list mirrored to a single persisted blob

use crate::blob::BlobStorage;
use crate::ids::IdGenerator;
use crate::task::{Task, decode_tasks, encode_tasks};
use eyre::{Context, Result, eyre};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Storage key used when none is configured
pub const DEFAULT_STORAGE_KEY: &str = "todos";

/// Draws from the id generator before `add` gives up
const MAX_ID_ATTEMPTS: usize = 16;

/// Read-only view handed to observers and the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot<'a> {
    pub tasks: &'a [Task],
    pub total: usize,
    pub completed: usize,
}

impl<'a> Snapshot<'a> {
    fn new(tasks: &'a [Task]) -> Self {
        Self {
            tasks,
            total: tasks.len(),
            completed: count_completed(tasks),
        }
    }
}

/// Handle returned by `subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer = Box<dyn FnMut(&Snapshot<'_>)>;

/// Owner of the task collection and its persistence
///
/// Every mutation writes the full collection to `storage` before the
/// in-memory state changes, so a failed write leaves the store untouched.
pub struct TaskListStore<S, G> {
    storage: S,
    ids: G,
    key: String,
    tasks: Vec<Task>,
    observers: Vec<(SubscriptionId, Observer)>,
    next_subscription: u64,
}

impl<S: BlobStorage, G: IdGenerator> TaskListStore<S, G> {
    /// Empty store using the default storage key. Nothing is read until `load`.
    pub fn new(storage: S, ids: G) -> Self {
        Self::with_key(storage, ids, DEFAULT_STORAGE_KEY)
    }

    /// Empty store persisting under `key`
    pub fn with_key(storage: S, ids: G, key: impl Into<String>) -> Self {
        Self {
            storage,
            ids,
            key: key.into(),
            tasks: Vec::new(),
            observers: Vec::new(),
            next_subscription: 0,
        }
    }

    /// Create a store and load whatever was persisted under the default key
    pub fn open(storage: S, ids: G) -> Self {
        let mut store = Self::new(storage, ids);
        store.load();
        store
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    // ========================================================================
    // Startup
    // ========================================================================

    /// Replace the in-memory collection with the persisted one
    ///
    /// A missing, unreadable, or malformed blob yields an empty collection.
    /// Nothing is written back.
    pub fn load(&mut self) {
        let tasks = match self.storage.get(&self.key) {
            Ok(Some(blob)) => match decode_tasks(&blob) {
                Ok(tasks) => dedupe_ids(tasks),
                Err(e) => {
                    warn!(key = %self.key, error = ?e, "Discarding malformed task blob");
                    Vec::new()
                }
            },
            Ok(None) => {
                debug!(key = %self.key, "No persisted task blob, starting empty");
                Vec::new()
            }
            Err(e) => {
                warn!(key = %self.key, error = ?e, "Failed to read task blob, starting empty");
                Vec::new()
            }
        };

        info!(key = %self.key, count = tasks.len(), "Loaded tasks");
        self.tasks = tasks;
        self.notify();
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Append a task with the trimmed `text`
    ///
    /// Blank text is ignored: returns `Ok(None)` and writes nothing.
    pub fn add(&mut self, text: &str) -> Result<Option<Task>> {
        let text = text.trim();
        if text.is_empty() {
            debug!("Ignoring blank task text");
            return Ok(None);
        }

        let task = Task::new(self.fresh_id()?, text);

        let mut next = self.tasks.clone();
        next.push(task.clone());
        self.commit(next).wrap_err("Failed to persist new task")?;

        debug!(id = %task.id, "Added task");
        Ok(Some(task))
    }

    /// Flip `completed` on the task with `id`, keeping its position
    ///
    /// Returns `Ok(false)` without writing when no task has that id.
    pub fn toggle(&mut self, id: &str) -> Result<bool> {
        let Some(index) = self.position(id) else {
            debug!(id, "Toggle of unknown task ignored");
            return Ok(false);
        };

        let mut next = self.tasks.clone();
        next[index].completed = !next[index].completed;
        self.commit(next).wrap_err("Failed to persist task toggle")?;

        debug!(id, "Toggled task");
        Ok(true)
    }

    /// Remove the task with `id`, keeping the order of the rest
    ///
    /// Returns `Ok(false)` without writing when no task has that id.
    pub fn delete(&mut self, id: &str) -> Result<bool> {
        let Some(index) = self.position(id) else {
            debug!(id, "Delete of unknown task ignored");
            return Ok(false);
        };

        let mut next = self.tasks.clone();
        next.remove(index);
        self.commit(next).wrap_err("Failed to persist task deletion")?;

        debug!(id, "Deleted task");
        Ok(true)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn completed_count(&self) -> usize {
        count_completed(&self.tasks)
    }

    pub fn size(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in insertion order
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot::new(&self.tasks)
    }

    // ========================================================================
    // Observers
    // ========================================================================

    /// Register a callback run after every committed change and after `load`
    pub fn subscribe<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut(&Snapshot<'_>) + 'static,
    {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Returns false if `id` was not subscribed
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sub, _)| *sub != id);
        self.observers.len() != before
    }

    // ========================================================================
    // Helper methods
    // ========================================================================

    fn position(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|task| task.id == id)
    }

    fn fresh_id(&mut self) -> Result<String> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = self.ids.next();
            if id.trim().is_empty() {
                warn!("Id generator produced a blank id, retrying");
                continue;
            }
            if self.position(&id).is_some() {
                warn!(id = %id, "Id generator produced a duplicate id, retrying");
                continue;
            }
            return Ok(id);
        }

        Err(eyre!("No unique task id after {} attempts", MAX_ID_ATTEMPTS))
    }

    /// Persist `next`, then make it the current collection
    fn commit(&mut self, next: Vec<Task>) -> Result<()> {
        let blob = encode_tasks(&next)?;
        self.storage
            .set(&self.key, &blob)
            .with_context(|| format!("Failed to write task blob under key {}", self.key))?;

        self.tasks = next;
        self.notify();
        Ok(())
    }

    fn notify(&mut self) {
        let snapshot = Snapshot::new(&self.tasks);
        for (_, observer) in self.observers.iter_mut() {
            observer(&snapshot);
        }
    }
}

fn count_completed(tasks: &[Task]) -> usize {
    tasks.iter().filter(|task| task.completed).count()
}

/// Keep the first task for each id
fn dedupe_ids(tasks: Vec<Task>) -> Vec<Task> {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(tasks.len());

    for task in tasks {
        if seen.insert(task.id.clone()) {
            kept.push(task);
        } else {
            warn!(id = %task.id, "Dropping task with duplicate id from loaded blob");
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStorage;
    use crate::ids::SequentialIds;
    use std::cell::RefCell;
    use std::rc::Rc;

    type TestStore = TaskListStore<MemoryBlobStorage, SequentialIds>;

    fn empty_store() -> TestStore {
        TaskListStore::open(MemoryBlobStorage::new(), SequentialIds::new("t"))
    }

    fn store_with_blob(blob: &str) -> TestStore {
        TaskListStore::open(
            MemoryBlobStorage::with_blob(DEFAULT_STORAGE_KEY, blob),
            SequentialIds::new("t"),
        )
    }

    fn persisted(store: &TestStore) -> Vec<Task> {
        let blob = store.storage().blob(DEFAULT_STORAGE_KEY).unwrap();
        decode_tasks(blob).unwrap()
    }

    fn texts(store: &TestStore) -> Vec<&str> {
        store.tasks().iter().map(|t| t.text.as_str()).collect()
    }

    /// Storage whose writes always fail
    struct BrokenStorage;

    impl BlobStorage for BrokenStorage {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(Some(r#"[{"id":"a","text":"kept","completed":false}]"#.to_string()))
        }

        fn set(&mut self, _key: &str, _blob: &str) -> Result<()> {
            Err(eyre!("disk full"))
        }
    }

    /// Generator that always returns the same id
    struct StuckIds;

    impl IdGenerator for StuckIds {
        fn next(&mut self) -> String {
            "same".to_string()
        }
    }

    #[test]
    fn test_add_appends_open_task() {
        let mut store = empty_store();

        let task = store.add("Buy milk").unwrap().unwrap();
        assert_eq!(task.id, "t-1");
        assert_eq!(task.text, "Buy milk");
        assert!(!task.completed);
        assert_eq!(store.size(), 1);
        assert_eq!(store.tasks()[0], task);
    }

    #[test]
    fn test_add_trims_text() {
        let mut store = empty_store();
        let task = store.add("  Walk dog \n").unwrap().unwrap();
        assert_eq!(task.text, "Walk dog");
    }

    #[test]
    fn test_add_blank_is_noop() {
        let mut store = empty_store();

        assert!(store.add("").unwrap().is_none());
        assert!(store.add("   ").unwrap().is_none());
        assert!(store.add("\t\n").unwrap().is_none());

        assert_eq!(store.size(), 0);
        assert_eq!(store.storage().writes(), 0);
    }

    #[test]
    fn test_add_persists_each_time() {
        let mut store = empty_store();
        store.add("one").unwrap();
        store.add("two").unwrap();

        assert_eq!(store.storage().writes(), 2);
        assert_eq!(persisted(&store), store.tasks());
    }

    #[test]
    fn test_add_appends_at_tail() {
        let mut store = empty_store();
        for text in ["a", "b", "c"] {
            store.add(text).unwrap();
        }
        assert_eq!(texts(&store), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_add_skips_ids_already_in_use() {
        let blob = r#"[{"id":"t-1","text":"old","completed":false}]"#;
        let mut store = store_with_blob(blob);

        let task = store.add("new").unwrap().unwrap();
        assert_eq!(task.id, "t-2");
        assert_eq!(store.size(), 2);
    }

    #[test]
    fn test_add_gives_up_on_stuck_generator() {
        let mut store = TaskListStore::open(MemoryBlobStorage::new(), StuckIds);
        store.add("first").unwrap().unwrap();

        assert!(store.add("second").is_err());
        assert_eq!(store.size(), 1);
        assert_eq!(store.storage().writes(), 1);
    }

    #[test]
    fn test_toggle_flips_in_place() {
        let mut store = empty_store();
        store.add("a").unwrap();
        let b = store.add("b").unwrap().unwrap();
        store.add("c").unwrap();

        assert!(store.toggle(&b.id).unwrap());

        let toggled = &store.tasks()[1];
        assert_eq!(toggled.id, b.id);
        assert_eq!(toggled.text, "b");
        assert!(toggled.completed);
        assert_eq!(store.size(), 3);
        assert_eq!(texts(&store), vec!["a", "b", "c"]);
        assert_eq!(persisted(&store), store.tasks());

        assert!(store.toggle(&b.id).unwrap());
        assert!(!store.tasks()[1].completed);
    }

    #[test]
    fn test_toggle_unknown_is_noop() {
        let mut store = empty_store();
        store.add("a").unwrap();
        let before = store.tasks().to_vec();
        let writes = store.storage().writes();

        assert!(!store.toggle("missing").unwrap());
        assert_eq!(store.tasks(), before.as_slice());
        assert_eq!(store.storage().writes(), writes);
    }

    #[test]
    fn test_delete_removes_only_target() {
        let mut store = empty_store();
        store.add("a").unwrap();
        let b = store.add("b").unwrap().unwrap();
        store.add("c").unwrap();

        assert!(store.delete(&b.id).unwrap());

        assert_eq!(store.size(), 2);
        assert_eq!(texts(&store), vec!["a", "c"]);
        assert!(store.get(&b.id).is_none());
        assert_eq!(persisted(&store), store.tasks());
    }

    #[test]
    fn test_delete_unknown_is_noop() {
        let mut store = empty_store();
        store.add("a").unwrap();
        let before = store.tasks().to_vec();
        let writes = store.storage().writes();

        assert!(!store.delete("missing").unwrap());
        assert_eq!(store.tasks(), before.as_slice());
        assert_eq!(store.storage().writes(), writes);
    }

    #[test]
    fn test_completed_count_tracks_mutations() {
        let mut store = empty_store();
        let a = store.add("a").unwrap().unwrap();
        let b = store.add("b").unwrap().unwrap();
        let c = store.add("c").unwrap().unwrap();
        assert_eq!(store.completed_count(), 0);

        store.toggle(&a.id).unwrap();
        store.toggle(&c.id).unwrap();
        assert_eq!(store.completed_count(), 2);

        store.delete(&a.id).unwrap();
        assert_eq!(store.completed_count(), 1);

        store.toggle(&b.id).unwrap();
        store.toggle(&c.id).unwrap();
        assert_eq!(store.completed_count(), 1);

        let expected = store.tasks().iter().filter(|t| t.completed).count();
        assert_eq!(store.completed_count(), expected);
    }

    #[test]
    fn test_scenario_buy_milk_walk_dog() {
        let mut store = empty_store();
        let milk = store.add("Buy milk").unwrap().unwrap();
        store.add("Walk dog").unwrap();
        store.toggle(&milk.id).unwrap();

        assert_eq!(store.size(), 2);
        assert_eq!(store.completed_count(), 1);
        assert_eq!(texts(&store), vec!["Buy milk", "Walk dog"]);
        assert!(store.tasks()[0].completed);
        assert!(!store.tasks()[1].completed);
    }

    #[test]
    fn test_scenario_add_then_delete() {
        let mut store = empty_store();
        let task = store.add("Task A").unwrap().unwrap();
        store.delete(&task.id).unwrap();

        assert_eq!(store.size(), 0);
        assert_eq!(store.completed_count(), 0);
        assert!(store.is_empty());
        assert_eq!(persisted(&store), Vec::<Task>::new());
    }

    #[test]
    fn test_load_restores_persisted_order() {
        let mut store = empty_store();
        let a = store.add("a").unwrap().unwrap();
        store.add("b").unwrap();
        store.toggle(&a.id).unwrap();
        let expected = store.tasks().to_vec();

        let storage = store.storage().clone();
        let reopened = TaskListStore::open(storage, SequentialIds::new("other"));
        assert_eq!(reopened.tasks(), expected.as_slice());
    }

    #[test]
    fn test_load_non_array_blob_starts_empty() {
        let store = store_with_blob(r#"{"id":"x","text":"not a list"}"#);
        assert_eq!(store.size(), 0);
        assert_eq!(store.storage().writes(), 0);
    }

    #[test]
    fn test_load_garbage_blob_starts_empty() {
        let store = store_with_blob("this is not json");
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_missing_blob_starts_empty() {
        let store = empty_store();
        assert!(store.is_empty());
        assert_eq!(store.completed_count(), 0);
    }

    #[test]
    fn test_load_drops_duplicate_ids() {
        let blob = r#"[
            {"id":"x","text":"first","completed":false},
            {"id":"y","text":"other","completed":true},
            {"id":"x","text":"second","completed":true}
        ]"#;
        let store = store_with_blob(blob);

        assert_eq!(store.size(), 2);
        assert_eq!(store.get("x").unwrap().text, "first");
        assert_eq!(store.completed_count(), 1);
    }

    #[test]
    fn test_load_reads_configured_key() {
        let storage = MemoryBlobStorage::with_blob("work", r#"[{"id":"w","text":"report","completed":false}]"#);
        let mut store = TaskListStore::with_key(storage, SequentialIds::default(), "work");
        assert!(store.is_empty());

        store.load();
        assert_eq!(store.key(), "work");
        assert_eq!(texts(&store), vec!["report"]);
    }

    #[test]
    fn test_failed_write_leaves_state_unchanged() {
        let mut store = TaskListStore::open(BrokenStorage, SequentialIds::new("t"));
        assert_eq!(store.size(), 1);

        assert!(store.add("new").is_err());
        assert!(store.toggle("a").is_err());
        assert!(store.delete("a").is_err());

        assert_eq!(store.size(), 1);
        assert_eq!(store.tasks()[0].text, "kept");
        assert!(!store.tasks()[0].completed);
    }

    #[test]
    fn test_observers_see_committed_changes() {
        let seen: Rc<RefCell<Vec<(usize, usize)>>> = Rc::new(RefCell::new(Vec::new()));
        let mut store = empty_store();

        let sink = Rc::clone(&seen);
        store.subscribe(move |snapshot| {
            sink.borrow_mut().push((snapshot.total, snapshot.completed));
        });

        let a = store.add("a").unwrap().unwrap();
        store.add("   ").unwrap();
        store.toggle(&a.id).unwrap();
        store.toggle("missing").unwrap();
        store.delete(&a.id).unwrap();

        assert_eq!(*seen.borrow(), vec![(1, 0), (1, 1), (0, 0)]);
    }

    #[test]
    fn test_observer_notified_on_load() {
        let calls = Rc::new(RefCell::new(0));
        let mut store = store_with_blob(r#"[{"id":"x","text":"t","completed":true}]"#);

        let counter = Rc::clone(&calls);
        store.subscribe(move |snapshot| {
            assert_eq!(snapshot.completed, 1);
            *counter.borrow_mut() += 1;
        });

        store.load();
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let calls = Rc::new(RefCell::new(0));
        let mut store = empty_store();

        let counter = Rc::clone(&calls);
        let sub = store.subscribe(move |_| *counter.borrow_mut() += 1);

        store.add("a").unwrap();
        assert!(store.unsubscribe(sub));
        assert!(!store.unsubscribe(sub));
        store.add("b").unwrap();

        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn test_failed_write_does_not_notify() {
        let calls = Rc::new(RefCell::new(0));
        let mut store = TaskListStore::open(BrokenStorage, SequentialIds::new("t"));

        let counter = Rc::clone(&calls);
        store.subscribe(move |_| *counter.borrow_mut() += 1);

        assert!(store.add("x").is_err());
        assert_eq!(*calls.borrow(), 0);
    }

    #[test]
    fn test_snapshot_counts() {
        let mut store = empty_store();
        let a = store.add("a").unwrap().unwrap();
        store.add("b").unwrap();
        store.toggle(&a.id).unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.total, 2);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.tasks, store.tasks());
    }
}
