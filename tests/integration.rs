//! Integration tests for the controller pipeline.

use parking_lot::Mutex;
use reconcile::{
    ActionOutcome, ArraySource, CellConfiguration, ChildrenProvider, Completion, Composition, Controller,
    ControllerConfig, DataItem, DataSource, ExpansionState, IndexPath, ItemRef, ItemType,
    ModelUpdate, ProviderRegistry, Record, Reference, RenderSurface, Section, SectionId,
    SectionProvider, SelectionInteraction, SourceRef, UpdateContext,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Surface that records everything it is asked to do.
#[derive(Default)]
struct RecordingSurface {
    updates: Mutex<Vec<ModelUpdate>>,
    selected: Mutex<Vec<ItemRef>>,
    highlighted: Mutex<Vec<ItemRef>>,
    unhighlights: AtomicUsize,
    /// Hold on to apply completions instead of finishing right away.
    hold: AtomicBool,
    held: Mutex<Vec<Completion>>,
}

impl RecordingSurface {
    fn update_count(&self) -> usize {
        self.updates.lock().len()
    }

    fn last_update(&self) -> ModelUpdate {
        self.updates.lock().last().cloned().unwrap()
    }

    fn release(&self) {
        let held: Vec<Completion> = self.held.lock().drain(..).collect();
        for completion in held {
            completion();
        }
    }
}

impl RenderSurface for RecordingSurface {
    type Cell = String;

    fn apply_snapshot(&self, update: &ModelUpdate, _animated: bool, completion: Completion) {
        self.updates.lock().push(update.clone());
        if self.hold.load(Ordering::SeqCst) {
            self.held.lock().push(completion);
        } else {
            completion();
        }
    }

    fn select_item(&self, item: &ItemRef, _position: IndexPath, _animated: bool, completion: Completion) {
        self.selected.lock().push(item.clone());
        completion();
    }

    fn set_highlighted(&self, item: &ItemRef, _position: IndexPath, highlighted: bool, completion: Completion) {
        if highlighted {
            self.highlighted.lock().push(item.clone());
        }
        completion();
    }

    fn unhighlight_all(&self, completion: Completion) {
        self.unhighlights.fetch_add(1, Ordering::SeqCst);
        completion();
    }
}

#[derive(Debug)]
struct Folder {
    name: &'static str,
    children: Arc<ArraySource>,
}

impl DataItem for Folder {
    fn reference(&self) -> Reference {
        Reference::new(self.name)
    }

    fn item_type(&self) -> ItemType {
        ItemType::new("folder")
    }

    fn as_children(&self) -> Option<&dyn ChildrenProvider> {
        Some(self)
    }
}

impl ChildrenProvider for Folder {
    fn has_children(&self, _parent_source: &SourceRef) -> bool {
        !self.children.is_empty()
    }

    fn children_data_source(&self, _parent_source: &SourceRef) -> Option<SourceRef> {
        Some(self.children.clone())
    }
}

#[derive(Debug)]
struct Doc {
    name: &'static str,
    locked: bool,
}

impl DataItem for Doc {
    fn reference(&self) -> Reference {
        Reference::new(self.name)
    }

    fn item_type(&self) -> ItemType {
        ItemType::new("doc")
    }

    fn as_selectable(&self) -> Option<&dyn SelectionInteraction> {
        Some(self)
    }
}

impl SelectionInteraction for Doc {
    fn allow_selection(&self) -> bool {
        !self.locked
    }
}

/// Item of a sections source; each one stands for a section over `items`.
#[derive(Debug)]
struct Shelf {
    name: &'static str,
    items: Arc<ArraySource>,
}

impl DataItem for Shelf {
    fn reference(&self) -> Reference {
        Reference::new(self.name)
    }

    fn item_type(&self) -> ItemType {
        ItemType::new("shelf")
    }

    fn as_section_provider(&self) -> Option<&dyn SectionProvider> {
        Some(self)
    }
}

impl SectionProvider for Shelf {
    fn make_section(&self) -> reconcile::Result<Section> {
        Section::new(self.name, self.items.clone())
    }
}

fn shelf(name: &'static str, items: &[&'static str]) -> (Record, Arc<ArraySource>) {
    let source = ArraySource::new(items.iter().copied());
    let record = Record::from_item(Arc::new(Shelf {
        name,
        items: Arc::clone(&source),
    }));
    (record, source)
}

fn folder(name: &'static str, children: Vec<Record>) -> (Record, Arc<ArraySource>) {
    let source = ArraySource::with_records(children);
    let record = Record::from_item(Arc::new(Folder {
        name,
        children: Arc::clone(&source),
    }));
    (record, source)
}

fn doc(name: &'static str, locked: bool) -> Record {
    Record::from_item(Arc::new(Doc { name, locked }))
}

struct Harness {
    context: UpdateContext,
    surface: Arc<RecordingSurface>,
    controller: Controller<RecordingSurface>,
}

impl Harness {
    fn new(config: ControllerConfig) -> Self {
        // Log output shows up with --nocapture
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let registry: Arc<ProviderRegistry<String>> = Arc::new(ProviderRegistry::new());
        registry.register(ItemType::PRESENTABLE, |c: &CellConfiguration| {
            let state = if c.is_placeholder() { "placeholder" } else { "ready" };
            format!("{}:{}", c.item.reference(), state)
        });

        let context = UpdateContext::new();
        let surface = Arc::new(RecordingSurface::default());
        let controller = Controller::new(config, context.clone(), Arc::clone(&surface), registry);
        Self {
            context,
            surface,
            controller,
        }
    }

    fn pump(&self) {
        self.context.run_pending();
    }

    fn items(&self, section: &str) -> Vec<String> {
        self.controller
            .model()
            .items_in(&section_id(section))
            .iter()
            .map(|item| item.reference().to_string())
            .collect()
    }

    /// Run an action and return its outcome.
    fn act(&self, run: impl FnOnce(&Controller<RecordingSurface>, Box<dyn FnOnce(ActionOutcome) + Send>)) -> ActionOutcome {
        let outcome = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&outcome);
        run(&self.controller, Box::new(move |result: ActionOutcome| *sink.lock() = Some(result)));
        self.pump();
        let result = outcome.lock().take();
        result.expect("completion fired")
    }
}

fn section_id(id: &str) -> SectionId {
    SectionId::new(id).unwrap()
}

// --- Update pipeline ---

#[test]
fn test_sections_flow_into_model() {
    let harness = Harness::new(ControllerConfig::default());
    let files = ArraySource::new(["f1", "f2"]);
    let shares = ArraySource::new(["s1"]);

    harness
        .controller
        .add_sections(vec![
            Section::new("files", files.clone()).unwrap(),
            Section::new("shares", shares.clone()).unwrap(),
        ])
        .unwrap();
    harness.pump();

    assert_eq!(harness.surface.update_count(), 1);
    let first = harness.surface.last_update();
    assert_eq!(first.diff.inserted_sections, vec![section_id("files"), section_id("shares")]);
    assert_eq!(harness.items("files"), vec!["f1", "f2"]);
    assert_eq!(harness.items("shares"), vec!["s1"]);

    files.push("f3");
    harness.pump();
    let second = harness.surface.last_update();
    assert_eq!(second.diff.inserted_items, vec![ItemRef::plain("f3")]);
    assert_eq!(second.old, first.new);

    files.mark_updated([Reference::new("f1")]);
    harness.pump();
    let third = harness.surface.last_update();
    assert_eq!(third.diff.reconfigured_items, vec![ItemRef::plain("f1")]);
    assert!(third.diff.inserted_items.is_empty());
}

#[test]
fn test_rapid_notifications_coalesce() {
    let harness = Harness::new(ControllerConfig::default());
    let files = ArraySource::new(["f1"]);
    harness
        .controller
        .add_sections(vec![Section::new("files", files.clone()).unwrap()])
        .unwrap();
    harness.pump();

    files.push("f2");
    files.push("f3");
    files.remove(&Reference::new("f1"));
    harness.pump();

    assert_eq!(harness.surface.update_count(), 2);
    let update = harness.surface.last_update();
    assert_eq!(update.diff.inserted_items.len(), 2);
    assert_eq!(update.diff.deleted_items, vec![ItemRef::plain("f1")]);
    assert_eq!(harness.items("files"), vec!["f2", "f3"]);
}

#[test]
fn test_updates_are_queued_not_interleaved() {
    let harness = Harness::new(ControllerConfig::default());
    let files = ArraySource::new(["f1"]);
    harness
        .controller
        .add_sections(vec![Section::new("files", files.clone()).unwrap()])
        .unwrap();
    harness.pump();

    harness.surface.hold.store(true, Ordering::SeqCst);
    files.push("f2");
    harness.pump();
    assert_eq!(harness.surface.update_count(), 2);

    // The surface has not finished: the next cycle must wait
    files.push("f3");
    harness.pump();
    assert_eq!(harness.surface.update_count(), 2);

    harness.surface.hold.store(false, Ordering::SeqCst);
    harness.surface.release();
    harness.pump();

    assert_eq!(harness.surface.update_count(), 3);
    let updates = harness.surface.updates.lock();
    assert_eq!(updates[2].old, updates[1].new);
    assert_eq!(updates[2].diff.inserted_items, vec![ItemRef::plain("f3")]);
}

#[test]
fn test_composition_toggle_through_controller() {
    let harness = Harness::new(ControllerConfig::default());
    let s1: SourceRef = ArraySource::new(["a", "b"]);
    let s2: SourceRef = ArraySource::new(["c", "d"]);
    let composition = Composition::with_sources(vec![Arc::clone(&s1), Arc::clone(&s2)]);

    harness
        .controller
        .add_sections(vec![Section::new("all", composition.clone()).unwrap()])
        .unwrap();
    harness.pump();
    assert_eq!(harness.items("all"), vec!["a", "b", "c", "d"]);

    composition.set_include(false, &s2);
    harness.pump();
    assert_eq!(harness.items("all"), vec!["a", "b"]);

    composition.set_include(true, &s2);
    harness.pump();
    assert_eq!(harness.items("all"), vec!["a", "b", "c", "d"]);
}

#[test]
fn test_wrapped_identifiers_keep_sections_apart() {
    let wrapped = Harness::new(ControllerConfig {
        use_wrapped_identifiers: true,
        ..ControllerConfig::default()
    });
    let shared: SourceRef = ArraySource::new(["x"]);
    wrapped
        .controller
        .add_sections(vec![
            Section::new("one", Arc::clone(&shared)).unwrap(),
            Section::new("two", Arc::clone(&shared)).unwrap(),
        ])
        .unwrap();
    wrapped.pump();
    assert_eq!(wrapped.controller.model().item_count(), 2);

    let plain = Harness::new(ControllerConfig::default());
    plain
        .controller
        .add_sections(vec![
            Section::new("one", Arc::clone(&shared)).unwrap(),
            Section::new("two", shared).unwrap(),
        ])
        .unwrap();
    plain.pump();
    assert_eq!(plain.controller.model().item_count(), 1);
    assert!(plain.items("two").is_empty());
}

// --- Sections ---

#[test]
fn test_hidden_and_removed_sections() {
    let harness = Harness::new(ControllerConfig::default());
    let files = ArraySource::new(["f1"]);
    let shares = ArraySource::new(["s1"]);
    harness
        .controller
        .add_sections(vec![
            Section::new("files", files.clone()).unwrap(),
            Section::new("shares", shares.clone()).unwrap().with_hidden(true),
        ])
        .unwrap();
    harness.pump();

    assert_eq!(harness.controller.index_of(&section_id("shares")), None);
    assert_eq!(harness.controller.section_at(0), Some(section_id("files")));
    assert_eq!(harness.controller.section_ids().len(), 2);

    harness.controller.set_section_hidden(&section_id("shares"), false).unwrap();
    harness.pump();
    assert_eq!(harness.controller.index_of(&section_id("shares")), Some(1));

    assert_eq!(files.subscriptions().subscription_count(), 1);
    assert_eq!(harness.controller.remove_sections(&[section_id("files")]), 1);
    assert_eq!(files.subscriptions().subscription_count(), 0);
    harness.pump();

    let update = harness.surface.last_update();
    assert_eq!(update.diff.deleted_sections, vec![section_id("files")]);
    assert_eq!(harness.controller.section_at(0), Some(section_id("shares")));
}

#[test]
fn test_insert_sections_at_position() {
    let harness = Harness::new(ControllerConfig::default());
    harness
        .controller
        .add_sections(vec![
            Section::new("first", ArraySource::new(["a"])).unwrap(),
            Section::new("last", ArraySource::new(["c"])).unwrap(),
        ])
        .unwrap();
    harness
        .controller
        .insert_sections(vec![Section::new("middle", ArraySource::new(["b"])).unwrap()], 1)
        .unwrap();
    harness.pump();

    assert_eq!(
        harness.controller.model().section_ids(),
        vec![section_id("first"), section_id("middle"), section_id("last")]
    );
}

#[test]
fn test_update_sections_batches_changes() {
    let harness = Harness::new(ControllerConfig::default());
    harness
        .controller
        .add_sections(vec![
            Section::new("a", ArraySource::new(["1"])).unwrap(),
            Section::new("b", ArraySource::new(["2"])).unwrap(),
        ])
        .unwrap();
    harness.pump();

    let replacement = ArraySource::new(["3", "4"]);
    harness.controller.update_sections(
        |sections| {
            sections[0].set_hidden(true);
            sections[1].set_data_source(replacement.clone());
        },
        false,
    );
    harness.pump();

    assert_eq!(harness.surface.update_count(), 2);
    assert_eq!(harness.controller.model().section_ids(), vec![section_id("b")]);
    assert_eq!(harness.items("b"), vec!["3", "4"]);
}

#[test]
fn test_reload_reconfigures_section() {
    let harness = Harness::new(ControllerConfig::default());
    harness
        .controller
        .add_sections(vec![Section::new("files", ArraySource::new(["f1", "f2"])).unwrap()])
        .unwrap();
    harness.pump();

    harness.controller.reload_sections(&[section_id("files")]);
    harness.pump();

    let update = harness.surface.last_update();
    assert_eq!(
        update.diff.reconfigured_items,
        vec![ItemRef::plain("f1"), ItemRef::plain("f2")]
    );
}

#[test]
fn test_content_listeners_see_each_update() {
    let harness = Harness::new(ControllerConfig::default());
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    harness
        .controller
        .on_content_update(move |model| {
            counter.store(model.item_count(), Ordering::SeqCst);
        });

    let files = ArraySource::new(["f1"]);
    harness
        .controller
        .add_sections(vec![Section::new("files", files.clone()).unwrap()])
        .unwrap();
    harness.pump();
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    files.push("f2");
    harness.pump();
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

// --- Hierarchy ---

#[test]
fn test_expand_and_cascading_collapse() {
    let harness = Harness::new(ControllerConfig::hierarchical());
    let (c, c_children) = folder("c", vec!["leaf".into()]);
    let (b, b_children) = folder("b", vec![c]);
    let (a, a_children) = folder("a", vec![b]);
    harness
        .controller
        .add_sections(vec![Section::new("tree", ArraySource::with_records([a])).unwrap()])
        .unwrap();
    harness.pump();

    let tree = section_id("tree");
    let item = |name: &str| harness.controller.wrap(&Reference::new(name), &tree);

    for name in ["a", "b", "c"] {
        let target = item(name);
        let outcome = harness.act(|controller, done| controller.expand(vec![target], true, done));
        assert!(outcome.is_applied(), "expanding {name}: {outcome:?}");
    }
    assert_eq!(harness.items("tree"), vec!["a", "b", "c", "leaf"]);
    assert_eq!(
        harness
            .controller
            .with_section(&tree, |section| section.child_subscription_count())
            .unwrap(),
        3
    );

    let outcome = harness.act(|controller, done| controller.collapse(vec![item("a")], true, done));
    assert!(outcome.is_applied());
    assert_eq!(harness.items("tree"), vec!["a"]);
    assert_eq!(harness.controller.model().item_count(), 1);

    let state = harness
        .controller
        .with_section(&tree, |section| {
            (section.child_subscription_count(), section.expansion_state(&item("b")))
        })
        .unwrap();
    assert_eq!(state, (0, ExpansionState::Collapsed));
    for source in [&a_children, &b_children, &c_children] {
        assert_eq!(source.subscriptions().subscription_count(), 0);
    }
}

#[test]
fn test_expand_is_idempotent_through_actions() {
    let harness = Harness::new(ControllerConfig::hierarchical());
    let (docs, docs_children) = folder("docs", vec!["readme".into(), "notes".into()]);
    harness
        .controller
        .add_sections(vec![Section::new("files", ArraySource::with_records([docs])).unwrap()])
        .unwrap();
    harness.pump();

    let target = harness.controller.wrap(&Reference::new("docs"), &section_id("files"));
    let first = harness.act(|controller, done| controller.expand(vec![target.clone()], false, done));
    assert!(first.is_applied());
    let updates = harness.surface.update_count();

    let second = harness.act(|controller, done| controller.expand(vec![target.clone()], false, done));
    assert_eq!(second, ActionOutcome::Declined);
    assert_eq!(harness.surface.update_count(), updates);
    assert_eq!(docs_children.subscriptions().subscription_count(), 1);
    assert_eq!(harness.items("files"), vec!["docs", "readme", "notes"]);

    let collapsed = harness.act(|controller, done| controller.collapse(vec![target.clone()], false, done));
    assert!(collapsed.is_applied());
    let again = harness.act(|controller, done| controller.collapse(vec![target.clone()], false, done));
    assert_eq!(again, ActionOutcome::Declined);
}

#[test]
fn test_child_source_changes_nest_under_parent() {
    let harness = Harness::new(ControllerConfig::hierarchical());
    let (docs, docs_children) = folder("docs", vec!["a.txt".into()]);
    harness
        .controller
        .add_sections(vec![Section::new("files", ArraySource::with_records([docs, "z".into()])).unwrap()])
        .unwrap();
    harness.pump();

    let files = section_id("files");
    let target = harness.controller.wrap(&Reference::new("docs"), &files);
    harness.act(|controller, done| controller.expand(vec![target.clone()], false, done));

    docs_children.push("b.txt");
    harness.pump();

    assert_eq!(harness.items("files"), vec!["docs", "a.txt", "b.txt", "z"]);
    let b = harness.controller.wrap(&Reference::new("b.txt"), &files);
    let model = harness.controller.model();
    assert_eq!(model.section(&files).unwrap().parent(&b), Some(&target));
    assert_eq!(harness.surface.last_update().diff.inserted_items, vec![b]);
}

#[test]
fn test_item_moved_up_a_folder_stays_in_model() {
    let harness = Harness::new(ControllerConfig::hierarchical());
    let (docs, docs_children) = folder("docs", vec!["a".into()]);
    let root = ArraySource::with_records([docs]);
    harness
        .controller
        .add_sections(vec![Section::new("files", root.clone()).unwrap()])
        .unwrap();
    harness.pump();

    let files = section_id("files");
    let target = harness.controller.wrap(&Reference::new("docs"), &files);
    harness.act(|controller, done| controller.expand(vec![target], false, done));
    assert_eq!(harness.items("files"), vec!["docs", "a"]);

    docs_children.remove(&Reference::new("a"));
    root.push("a");
    harness.pump();

    assert_eq!(harness.items("files"), vec!["docs", "a"]);
    let a = harness.controller.wrap(&Reference::new("a"), &files);
    let model = harness.controller.model();
    assert_eq!(model.section(&files).unwrap().parent(&a), None);
    assert_eq!(harness.surface.last_update().diff.moved_items, vec![a]);
    assert_eq!(harness.controller.insertion_metrics().abandoned, 0);
}

#[test]
fn test_unanchored_item_retries_then_is_abandoned() {
    let config = ControllerConfig {
        max_insertion_retries: 2,
        ..ControllerConfig::hierarchical()
    };
    let harness = Harness::new(config);
    let (docs, docs_children) = folder("docs", vec!["a".into()]);
    let root = ArraySource::with_records([docs]);
    harness
        .controller
        .add_sections(vec![Section::new("files", root.clone()).unwrap()])
        .unwrap();
    harness.pump();

    let files = section_id("files");
    let target = harness.controller.wrap(&Reference::new("docs"), &files);
    harness.act(|controller, done| controller.expand(vec![target.clone()], false, done));

    // Both levels hold "a", so it stays under docs and "b" finds no
    // root-level neighbour to anchor on
    let before = harness.controller.insertion_metrics();
    root.push("a");
    root.push("b");
    harness.pump();

    let after = harness.controller.insertion_metrics();
    assert_eq!(after.cycles - before.cycles, 3);
    assert_eq!(after.deferred, 2);
    assert_eq!(after.abandoned, 1);
    assert_eq!(harness.items("files"), vec!["docs", "a"]);

    // Unrelated changes retry quietly without counting it again
    root.mark_updated([Reference::new("docs")]);
    harness.pump();
    let quiet = harness.controller.insertion_metrics();
    assert_eq!((quiet.deferred, quiet.abandoned), (2, 1));
    assert_eq!(harness.items("files"), vec!["docs", "a"]);

    // Once docs lets go of "a", both land at the root
    docs_children.remove(&Reference::new("a"));
    harness.pump();
    assert_eq!(harness.items("files"), vec!["docs", "a", "b"]);
    let b = harness.controller.wrap(&Reference::new("b"), &files);
    assert_eq!(harness.controller.model().section(&files).unwrap().parent(&b), None);
    assert_eq!(harness.controller.insertion_metrics().abandoned, 1);
}

#[test]
fn test_expand_requires_hierarchical_controller() {
    let harness = Harness::new(ControllerConfig::default());
    let (docs, _) = folder("docs", vec!["readme".into()]);
    harness
        .controller
        .add_sections(vec![Section::new("files", ArraySource::with_records([docs])).unwrap()])
        .unwrap();
    harness.pump();

    let outcome = harness.act(|controller, done| controller.expand(vec![ItemRef::plain("docs")], false, done));
    assert_eq!(outcome, ActionOutcome::Declined);
}

// --- Actions ---

#[test]
fn test_actions_use_first_present_target() {
    let harness = Harness::new(ControllerConfig::default());
    harness
        .controller
        .add_sections(vec![Section::new("files", ArraySource::with_records([doc("d1", false), doc("d2", false)])).unwrap()])
        .unwrap();
    harness.pump();

    let outcome = harness.act(|controller, done| {
        controller.select(vec![ItemRef::plain("gone"), ItemRef::plain("d2")], true, done)
    });
    assert_eq!(
        outcome,
        ActionOutcome::Applied {
            item: ItemRef::plain("d2"),
            position: IndexPath::new(0, 1),
        }
    );
    assert_eq!(*harness.surface.selected.lock(), vec![ItemRef::plain("d2")]);

    let outcome = harness.act(|controller, done| controller.highlight(vec![ItemRef::plain("d1")], done));
    assert!(outcome.is_applied());
    assert_eq!(*harness.surface.highlighted.lock(), vec![ItemRef::plain("d1")]);

    let outcome = harness.act(|controller, done| controller.unhighlight_all(done));
    assert_eq!(outcome, ActionOutcome::Completed);
    assert_eq!(harness.surface.unhighlights.load(Ordering::SeqCst), 1);
}

#[test]
fn test_action_without_target_still_completes() {
    let harness = Harness::new(ControllerConfig::default());
    harness
        .controller
        .add_sections(vec![Section::new("files", ArraySource::new(["f1"])).unwrap()])
        .unwrap();
    harness.pump();

    let outcome = harness.act(|controller, done| controller.select(vec![ItemRef::plain("missing")], true, done));
    assert_eq!(outcome, ActionOutcome::NoTarget);
    assert!(harness.surface.selected.lock().is_empty());
}

#[test]
fn test_locked_item_declines_selection() {
    let harness = Harness::new(ControllerConfig::default());
    harness
        .controller
        .add_sections(vec![Section::new("files", ArraySource::with_records([doc("secret", true)])).unwrap()])
        .unwrap();
    harness.pump();

    let outcome = harness.act(|controller, done| controller.select(vec![ItemRef::plain("secret")], true, done));
    assert_eq!(outcome, ActionOutcome::Declined);
    assert!(harness.surface.selected.lock().is_empty());
}

#[test]
fn test_actions_chain_in_order() {
    let harness = Harness::new(ControllerConfig::default());
    harness
        .controller
        .add_sections(vec![Section::new("files", ArraySource::with_records([doc("d1", false)])).unwrap()])
        .unwrap();
    harness.pump();

    let log = Arc::new(Mutex::new(Vec::new()));
    for step in 0..3 {
        let log = Arc::clone(&log);
        harness
            .controller
            .select(vec![ItemRef::plain("d1")], false, move |_| log.lock().push(step));
    }
    harness.pump();

    assert_eq!(*log.lock(), vec![0, 1, 2]);
}

#[test]
fn test_initial_highlight_once_item_appears() {
    let harness = Harness::new(ControllerConfig {
        initial_highlight: Some(Reference::new("late")),
        ..ControllerConfig::default()
    });
    let files = ArraySource::new(["f1"]);
    harness
        .controller
        .add_sections(vec![Section::new("files", files.clone()).unwrap()])
        .unwrap();
    harness.pump();
    assert!(harness.surface.highlighted.lock().is_empty());

    files.push("late");
    harness.pump();
    files.push("later");
    harness.pump();

    assert_eq!(*harness.surface.highlighted.lock(), vec![ItemRef::plain("late")]);
}

// --- Cells and records ---

#[test]
fn test_placeholder_cell_reconfigures_when_resolved() {
    let harness = Harness::new(ControllerConfig::default());
    let files = ArraySource::new(["f1"]);
    harness
        .controller
        .add_sections(vec![Section::new("files", files.clone()).unwrap()])
        .unwrap();
    harness.pump();

    let path = IndexPath::new(0, 0);
    assert_eq!(harness.controller.provide_cell(path).unwrap(), "f1:placeholder");

    files
        .resolve(&Reference::new("f1"), Arc::new(Doc { name: "f1", locked: false }))
        .unwrap();
    harness.pump();

    assert_eq!(
        harness.surface.last_update().diff.reconfigured_items,
        vec![ItemRef::plain("f1")]
    );
    assert_eq!(harness.controller.provide_cell(path).unwrap(), "f1:ready");
}

#[test]
fn test_retrieve_record_at_index_path() {
    let harness = Harness::new(ControllerConfig::default());
    harness
        .controller
        .add_sections(vec![Section::new("files", ArraySource::with_records([doc("d1", false)])).unwrap()])
        .unwrap();
    harness.pump();

    let found = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&found);
    harness
        .controller
        .retrieve_record(IndexPath::new(0, 0), move |record| {
            *sink.lock() = Some(record.map(|record| record.item_type));
        });

    let result = found.lock().take().unwrap();
    assert_eq!(result.unwrap(), ItemType::new("doc"));
}

#[test]
fn test_pending_record_retrieval_completes_on_replace() {
    let harness = Harness::new(ControllerConfig::default());
    let files = ArraySource::new(["a", "b"]);
    harness
        .controller
        .add_sections(vec![Section::new("files", files.clone()).unwrap()])
        .unwrap();
    harness.pump();

    let results = Arc::new(Mutex::new(Vec::new()));
    for row in 0..2 {
        let sink = Arc::clone(&results);
        harness
            .controller
            .retrieve_record(IndexPath::new(0, row), move |record| {
                sink.lock().push(record.map(|record| record.reference.to_string()));
            });
    }
    assert!(results.lock().is_empty());

    // "a" arrives resolved through a wholesale replace
    files.set_records([doc("a", false), "b".into()]);
    assert_eq!(results.lock().len(), 1);
    assert_eq!(results.lock()[0].as_ref().unwrap(), "a");

    // "b" goes away before it ever resolves
    files.remove(&Reference::new("b"));
    assert!(matches!(
        results.lock()[1],
        Err(reconcile::ReconcileError::RecordNotFound(_))
    ));
    assert_eq!(files.pending_retrievals(), 0);
}

#[test]
fn test_shutdown_releases_sources() {
    let files = ArraySource::new(["f1"]);
    {
        let harness = Harness::new(ControllerConfig::default());
        harness
            .controller
            .add_sections(vec![Section::new("files", files.clone()).unwrap()])
            .unwrap();
        harness.pump();
        assert_eq!(files.subscriptions().subscription_count(), 1);

        harness.controller.shutdown();
        harness.controller.shutdown();
        assert!(harness.controller.is_shut_down());
        assert_eq!(files.subscriptions().subscription_count(), 0);

        files.push("f2");
        harness.pump();
        assert_eq!(harness.surface.update_count(), 1);
    }

    let files_ref: SourceRef = files.clone();
    let harness = Harness::new(ControllerConfig::default());
    harness
        .controller
        .add_sections(vec![Section::new("files", files_ref).unwrap()])
        .unwrap();
    drop(harness);
    assert_eq!(files.subscriptions().subscription_count(), 0);
}

// --- Sections source ---

#[test]
fn test_sections_follow_sections_source() {
    let harness = Harness::new(ControllerConfig::default());
    let manual = ArraySource::new(["m1"]);
    harness
        .controller
        .add_sections(vec![Section::new("manual", manual.clone()).unwrap()])
        .unwrap();
    harness.pump();

    let (files_record, files) = shelf("files", &["f1", "f2"]);
    let (shares_record, shares) = shelf("shares", &["s1"]);
    let shelves = ArraySource::with_records([files_record, doc("stray", false), shares_record.clone()]);
    harness.controller.set_sections_source(Some(shelves.clone()));
    harness.pump();

    // Only items that provide a section count; the manual one is replaced
    assert_eq!(harness.controller.section_ids(), vec![section_id("files"), section_id("shares")]);
    assert_eq!(harness.items("files"), vec!["f1", "f2"]);
    assert_eq!(harness.items("shares"), vec!["s1"]);
    assert_eq!(manual.subscriptions().subscription_count(), 0);

    // Reordering keeps the existing sections attached
    shelves.insert(0, shares_record);
    harness.pump();
    assert_eq!(harness.controller.section_ids(), vec![section_id("shares"), section_id("files")]);
    assert_eq!(files.subscriptions().subscription_count(), 1);
    assert_eq!(harness.controller.index_of(&section_id("shares")), Some(0));

    shelves.remove(&Reference::new("shares"));
    harness.pump();
    assert_eq!(harness.controller.section_ids(), vec![section_id("files")]);
    assert_eq!(shares.subscriptions().subscription_count(), 0);

    let (photos_record, _photos) = shelf("photos", &["p1"]);
    shelves.push(photos_record);
    harness.pump();
    assert_eq!(harness.controller.section_ids(), vec![section_id("files"), section_id("photos")]);
    assert_eq!(harness.items("photos"), vec!["p1"]);
}

#[test]
fn test_clearing_sections_source_keeps_sections() {
    let harness = Harness::new(ControllerConfig::default());
    let (files_record, files) = shelf("files", &["f1"]);
    let shelves = ArraySource::with_records([files_record]);
    harness.controller.set_sections_source(Some(shelves.clone()));
    harness.pump();
    assert_eq!(shelves.subscriptions().subscription_count(), 1);

    harness.controller.set_sections_source(None);
    assert_eq!(shelves.subscriptions().subscription_count(), 0);

    let (other_record, _other) = shelf("other", &["o1"]);
    shelves.push(other_record);
    harness.pump();
    assert_eq!(harness.controller.section_ids(), vec![section_id("files")]);

    // The section still follows its own source
    files.push("f2");
    harness.pump();
    assert_eq!(harness.items("files"), vec!["f1", "f2"]);

    harness.controller.shutdown();
    assert_eq!(files.subscriptions().subscription_count(), 0);
}

#[test]
fn test_shutdown_releases_sections_source() {
    let (files_record, _files) = shelf("files", &["f1"]);
    let shelves = ArraySource::with_records([files_record]);
    let harness = Harness::new(ControllerConfig::default());
    harness.controller.set_sections_source(Some(shelves.clone()));
    harness.pump();

    harness.controller.shutdown();
    assert_eq!(shelves.subscriptions().subscription_count(), 0);
}

#[test]
fn test_retrieve_index_paths_skips_absent_items() {
    let harness = Harness::new(ControllerConfig::default());
    harness
        .controller
        .add_sections(vec![
            Section::new("files", ArraySource::new(["f1", "f2"])).unwrap(),
            Section::new("shares", ArraySource::new(["s1"])).unwrap(),
        ])
        .unwrap();
    harness.pump();

    let paths = harness.controller.retrieve_index_paths(&[
        ItemRef::plain("s1"),
        ItemRef::plain("missing"),
        ItemRef::plain("f2"),
    ]);
    assert_eq!(paths, vec![IndexPath::new(1, 0), IndexPath::new(0, 1)]);
    assert!(harness.controller.retrieve_index_paths(&[]).is_empty());
}
