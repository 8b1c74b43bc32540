//! End-to-end tests driving `SourceIndexer` with the tree-sitter C++ provider
//! over an on-disk workspace.

use ccindex::{
    EntryQuery, EntryType, IndexDelta, IndexDeltaKind, LimitTo, NamePattern, QualifiedName,
    ResourceDelta, Settings, SourceIndexer, WorkerState,
};
use ccindex::{DeltaKind, IndexChangeListener, ResourceKind};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

const IDLE: Duration = Duration::from_secs(30);

const SHAPE_H: &str = r#"#pragma once
namespace geo {
class Canvas;
class Shape {
public:
    int id;
};
}
"#;

const CIRCLE_CPP: &str = r#"#include "shape.h"
namespace geo {
class Circle : public Shape {
    friend class Canvas;
public:
    double radius;
};
}
"#;

const MAIN_CPP: &str = r#"#include "shape.h"
int main() {
    geo::Shape* shape = nullptr;
    return 0;
}
"#;

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    settings: Settings,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let src = root.join("app/src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("shape.h"), SHAPE_H).unwrap();
        fs::write(src.join("circle.cpp"), CIRCLE_CPP).unwrap();
        fs::write(src.join("main.cpp"), MAIN_CPP).unwrap();

        let mut settings = Settings::default();
        settings.workspace_root = Some(root.clone());
        settings.index_path = root.join(".ccindex/index");
        settings.indexing.retry_delay_ms = 10;

        Self {
            _dir: dir,
            root,
            settings,
        }
    }

    fn project(&self) -> PathBuf {
        self.root.join("app")
    }

    fn src(&self, name: &str) -> PathBuf {
        self.root.join("app/src").join(name)
    }

    fn indexer(&self) -> SourceIndexer {
        let indexer = SourceIndexer::with_cpp_parser(&self.settings).unwrap();
        indexer.start().unwrap();
        indexer
    }

    fn indexed(&self) -> SourceIndexer {
        let indexer = self.indexer();
        assert!(indexer.index_all(&self.project()));
        assert!(indexer.wait_until_idle(IDLE));
        indexer
    }

    fn index_files(&self) -> Vec<PathBuf> {
        fs::read_dir(self.settings.resolved_index_path())
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "index"))
            .collect()
    }
}

fn qn(text: &str) -> QualifiedName {
    QualifiedName::parse(text)
}

fn touch_later(path: &Path) {
    let file = fs::OpenOptions::new().write(true).open(path).unwrap();
    let later = SystemTime::now() + Duration::from_secs(120);
    file.set_modified(later).unwrap();
}

fn has_class(indexer: &SourceIndexer, project: &Path, name: &str) -> bool {
    let query = EntryQuery::named(name)
        .with_type(EntryType::Class)
        .with_limit_to(LimitTo::Declaration);
    !indexer.query_entries(project, &query).is_empty()
}

fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + IDLE;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn test_index_all_records_declarations_and_hierarchy() {
    let fx = Fixture::new();
    let indexer = fx.indexed();
    let project = fx.project();

    let shape = indexer.query_entries(
        &project,
        &EntryQuery::named("geo::Shape")
            .with_type(EntryType::Class)
            .with_limit_to(LimitTo::Declaration),
    );
    assert_eq!(shape.len(), 1, "header declaration stored once: {shape:?}");
    assert_eq!(shape[0].path, Path::new("app/src/shape.h"));

    assert!(has_class(&indexer, &project, "geo::Circle"));
    assert_eq!(indexer.derived_classes(&project, &qn("geo::Shape")), vec![qn("geo::Circle")]);
    assert_eq!(indexer.friends_of(&project, &qn("geo::Circle")), vec![qn("geo::Canvas")]);

    let forward = indexer.query_entries(
        &project,
        &EntryQuery::named("geo::Canvas").with_type(EntryType::FwdClass),
    );
    assert!(!forward.is_empty());

    let references = indexer.query_entries(
        &project,
        &EntryQuery::named("geo::Shape").with_limit_to(LimitTo::Reference),
    );
    assert!(references.iter().any(|m| m.path == Path::new("app/src/main.cpp")));

    let in_geo = indexer.query_entries(
        &project,
        &EntryQuery::new()
            .with_pattern(NamePattern::Prefix(qn("geo")))
            .with_type(EntryType::Field),
    );
    let fields: Vec<String> = in_geo.iter().map(|m| m.entry.name.to_string()).collect();
    assert!(fields.contains(&"geo::Shape::id".to_string()));
    assert!(fields.contains(&"geo::Circle::radius".to_string()));

    let stored: Vec<PathBuf> = indexer.indexed_files(&project).into_iter().map(|r| r.path).collect();
    for expected in ["app/src/circle.cpp", "app/src/main.cpp", "app/src/shape.h"] {
        assert!(stored.contains(&PathBuf::from(expected)), "{expected} missing from {stored:?}");
    }
    assert!(indexer.has_encountered_header(&project, &fx.src("shape.h")));
}

#[test]
fn test_reindex_replaces_previous_entries() {
    let fx = Fixture::new();
    let indexer = fx.indexed();
    let project = fx.project();

    let first = indexer.entries_in_file(&fx.src("circle.cpp"));
    assert!(indexer.index_all(&project));
    assert!(indexer.wait_until_idle(IDLE));
    // nothing changed on disk, so nothing was re-parsed
    assert!(indexer.stats().files_unchanged >= 3);

    indexer.update_source(&fx.src("circle.cpp"), CIRCLE_CPP);
    assert!(indexer.wait_until_idle(IDLE));
    let mut again = indexer.entries_in_file(&fx.src("circle.cpp"));
    let mut first = first;
    first.sort_by_key(|e| e.to_string());
    again.sort_by_key(|e| e.to_string());
    assert_eq!(first, again);
}

#[test]
fn test_changed_and_deleted_files_are_picked_up() {
    let fx = Fixture::new();
    let indexer = fx.indexed();
    let project = fx.project();
    assert!(has_class(&indexer, &project, "geo::Circle"));

    fs::write(
        fx.src("circle.cpp"),
        "#include \"shape.h\"\nnamespace geo { class Square : public Shape {}; }\n",
    )
    .unwrap();
    touch_later(&fx.src("circle.cpp"));
    fs::remove_file(fx.src("main.cpp")).unwrap();

    assert!(indexer.index_all(&project));
    assert!(indexer.wait_until_idle(IDLE));

    assert!(!has_class(&indexer, &project, "geo::Circle"));
    assert!(has_class(&indexer, &project, "geo::Square"));
    assert_eq!(indexer.derived_classes(&project, &qn("geo::Shape")), vec![qn("geo::Square")]);

    let stored: Vec<PathBuf> = indexer.indexed_files(&project).into_iter().map(|r| r.path).collect();
    assert!(!stored.contains(&PathBuf::from("app/src/main.cpp")));
    assert!(indexer.entries_in_file(&fx.src("main.cpp")).is_empty());
    assert!(indexer.stats().files_removed >= 1);
}

#[test]
fn test_update_source_uses_supplied_contents() {
    let fx = Fixture::new();
    let indexer = fx.indexed();
    let project = fx.project();

    let unsaved = "namespace geo { class Draft {}; }\n";
    assert!(indexer.update_source(&fx.src("circle.cpp"), unsaved));
    assert!(indexer.wait_until_idle(IDLE));

    assert!(has_class(&indexer, &project, "geo::Draft"));
    assert!(!has_class(&indexer, &project, "geo::Circle"));
}

#[test]
fn test_add_source_filters_requests() {
    let fx = Fixture::new();
    let indexer = fx.indexed();

    fs::write(fx.root.join("app/README.md"), "docs").unwrap();
    assert!(!indexer.add_source(&fx.root.join("app/README.md"), true));
    // shape.h was pulled in by the sources already
    assert!(!indexer.add_source(&fx.src("shape.h"), true));
    assert!(indexer.add_source(&fx.src("shape.h"), false));
    assert!(indexer.wait_until_idle(IDLE));

    let outside = TempDir::new().unwrap();
    fs::write(outside.path().join("x.cpp"), "int x;").unwrap();
    assert!(!indexer.add_source(&outside.path().join("x.cpp"), true));
}

#[test]
fn test_disabled_project_is_not_indexed() {
    let mut fx = Fixture::new();
    fx.settings.indexing.disabled_projects = vec!["app".to_string()];
    let indexer = fx.indexer();

    assert!(!indexer.index_all(&fx.project()));
    assert!(!indexer.add_source(&fx.src("circle.cpp"), false));
    assert!(indexer.indexed_files(&fx.project()).is_empty());
}

#[test]
fn test_external_headers_are_attributed_by_absolute_path() {
    let mut fx = Fixture::new();
    let external = TempDir::new().unwrap();
    fs::write(
        external.path().join("vendor.h"),
        "#pragma once\nnamespace vendor { struct Point { int x; }; }\n",
    )
    .unwrap();
    fx.settings.indexing.include_paths = vec![external.path().to_path_buf()];
    fs::write(
        fx.src("circle.cpp"),
        "#include <vendor.h>\nnamespace geo { vendor::Point origin; }\n",
    )
    .unwrap();
    fs::write(fx.src("main.cpp"), "#include <vendor.h>\nint main() { return 0; }\n").unwrap();

    let indexer = fx.indexed();
    let project = fx.project();
    let header = external.path().join("vendor.h");

    let entries = indexer.entries_in_external_file(&project, &header);
    let points: Vec<_> = entries
        .iter()
        .filter(|e| e.name == qn("vendor::Point") && e.entry_type == EntryType::Struct)
        .collect();
    assert_eq!(points.len(), 1);

    let matches = indexer.query_entries(&project, &EntryQuery::named("vendor::Point"));
    assert!(matches.iter().any(|m| m.flag.external && m.path == header));
}

#[test]
fn test_index_survives_restart() {
    let fx = Fixture::new();
    {
        let indexer = fx.indexed();
        indexer.shutdown();
    }
    assert_eq!(fx.index_files().len(), 1);

    let reopened = SourceIndexer::with_cpp_parser(&fx.settings).unwrap();
    assert!(has_class(&reopened, &fx.project(), "geo::Circle"));
    assert_eq!(
        reopened.derived_classes(&fx.project(), &qn("geo::Shape")),
        vec![qn("geo::Circle")]
    );
}

#[test]
fn test_corrupt_index_is_discarded_and_rebuilt() {
    let mut fx = Fixture::new();
    fx.settings.indexing.idle_poll_ms = 10;
    {
        let indexer = fx.indexed();
        indexer.shutdown();
    }
    let files = fx.index_files();
    assert_eq!(files.len(), 1);
    let mut bytes = fs::read(&files[0]).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xff;
    fs::write(&files[0], &bytes).unwrap();

    let indexer = fx.indexer();
    assert!(!has_class(&indexer, &fx.project(), "geo::Circle"));
    assert!(fx.index_files().is_empty(), "corrupt file should be deleted");

    // The failed lookup alone schedules the rebuild.
    assert!(eventually(|| has_class(&indexer, &fx.project(), "geo::Circle")));
    assert!(indexer.wait_until_idle(IDLE));
}

#[test]
fn test_idle_save_respects_threshold() {
    let mut fx = Fixture::new();
    fx.settings.indexing.idle_save_threshold_ms = 60_000;
    let indexer = fx.indexed();
    assert!(fx.index_files().is_empty());

    indexer.notify_idle(Duration::from_millis(10));
    assert!(fx.index_files().is_empty());

    indexer.notify_idle(Duration::from_secs(61));
    assert_eq!(fx.index_files().len(), 1);
}

#[test]
fn test_preloaded_contents_outlive_the_file() {
    let fx = Fixture::new();
    let indexer = SourceIndexer::with_cpp_parser(&fx.settings).unwrap();
    let circle = fx.src("circle.cpp");

    assert!(indexer.add_source(&circle, false));
    fs::remove_file(&circle).unwrap();

    indexer.start().unwrap();
    assert!(indexer.wait_until_idle(IDLE));
    assert!(has_class(&indexer, &fx.project(), "geo::Circle"));
}

#[test]
fn test_listeners_see_index_changes() {
    let fx = Fixture::new();
    let indexer = fx.indexer();
    let (tx, rx) = crossbeam_channel::unbounded::<IndexDelta>();
    let listener: Arc<dyn IndexChangeListener> = Arc::new(move |delta: &IndexDelta| {
        let _ = tx.send(delta.clone());
    });
    indexer.add_index_change_listener(listener.clone());

    assert!(indexer.index_all(&fx.project()));
    assert!(indexer.wait_until_idle(IDLE));

    // every job has finished; delivery is asynchronous, so drain until quiet
    let mut kinds = Vec::new();
    while let Ok(delta) = rx.recv_timeout(Duration::from_secs(1)) {
        kinds.push((delta.kind, delta.path));
    }
    assert!(kinds.iter().any(|(k, _)| *k == IndexDeltaKind::ProjectIndexed));
    assert!(kinds.iter().any(|(k, p)| *k == IndexDeltaKind::FileIndexed
        && p.as_deref() == Some(fx.src("circle.cpp").as_path())));

    indexer.remove_index(&fx.project());
    let removed = std::iter::from_fn(|| rx.recv_timeout(Duration::from_secs(5)).ok())
        .find(|delta| delta.kind == IndexDeltaKind::IndexRemoved);
    assert!(removed.is_some());
    assert!(indexer.indexed_files(&fx.project()).is_empty());

    assert!(indexer.remove_index_change_listener(&listener));
}

#[test]
fn test_resource_deltas_map_to_jobs() {
    let fx = Fixture::new();
    let indexer = fx.indexed();
    let project = fx.project();

    fs::remove_file(fx.src("circle.cpp")).unwrap();
    let removal = ResourceDelta::new(
        &project,
        fx.src("circle.cpp"),
        ResourceKind::CompilationUnit,
        DeltaKind::Removed,
    );
    assert!(indexer.handle_delta(&removal));
    assert!(indexer.wait_until_idle(IDLE));
    assert!(!has_class(&indexer, &project, "geo::Circle"));

    fs::create_dir_all(fx.root.join("app/extra")).unwrap();
    fs::write(fx.root.join("app/extra/tri.cpp"), "class Triangle {};\n").unwrap();
    let folder = ResourceDelta::new(
        &project,
        fx.root.join("app/extra"),
        ResourceKind::Folder,
        DeltaKind::Added,
    );
    assert!(indexer.handle_delta(&folder));
    assert!(indexer.wait_until_idle(IDLE));
    assert!(has_class(&indexer, &project, "Triangle"));

    let gone = ResourceDelta::new(
        &project,
        fx.root.join("app/extra"),
        ResourceKind::Folder,
        DeltaKind::Removed,
    );
    assert!(indexer.handle_delta(&gone));
    assert!(indexer.wait_until_idle(IDLE));
    assert!(!has_class(&indexer, &project, "Triangle"));
}

#[test]
fn test_readers_run_alongside_indexing() {
    let fx = Fixture::new();
    for i in 0..20 {
        fs::write(
            fx.src(&format!("gen{i}.cpp")),
            format!("#include \"shape.h\"\nnamespace geo {{ class Gen{i} : public Shape {{}}; }}\n"),
        )
        .unwrap();
    }
    let indexer = Arc::new(fx.indexer());
    let project = fx.project();
    assert!(indexer.index_all(&project));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let indexer = Arc::clone(&indexer);
            let project = project.clone();
            std::thread::spawn(move || {
                let mut last = 0;
                for _ in 0..50 {
                    let derived = indexer.derived_classes(&project, &qn("geo::Shape"));
                    // a fresh walk only ever adds entries
                    assert!(derived.len() >= last);
                    last = derived.len();
                }
            })
        })
        .collect();
    for reader in readers {
        reader.join().unwrap();
    }

    assert!(indexer.wait_until_idle(IDLE));
    assert_eq!(indexer.derived_classes(&project, &qn("geo::Shape")).len(), 21);
}

#[test]
fn test_cancel_pauses_until_index_all() {
    let fx = Fixture::new();
    let indexer = fx.indexer();

    assert!(indexer.index_all(&fx.project()));
    if indexer.cancel_current() {
        assert_eq!(indexer.state(), WorkerState::Waiting);
    }

    // a new index-all resumes the worker and finishes the walk
    indexer.index_all(&fx.project());
    assert_eq!(indexer.state(), WorkerState::Enabled);
    assert!(indexer.wait_until_idle(IDLE));
    assert!(has_class(&indexer, &fx.project(), "geo::Circle"));
}
