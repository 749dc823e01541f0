//! Saving, reloading and diffing graphs across both storage backends.

use std::io;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;

use cellgraph_core::{BuiltinOp, Cell, CellCache, FunctionRegistry, NodeKey, ReferenceGraph, Value, Xcl};
use cellgraph_storage::{
    compute_dirty_set, node_digests, DirectoryStore, GraphStore, InMemoryStore, StoreConfig,
};

fn invoice(fee: i64) -> ReferenceGraph {
    let price = Cell::new("price", 2.5);
    let qty = Cell::new("qty", 4);
    let line = Cell::new("line", BuiltinOp::Mul.function()).arg(price).arg(qty);
    let total = Cell::new("total", BuiltinOp::Add.function())
        .arg(line)
        .arg(Cell::new("fee", fee));
    Xcl::new() + total
}

fn exercise(store: &mut dyn GraphStore) {
    let registry = FunctionRegistry::with_builtins();
    store.save("invoice", &invoice(1)).unwrap();

    let loaded = store.load("invoice", &registry).unwrap();
    assert_eq!(
        loaded.evaluate("total", &CellCache::new()).unwrap(),
        Value::Float(11.0)
    );
    assert_eq!(loaded.edge_count(), 4);

    let previous = node_digests(&loaded);
    store.save("invoice", &invoice(2)).unwrap();
    let reloaded = store.load("invoice", &registry).unwrap();
    let dirty = compute_dirty_set(&reloaded, &previous);
    assert_eq!(dirty.modified.into_iter().collect::<Vec<_>>(), vec![NodeKey::from("fee")]);

    assert_eq!(store.list().unwrap(), vec!["invoice"]);
    store.delete("invoice").unwrap();
    assert!(!store.contains("invoice").unwrap());
}

#[test]
fn in_memory_backend() {
    exercise(&mut InMemoryStore::new());
}

#[test]
fn directory_backend() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = DirectoryStore::open(StoreConfig {
        root: dir.path().to_path_buf(),
        pretty: true,
    })
    .unwrap();
    exercise(&mut store);
}

#[test]
fn backends_write_identical_documents() {
    let dir = tempfile::tempdir().unwrap();
    let mut files = DirectoryStore::at(dir.path()).unwrap();
    let mut memory = InMemoryStore::new();
    files.save("g", &invoice(1)).unwrap();
    memory.save("g", &invoice(1)).unwrap();

    let on_disk = std::fs::read_to_string(files.path_of("g").unwrap()).unwrap();
    assert_eq!(Some(on_disk.as_str()), memory.document("g"));
}

/// Collects formatted log lines in memory.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn info_lines(store: &mut dyn GraphStore) -> Vec<String> {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, || {
        store.save("logged", &invoice(1)).unwrap();
        store.delete("logged").unwrap();
    });
    logs.text().lines().map(str::to_string).collect()
}

#[test]
fn backends_log_saves_and_deletes_at_info() {
    let dir = tempfile::tempdir().unwrap();
    let mut files = DirectoryStore::at(dir.path()).unwrap();
    for lines in [info_lines(&mut InMemoryStore::new()), info_lines(&mut files)] {
        assert!(
            lines.iter().any(|l| l.contains("INFO") && l.contains("saved graph")),
            "{lines:?}"
        );
        assert!(
            lines.iter().any(|l| l.contains("INFO") && l.contains("deleted graph")),
            "{lines:?}"
        );
    }
}
