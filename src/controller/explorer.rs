//! Logic-layer explorer.
//!
//! Polls rooms, functions and programs from the controller's logic layer
//! and keeps the latest snapshot. Listeners are called on the poll task
//! whenever the snapshot changes, and once on registration if a snapshot
//! already exists.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::RwLock;

use crate::controller::script::{parse_rows, ScriptError, ScriptRunner};
use crate::lifecycle::shutdown::TaskGroup;

const EXPLORE_SCRIPT: &str = r#"
string id;
foreach(id, dom.GetObject(ID_ROOMS).EnumUsedIDs()) {
  var o = dom.GetObject(id);
  string chs = "";
  string ch;
  foreach(ch, o.EnumUsedIDs()) { chs = chs # dom.GetObject(ch).Address() # ","; }
  WriteLine("room\t" # id # "\t" # o.Name() # "\t" # o.EnumInfo() # "\t" # chs);
}
foreach(id, dom.GetObject(ID_FUNCTIONS).EnumUsedIDs()) {
  var o = dom.GetObject(id);
  string chs = "";
  string ch;
  foreach(ch, o.EnumUsedIDs()) { chs = chs # dom.GetObject(ch).Address() # ","; }
  WriteLine("function\t" # id # "\t" # o.Name() # "\t" # o.EnumInfo() # "\t" # chs);
}
foreach(id, dom.GetObject(ID_PROGRAMS).EnumUsedIDs()) {
  var o = dom.GetObject(id);
  WriteLine("program\t" # id # "\t" # o.Name() # "\t" # o.PrgInfo() # "\t");
}
"#;

/// A room, function or program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicObject {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Addresses of member channels.
    pub channels: Vec<String>,
}

/// Snapshot of the logic layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogicGraph {
    pub rooms: Vec<LogicObject>,
    pub functions: Vec<LogicObject>,
    pub programs: Vec<LogicObject>,
}

impl LogicGraph {
    pub fn parse(output: &str) -> Result<Self, ScriptError> {
        let mut graph = LogicGraph::default();
        for fields in parse_rows(output, 4)? {
            let object = LogicObject {
                id: fields[1].to_string(),
                name: fields[2].to_string(),
                description: fields[3].to_string(),
                channels: fields
                    .get(4)
                    .map(|list| {
                        list.split(',')
                            .filter(|a| !a.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            };
            match fields[0] {
                "room" => graph.rooms.push(object),
                "function" => graph.functions.push(object),
                "program" => graph.programs.push(object),
                other => tracing::debug!(kind = other, "Unknown logic object skipped"),
            }
        }
        Ok(graph)
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty() && self.functions.is_empty() && self.programs.is_empty()
    }

    pub fn rooms_of(&self, channel: &str) -> Vec<&LogicObject> {
        members(&self.rooms, channel)
    }

    pub fn functions_of(&self, channel: &str) -> Vec<&LogicObject> {
        members(&self.functions, channel)
    }
}

fn members<'a>(objects: &'a [LogicObject], channel: &str) -> Vec<&'a LogicObject> {
    objects
        .iter()
        .filter(|o| o.channels.iter().any(|c| c == channel))
        .collect()
}

/// Notified about logic-layer changes.
pub trait ExplorerListener: Send + Sync {
    fn graph_changed(&self, graph: &LogicGraph);
}

pub struct LogicExplorer {
    runner: Arc<dyn ScriptRunner>,
    period: Duration,
    graph: ArcSwap<LogicGraph>,
    listeners: RwLock<Vec<Arc<dyn ExplorerListener>>>,
    tasks: TaskGroup,
}

impl LogicExplorer {
    pub fn new(runner: Arc<dyn ScriptRunner>, period: Duration) -> Self {
        Self {
            runner,
            period,
            graph: ArcSwap::from_pointee(LogicGraph::default()),
            listeners: RwLock::new(Vec::new()),
            tasks: TaskGroup::new("explorer"),
        }
    }

    /// The latest snapshot; empty until the first successful poll.
    pub fn graph(&self) -> Arc<LogicGraph> {
        self.graph.load_full()
    }

    pub fn add_listener(&self, listener: Arc<dyn ExplorerListener>) {
        // Held across load and push: a concurrent refresh either notifies
        // this listener or has already stored the graph it is given here.
        let mut listeners = self.listeners.write();
        let graph = self.graph();
        if !graph.is_empty() {
            listener.graph_changed(&graph);
        }
        listeners.push(listener);
    }

    /// Poll once. Returns whether the snapshot changed.
    pub async fn refresh(&self) -> Result<bool, ScriptError> {
        let output = self.runner.run(EXPLORE_SCRIPT).await?;
        let graph = LogicGraph::parse(&output)?;
        if *self.graph.load_full() == graph {
            return Ok(false);
        }
        tracing::debug!(
            rooms = graph.rooms.len(),
            functions = graph.functions.len(),
            programs = graph.programs.len(),
            "Logic layer changed"
        );
        let graph = Arc::new(graph);
        let listeners = self.listeners.read();
        self.graph.store(Arc::clone(&graph));
        for listener in listeners.iter() {
            listener.graph_changed(&graph);
        }
        Ok(true)
    }

    pub fn start(self: &Arc<Self>) {
        let explorer = Arc::clone(self);
        self.tasks.spawn_periodic(self.period, move || {
            let explorer = Arc::clone(&explorer);
            async move {
                if let Err(e) = explorer.refresh().await {
                    tracing::warn!(error = %e, "Exploring logic layer failed");
                }
            }
        });
    }

    pub async fn stop(&self) {
        self.tasks.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::script::fake::FakeRunner;
    use parking_lot::Mutex;

    const OUTPUT: &str = "room\t1230\tKitchen\t\tA:1,B:2,\n\
                          function\t1240\tLight\tAll lights\tA:1,\n\
                          program\t1500\tMorning\t\t\n";

    struct Counter(Mutex<usize>);

    impl ExplorerListener for Counter {
        fn graph_changed(&self, _graph: &LogicGraph) {
            *self.0.lock() += 1;
        }
    }

    #[test]
    fn parses_objects_and_memberships() {
        let graph = LogicGraph::parse(OUTPUT).unwrap();
        assert_eq!(graph.rooms[0].channels, vec!["A:1", "B:2"]);
        assert_eq!(graph.functions[0].description, "All lights");
        assert_eq!(graph.programs[0].name, "Morning");
        assert_eq!(graph.rooms_of("B:2").len(), 1);
        assert!(graph.functions_of("B:2").is_empty());
    }

    #[tokio::test]
    async fn listeners_see_changes_only() {
        let runner = Arc::new(FakeRunner::with_output(OUTPUT));
        let explorer = LogicExplorer::new(runner.clone(), Duration::from_secs(60));
        let counter = Arc::new(Counter(Mutex::new(0)));
        explorer.add_listener(counter.clone());

        assert!(explorer.refresh().await.unwrap());
        assert!(!explorer.refresh().await.unwrap());
        assert_eq!(*counter.0.lock(), 1);

        // A late listener gets the current snapshot immediately.
        let late = Arc::new(Counter(Mutex::new(0)));
        explorer.add_listener(late.clone());
        assert_eq!(*late.0.lock(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn listener_added_during_refresh_sees_the_snapshot_once() {
        for _ in 0..200 {
            let runner = Arc::new(FakeRunner::with_output(OUTPUT));
            let explorer = Arc::new(LogicExplorer::new(runner, Duration::from_secs(60)));
            let polling = {
                let explorer = Arc::clone(&explorer);
                tokio::spawn(async move { explorer.refresh().await })
            };
            let counter = Arc::new(Counter(Mutex::new(0)));
            explorer.add_listener(counter.clone());
            assert!(polling.await.unwrap().unwrap());
            assert_eq!(*counter.0.lock(), 1);
        }
    }

    #[tokio::test]
    async fn stop_ends_poll_task() {
        let runner = Arc::new(FakeRunner::with_output(OUTPUT));
        let explorer = Arc::new(LogicExplorer::new(runner.clone(), Duration::from_millis(10)));
        explorer.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        explorer.stop().await;
        assert_eq!(explorer.tasks.task_count(), 0);
        assert!(!runner.scripts.lock().is_empty());
        assert_eq!(explorer.graph().rooms.len(), 1);
    }
}
