use std::sync::Mutex;

use crate::{self as nc, remote::Remote, *};

/// Records every platform call so tests can check what ran, and in which
/// order.
#[derive(Default)]
struct Journal(Mutex<Vec<String>>);

impl Journal {
    fn record(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize, HasDependencies)]
struct Volume {
    name: String,
    fail_create: bool,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
struct VolumeOutput {
    id: String,
}

impl Resource for Volume {
    type Provider = Journal;
    type Error = String;
    type Output = VolumeOutput;

    async fn create(&self, journal: &Journal) -> Result<VolumeOutput, String> {
        if self.fail_create {
            return Err(format!("no capacity for {}", self.name));
        }
        journal.record(format!("create volume {}", self.name));
        Ok(VolumeOutput {
            id: format!("vol-{}", self.name),
        })
    }

    async fn update(
        &self,
        journal: &Journal,
        _previous_local: &Self,
        _previous_remote: &VolumeOutput,
    ) -> Result<VolumeOutput, String> {
        journal.record(format!("update volume {}", self.name));
        Ok(VolumeOutput {
            id: format!("vol-{}", self.name),
        })
    }

    async fn delete(&self, journal: &Journal, previous_remote: &VolumeOutput) -> Result<(), String> {
        journal.record(format!("delete volume {}", previous_remote.id));
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize, HasDependencies)]
struct Mount {
    volume_id: Remote<String>,
    path: String,
    #[nc(skip)]
    fail_delete: bool,
}

impl Resource for Mount {
    type Provider = Journal;
    type Error = Error;
    type Output = String;

    async fn create(&self, journal: &Journal) -> Result<String, Error> {
        let volume_id = self.volume_id.get()?;
        journal.record(format!("create mount {} on {volume_id}", self.path));
        Ok(format!("{volume_id}:{}", self.path))
    }

    async fn update(
        &self,
        journal: &Journal,
        _previous_local: &Self,
        _previous_remote: &String,
    ) -> Result<String, Error> {
        let volume_id = self.volume_id.get()?;
        journal.record(format!("update mount {} on {volume_id}", self.path));
        Ok(format!("{volume_id}:{}", self.path))
    }

    async fn delete(&self, journal: &Journal, previous_remote: &String) -> Result<(), Error> {
        if self.fail_delete {
            return Err(Error::Other {
                source: anyhow::anyhow!("{previous_remote} is busy"),
            });
        }
        journal.record(format!("delete mount {previous_remote}"));
        Ok(())
    }
}

fn test_output_path(name: &str) -> std::path::PathBuf {
    let path = std::path::PathBuf::from(std::env!("CARGO_WORKSPACE_DIR"))
        .join("test_output")
        .join(name);
    if path.exists() {
        std::fs::remove_dir_all(&path).unwrap();
    }
    std::fs::create_dir_all(&path).unwrap();
    path
}

fn volume(name: &str) -> Volume {
    Volume {
        name: name.to_owned(),
        fail_create: false,
    }
}

/// Declares a volume with two mounts on it.
fn declare(store: &mut Store<Journal>, volume_name: &str, fail_delete: bool) -> [Action; 3] {
    let vol = store.resource("volume", volume(volume_name)).unwrap();
    let data = store
        .resource(
            "mount-data",
            Mount {
                volume_id: vol.remote(|v| v.id.clone()),
                path: "/data".to_owned(),
                fail_delete,
            },
        )
        .unwrap();
    let logs = store
        .resource(
            "mount-logs",
            Mount {
                volume_id: vol.remote(|v| v.id.clone()),
                path: "/logs".to_owned(),
                fail_delete: false,
            },
        )
        .unwrap();
    [vol.action(), data.action(), logs.action()]
}

#[tokio::test]
async fn create_load_update() {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = test_output_path("create_load_update");

    let mut store = Store::new(&path, Journal::default());
    assert_eq!([Action::Create; 3], declare(&mut store, "a", false));
    let plan = store.plan().unwrap();
    assert_eq!("volume", plan.actions[0].id, "the volume is created first");
    store.apply(plan).await.unwrap();
    assert_eq!(3, store.provider().entries().len());
    assert!(path.join("mount-data.json").exists());

    // Nothing changed, so nothing is called
    let mut store = Store::new(&path, Journal::default());
    assert_eq!([Action::Load; 3], declare(&mut store, "a", false));
    let plan = store.plan().unwrap();
    assert!(!plan.has_changes());
    assert!(plan.to_string().contains("No changes."));
    store.apply(plan).await.unwrap();
    assert!(store.provider().entries().is_empty());

    // Changing the volume updates everything that reads from it
    let mut store = Store::new(&path, Journal::default());
    assert_eq!([Action::Update; 3], declare(&mut store, "b", false));
    let plan = store.plan().unwrap();
    store.apply(plan).await.unwrap();
    let entries = store.provider().entries();
    assert_eq!("update volume b", entries[0]);
    assert!(entries.contains(&"update mount /data on vol-b".to_owned()));
    assert!(entries.contains(&"update mount /logs on vol-b".to_owned()));

    let stored: (Mount, String) = read_from_store(&path, "mount-logs").unwrap();
    assert_eq!("vol-b:/logs", stored.1);
}

#[tokio::test]
async fn orphans_are_destroyed_after_their_dependents() {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = test_output_path("orphan_order");

    let mut store = Store::new(&path, Journal::default());
    declare(&mut store, "a", false);
    let plan = store.plan().unwrap();
    store.apply(plan).await.unwrap();

    // Only the types are known, nothing is declared
    let mut store = Store::new(&path, Journal::default());
    store.register::<Volume>().register::<Mount>();
    let plan = store.plan().unwrap();
    assert!(plan.warnings.is_empty(), "{:#?}", plan.warnings);
    assert_eq!(3, plan.actions.len());
    assert!(plan
        .actions
        .iter()
        .all(|a| a.action == Action::Destroy && a.is_orphan));
    assert_eq!("volume", plan.actions[2].id, "{plan}");

    store.apply(plan).await.unwrap();
    let entries = store.provider().entries();
    assert_eq!(
        vec![
            "delete mount vol-a:/data",
            "delete mount vol-a:/logs",
            "delete volume vol-a"
        ],
        {
            let mut mounts = entries[..2].to_vec();
            mounts.sort();
            mounts.push(entries[2].clone());
            mounts
        }
    );
    assert_eq!(0, std::fs::read_dir(&path).unwrap().count());
}

#[tokio::test]
async fn unknown_orphan_warning() {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = test_output_path("unknown_orphan");

    let mut store = Store::new(&path, Journal::default());
    store.resource("lonely", volume("lonely")).unwrap();
    let plan = store.plan().unwrap();
    store.apply(plan).await.unwrap();

    let mut store = Store::new(&path, Journal::default());
    let plan = store.plan().unwrap();
    assert_eq!(1, plan.warnings.len());
    assert!(plan.warnings[0].contains("lonely"));
    assert!(plan.warnings[0].contains("register"));
    assert!(plan.to_string().contains("WARNING"));
    assert!(path.join("lonely.json").exists());
}

#[tokio::test]
async fn clear_resources_destroys_everything() {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = test_output_path("clear_destroy");

    let mut store = Store::new(&path, Journal::default());
    declare(&mut store, "a", false);
    let plan = store.plan().unwrap();
    store.apply(plan).await.unwrap();

    store.clear_resources();
    let plan = store.plan().unwrap();
    assert!(plan.warnings.is_empty(), "{:#?}", plan.warnings);
    assert_eq!(3, plan.actions.len());
    store.apply(plan).await.unwrap();
    assert!(!path.join("volume.json").exists());
    assert!(!path.join("mount-data.json").exists());
}

#[tokio::test]
async fn teardown_carries_on_past_failures() {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = test_output_path("teardown_failures");

    let mut store = Store::new(&path, Journal::default());
    declare(&mut store, "a", true);
    let plan = store.plan().unwrap();
    store.apply(plan).await.unwrap();

    store.clear_resources();
    let plan = store.plan().unwrap();
    let err = store.teardown(plan).await.unwrap_err();
    match err {
        Error::Teardown { failures } => {
            assert_eq!(1, failures.len());
            assert!(failures[0].starts_with("mount-data"), "{failures:?}");
        }
        e => panic!("unexpected error: {e}"),
    }
    // The failed mount keeps its file so a second teardown can retry it
    assert!(path.join("mount-data.json").exists());
    assert!(!path.join("mount-logs.json").exists());
    assert!(!path.join("volume.json").exists());
    assert!(store
        .provider()
        .entries()
        .contains(&"delete volume vol-a".to_owned()));
}

#[tokio::test]
async fn apply_stops_at_the_first_failure() {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = test_output_path("apply_failure");

    let mut store = Store::new(&path, Journal::default());
    let vol = store
        .resource(
            "volume",
            Volume {
                name: "full".to_owned(),
                fail_create: true,
            },
        )
        .unwrap();
    store
        .resource(
            "mount",
            Mount {
                volume_id: vol.remote(|v| v.id.clone()),
                path: "/data".to_owned(),
                fail_delete: false,
            },
        )
        .unwrap();
    let plan = store.plan().unwrap();
    let err = store.apply(plan).await.unwrap_err();
    assert!(matches!(err, Error::Create { ref name, .. } if name == "volume"), "{err}");
    assert!(store.provider().entries().is_empty());
    assert!(!path.join("mount.json").exists());
}

#[test]
fn undeclared_dependency_is_an_error() {
    let path = test_output_path("missing_dependency");
    let mut elsewhere = Store::new(path.join("elsewhere"), Journal::default());
    let vol = elsewhere.resource("volume", volume("a")).unwrap();

    let mut store = Store::new(&path, Journal::default());
    let result = store.resource(
        "mount",
        Mount {
            volume_id: vol.remote(|v| v.id.clone()),
            path: "/data".to_owned(),
            fail_delete: false,
        },
    );
    assert!(matches!(result, Err(Error::MissingResource { .. })));
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize, HasDependencies)]
enum Source {
    Blank,
    Snapshot {
        volume_id: Remote<String>,
        #[nc(skip)]
        label: String,
    },
    Mirror(Remote<String>, Remote<String>),
}

#[test]
fn enum_dependencies_come_from_the_active_variant() {
    let path = test_output_path("enum_dependencies");
    let mut store = Store::new(&path, Journal::default());
    let a = store.resource("volume-a", volume("a")).unwrap();
    let b = store.resource("volume-b", volume("b")).unwrap();

    assert!(Source::Blank.dependencies().is_empty());

    let snapshot = Source::Snapshot {
        volume_id: a.remote(|v| v.id.clone()),
        label: "nightly".to_owned(),
    };
    assert_eq!(
        vec!["volume-a".to_owned()],
        snapshot.dependencies().into_iter().collect::<Vec<_>>()
    );

    let mirror = Source::Mirror(a.remote(|v| v.id.clone()), b.remote(|v| v.id.clone()));
    assert_eq!(
        vec!["volume-a".to_owned(), "volume-b".to_owned()],
        mirror.dependencies().into_iter().collect::<Vec<_>>()
    );
}
