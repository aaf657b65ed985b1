//! # noncompliant
//!
//! Declarative fixtures that put AWS accounts into states that specific AWS
//! Config rules and CIS controls flag as findings, and then take them back
//! out again.
//!
//! Every fixture is a small set of platform resources declared in Rust
//! against a [`Store`]. The store compares those declarations with what it
//! previously recorded on disk and schedules the actions needed to reach them
//! as a Directed Acyclic Graph:
//!
//! - **Create** resources that have never been applied.
//! - **Update** resources whose declaration changed, which is how a fixture
//!   is flipped from its non-compliant shape to its compliant shape.
//! - **Destroy** resources that are stored but no longer declared, in reverse
//!   dependency order.
//!
//! ## Concepts
//!
//! - **Local state**: the desired configuration of a resource, as declared in
//!   code.
//! - **Remote state**: what the platform told us after creating or updating
//!   the resource (ARNs, ids, generated names).
//! - **Remote values**: a [`Remote`] lets one resource's local state depend on
//!   another resource's remote state. These links are what orders the DAG.
//!
//! Scenarios (see [`scenario`]) declare the resources of one compliance rule,
//! the [`runner`] drives their lifecycle and [`cleanup`] sweeps anything left
//! behind by tag.
//!
//! ## Error Handling
//!
//! The engine exposes one error enum, [`Error`]. Platform resources report
//! their own errors (`anyhow::Error` for everything under [`aws`]), which are
//! boxed into the engine error together with the id of the failing resource.

use std::{future::Future, ops::Deref, pin::Pin};

use dagga::{Node, Schedule};
use snafu::prelude::*;
use tokio::io::AsyncWriteExt;

pub use noncompliant_derive::HasDependencies;

pub mod aws;
pub mod cleanup;
mod has_dependencies_impl;
pub mod remote;
pub mod runner;
pub mod scenario;
pub mod settings;
#[cfg(test)]
mod test;
pub mod utils;
pub mod wait;

use remote::{Remote, RemoteVar, Remotes};

/// Marker trait for userland errors.
pub trait UserError: core::fmt::Display + core::fmt::Debug + Send + Sync + 'static {}
impl<T: core::fmt::Display + core::fmt::Debug + Send + Sync + 'static> UserError for T {}

/// Top-level error enum that encompasses all errors.
#[derive(snafu::Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{source}:\n{}",
                source.chain()
                    .map(|e| format!("{e}"))
                    .collect::<Vec<_>>()
                    .join("\n -> ")))]
    Other { source: anyhow::Error },

    #[snafu(display("Could not read store file '{path:?}': {source}"))]
    StoreFileRead {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not delete store file '{path:?}': {source}"))]
    StoreFileDelete {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not serialize stored '{name}': {source}"))]
    Serialize {
        name: String,
        source: serde_json::Error,
    },

    #[snafu(display("Could not deserialize stored '{name}': {source}"))]
    Deserialize {
        name: String,
        source: serde_json::Error,
    },

    #[snafu(display("Could not build schedule: {msg}"))]
    Schedule { msg: String },

    #[snafu(display("Could not create file {path:?}: {source}"))]
    CreateFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not write file {path:?}: {source}"))]
    WriteFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Remote value of {ty:?} is unresolved. Depends on {depends_on}"))]
    RemoteUnresolved {
        ty: &'static str,
        depends_on: String,
    },

    #[snafu(display("Could not find a resource by the name '{name}'"))]
    MissingResource { name: String },

    #[snafu(display("Error during '{name}' creation: {error}"))]
    Create {
        name: String,
        error: Box<dyn UserError>,
    },

    #[snafu(display("Error during '{name}' update: {error}"))]
    Update {
        name: String,
        error: Box<dyn UserError>,
    },

    #[snafu(display("Error during '{name}' destruction: {error}"))]
    Destroy {
        name: String,
        error: Box<dyn UserError>,
    },

    #[snafu(display("Teardown left {} resource(s) behind:\n  {}", failures.len(), failures.join("\n  ")))]
    Teardown { failures: Vec<String> },

    #[snafu(display("Missing previous remote value '{name}'"))]
    Load { name: String },

    #[snafu(display("Could not downcast"))]
    Downcast,

    #[snafu(display("Missing store file for '{id}'"))]
    MissingStoreFile { id: String },

    #[snafu(display("Could not scan store directory '{path:?}': {source}"))]
    ScanStoreDir {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[snafu(display(
        "Missing required setting '{name}', set it in the environment or in a .env file"
    ))]
    MissingSetting { name: &'static str },

    #[snafu(display("No scenario for the rule '{rule}', try `noncompliant list`"))]
    UnknownScenario { rule: String },

    #[snafu(display("The '{rule}' scenario has no compliant shape to remediate to"))]
    NotRemediable { rule: String },

    #[snafu(display("'{arn}' is not an ARN"))]
    InvalidArn { arn: String },
}

impl From<anyhow::Error> for Error {
    fn from(source: anyhow::Error) -> Self {
        Error::Other { source }
    }
}

type Result<T, E = Error> = core::result::Result<T, E>;

/// Platform resources.
///
/// Represents a resource created on a platform (ie an S3 bucket or an IAM
/// role on AWS).
#[allow(unreachable_code)]
pub trait Resource:
    core::fmt::Debug
    + Clone
    + PartialEq
    + HasDependencies
    + serde::Serialize
    + serde::de::DeserializeOwned
    + 'static
{
    /// Type of the platform/resource provider.
    ///
    /// For example [`aws::Aws`] in the case of amazon web services.
    type Provider;

    /// Errors that may occur interacting with the provider.
    type Error: UserError;

    /// The remote type of this resource, which we can used to fill in
    /// [`Remote`] values in other resources.
    type Output: core::fmt::Debug
        + Clone
        + PartialEq
        + serde::Serialize
        + serde::de::DeserializeOwned
        + 'static;

    /// Creates a new resource on the platform.
    fn create(
        &self,
        provider: &Self::Provider,
    ) -> impl Future<Output = Result<Self::Output, Self::Error>>;

    /// Updates an existing resource on the platform.
    ///
    /// Receives the previously applied local definition and the remote state
    /// it produced.
    ///
    /// ## Note
    /// This method is explicitly `unimplemented!` for resources that are
    /// never changed in place. Calling it on such a resource panics.
    fn update(
        &self,
        _provider: &Self::Provider,
        _previous_local: &Self,
        _previous_remote: &Self::Output,
    ) -> impl Future<Output = Result<Self::Output, Self::Error>> {
        unimplemented!(
            "Resource::update is unimplemented for {}",
            std::any::type_name::<Self>()
        ) as Box<dyn Future<Output = Result<_, _>> + Unpin>
    }

    /// Deletes a resource from the platform.
    ///
    /// Deleting a resource that is already gone should succeed.
    fn delete(
        &self,
        provider: &Self::Provider,
        previous_remote: &Self::Output,
    ) -> impl Future<Output = Result<(), Self::Error>>;
}

#[derive(Clone, Default, Debug)]
pub struct Dependencies {
    /// Specifies a dependency on a `Resource`.
    inner: Vec<String>,
}

impl IntoIterator for Dependencies {
    type Item = String;

    type IntoIter = <Vec<String> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl core::fmt::Display for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.inner.join(", "))
    }
}

impl Dependencies {
    pub fn merge(self, other: Self) -> Self {
        let mut inner = self.inner;
        for dep in other.inner {
            if !inner.contains(&dep) {
                inner.push(dep);
            }
        }
        Dependencies { inner }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Tracks dependencies between resources.
///
/// This trait can be derived, and has a default implementation that
/// reports zero dependencies.
pub trait HasDependencies {
    fn dependencies(&self) -> Dependencies {
        Dependencies::default()
    }
}

/// `Create`, `Load` and `Update` result in a resource being added to the graph.
///
/// `Destroy` moves the resource out of the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Action {
    Load,
    Create,
    Update,
    Destroy,
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Action::Load => "load",
            Action::Create => "create",
            Action::Update => "update",
            Action::Destroy => "destroy",
        })
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
struct InertStoreResource {
    name: String,
    local: serde_json::Value,
    remote: serde_json::Value,
    /// The Rust type name of the resource (via `std::any::type_name::<T>()`).
    /// Used for orphan detection and auto-deletion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    type_name: Option<String>,
    /// The resource IDs this resource depends on.
    /// Used for ordering orphan deletions correctly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dependencies: Option<Vec<String>>,
}

impl InertStoreResource {
    fn read(path: &std::path::Path, id: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).context(StoreFileReadSnafu { path })?;
        log::trace!(
            "contents:\n{}",
            contents
                .lines()
                .map(|line| format!("  {line}"))
                .collect::<Vec<_>>()
                .join("\n")
        );
        serde_json::from_str(&contents).context(DeserializeSnafu {
            name: id.to_owned(),
        })
    }

    async fn save(
        &self,
        resource_id: &str,
        store_path: impl AsRef<std::path::Path>,
    ) -> Result<(), Error> {
        let path = store_file_path(resource_id, &store_path);
        log::debug!("storing {resource_id} to {path:?}");

        let contents = serde_json::to_string_pretty(self).context(SerializeSnafu {
            name: format!("storing {}", resource_id),
        })?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(&parent)
                .await
                .context(CreateFileSnafu { path: parent })?;
        }

        let mut file = tokio::fs::File::create(&path)
            .await
            .context(CreateFileSnafu { path: path.clone() })?;
        file.write_all(contents.as_bytes())
            .await
            .context(WriteFileSnafu { path: path.clone() })?;
        Ok(())
    }

    /// Ids of the resources this stored resource depended on.
    ///
    /// Falls back to walking the local JSON for files written without an
    /// explicit `dependencies` field.
    fn dependency_ids(&self) -> Vec<String> {
        self.dependencies
            .clone()
            .unwrap_or_else(|| extract_depends_on_from_json(&self.local))
    }
}

/// A declared resource.
///
/// Dereferences to the local definition.
#[derive(Clone, Debug)]
pub struct StoreResource<L, R> {
    /// Name of the resource from the user's perspective
    name: String,
    /// Local definition in _code_
    local_definition: L,
    action: Action,
    remote_var: RemoteVar<R>,
}

impl<L, R> Deref for StoreResource<L, R> {
    type Target = L;

    fn deref(&self) -> &Self::Target {
        &self.local_definition
    }
}

impl<T> StoreResource<T, T::Output>
where
    T: Resource,
    T::Output: Clone,
{
    /// Map a remote value to use in local definitions.
    pub fn remote<X: Clone + core::fmt::Debug + 'static>(
        &self,
        f: impl Fn(&T::Output) -> X + 'static,
    ) -> Remote<X> {
        Remote::new(self, f)
    }

    /// Return the action that would be applied to this resource.
    pub fn action(&self) -> Action {
        self.action
    }

    /// The id this resource was declared with.
    pub fn id(&self) -> &str {
        &self.name
    }
}

/// The path to an individual resource store file.
fn store_file_path(name: &str, store_path: impl AsRef<std::path::Path>) -> std::path::PathBuf {
    store_path.as_ref().join(format!("{name}.json"))
}

/// Extract `depends_on` resource IDs from a serialized local definition.
///
/// Walks the JSON tree looking for `{"depends_on": "..."}` patterns,
/// which is how [`Remote`] serializes.
fn extract_depends_on_from_json(value: &serde_json::Value) -> Vec<String> {
    let mut deps = Vec::new();
    match value {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(dep)) = map.get("depends_on") {
                deps.push(dep.clone());
            }
            for v in map.values() {
                deps.extend(extract_depends_on_from_json(v));
            }
        }
        serde_json::Value::Array(arr) => {
            for v in arr {
                deps.extend(extract_depends_on_from_json(v));
            }
        }
        _ => {}
    }
    deps
}

type StoreNodeRunFn<Provider> = Box<
    dyn FnOnce(
        // Resource platform provider
        &'_ Provider,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + '_>>,
>;

struct RunAction<'a, Provider, T: Resource<Provider = Provider>> {
    provider: &'a Provider,
    store_path: std::path::PathBuf,
    /// Name of the resource being acted on, not the node name.
    resource_id: String,
    action: Action,
    local_definition_code: T,
    local_definition_store: Option<T>,
    remote_var: RemoteVar<T::Output>,
}

impl<Provider, T: Resource<Provider = Provider>> RunAction<'_, Provider, T> {
    async fn run(self) -> Result<()>
    where
        T: Resource,
    {
        let Self {
            provider,
            store_path,
            resource_id,
            action,
            local_definition_code,
            local_definition_store,
            remote_var,
        } = self;
        log::info!("{action} '{resource_id}':");

        async fn save<T: Resource>(
            resource_id: &str,
            local_definition_code: T,
            remote_var: &RemoteVar<T::Output>,
            store_path: impl AsRef<std::path::Path>,
        ) -> Result<(), Error> {
            let deps: Vec<String> = local_definition_code.dependencies().into_iter().collect();
            let inert_resource = InertStoreResource {
                name: resource_id.to_owned(),
                local: serde_json::to_value(&local_definition_code).context(SerializeSnafu {
                    name: format!("store {resource_id}"),
                })?,
                remote: serde_json::to_value(
                    remote_var.get().context(LoadSnafu { name: resource_id })?,
                )
                .context(SerializeSnafu {
                    name: format!("store {resource_id} remote"),
                })?,
                type_name: Some(std::any::type_name::<T>().to_owned()),
                dependencies: if deps.is_empty() { None } else { Some(deps) },
            };
            inert_resource.save(resource_id, store_path).await?;
            Ok(())
        }

        match action {
            Action::Load => {
                save(&resource_id, local_definition_code, &remote_var, store_path).await?;
            }
            Action::Create => {
                let value = local_definition_code
                    .create(provider)
                    .await
                    .map_err(|error| Error::Create {
                        name: resource_id.to_owned(),
                        error: Box::new(error),
                    })?;
                remote_var.set(Some(value));
                save(&resource_id, local_definition_code, &remote_var, store_path).await?;
            }
            Action::Update => {
                let previous_local = local_definition_store.context(LoadSnafu {
                    name: resource_id.clone(),
                })?;
                let previous_remote = remote_var.get().context(LoadSnafu {
                    name: resource_id.clone(),
                })?;
                if previous_local == local_definition_code {
                    log::info!("  '{resource_id}' is unchanged, an upstream resource was updated");
                } else {
                    let cmp =
                        pretty_assertions::Comparison::new(&previous_local, &local_definition_code);
                    let change_string = format!("{cmp}")
                        .lines()
                        .map(|line| format!("  {line}"))
                        .collect::<Vec<_>>()
                        .join("\n");
                    log::info!("updating '{resource_id}':\n{change_string}");
                    let output = local_definition_code
                        .update(provider, &previous_local, &previous_remote)
                        .await
                        .map_err(|error| Error::Update {
                            name: resource_id.clone(),
                            error: Box::new(error),
                        })?;
                    remote_var.set(Some(output));
                    save(&resource_id, local_definition_code, &remote_var, store_path).await?;
                }
            }
            Action::Destroy => {
                destroy_stored::<T>(provider, &store_path, &resource_id).await?;
                remote_var.set(None);
            }
        }

        log::info!("  success!");
        Ok(())
    }
}

/// Reads a stored resource, deletes it from the platform and removes its
/// store file.
async fn destroy_stored<T: Resource>(
    provider: &T::Provider,
    store_path: &std::path::Path,
    resource_id: &str,
) -> Result<()> {
    let (local, remote): (T, T::Output) = read_from_store(store_path, resource_id)?;
    local
        .delete(provider, &remote)
        .await
        .map_err(|error| Error::Destroy {
            name: resource_id.to_owned(),
            error: Box::new(error),
        })?;
    let path = store_file_path(resource_id, store_path);
    log::info!("  removing {resource_id} store file {path:?}");
    tokio::fs::remove_file(&path)
        .await
        .context(StoreFileDeleteSnafu { path })?;
    log::info!("  {resource_id} is destroyed");
    Ok(())
}

fn read_from_store<T: Resource>(
    path: impl AsRef<std::path::Path>,
    id: &str,
) -> Result<(T, T::Output)> {
    let path = store_file_path(id, path.as_ref());
    snafu::ensure!(path.exists(), MissingStoreFileSnafu { id: id.to_owned() });

    log::debug!("{path:?} exists, reading '{id}' from it");
    let inert_store_rez = InertStoreResource::read(&path, id)?;
    log::trace!("as {}", std::any::type_name::<T>());
    let stored_definition: T =
        serde_json::from_value(inert_store_rez.local).context(DeserializeSnafu {
            name: id.to_owned(),
        })?;

    log::trace!("  reading remote output JSON value");
    let remote_value: T::Output =
        serde_json::from_value(inert_store_rez.remote).context(DeserializeSnafu {
            name: format!("remote {id}"),
        })?;
    Ok((stored_definition, remote_value))
}

struct StoreNode<Provider> {
    name: String,
    /// Resource id, used to report failures during teardown.
    resource_id: String,
    action: Action,
    run: StoreNodeRunFn<Provider>,
}

struct PreviouslyStored<T: Resource> {
    action: Action,
    resource: Option<(T, T::Output)>,
}

/// A type-erased delete function for a specific resource type.
///
/// Constructed automatically when a resource type is first used via
/// [`Store::resource`], or manually via [`Store::register`]. Produces a
/// [`StoreNodeRunFn`] that reads the store file, deserializes it into the
/// concrete type, calls `T::delete()`, and removes the file.
struct ResourceDeleter<Provider> {
    make_run_fn: Box<
        dyn Fn(
            std::path::PathBuf, // store_path
            String,             // resource_id
        ) -> StoreNodeRunFn<Provider>,
    >,
}

/// A single planned action for a resource.
#[derive(Clone, Debug)]
pub struct PlannedAction {
    /// The resource ID.
    pub id: String,
    /// The action to be taken.
    pub action: Action,
    /// The Rust type name, if known.
    pub type_name: Option<String>,
    /// Whether this is an auto-detected orphan.
    pub is_orphan: bool,
}

/// A plan of actions produced by [`Store::plan`].
///
/// Inspect the plan before passing it to [`Store::apply`] or
/// [`Store::teardown`] to execute.
pub struct Plan<Provider> {
    /// The planned actions, in execution order.
    pub actions: Vec<PlannedAction>,
    /// Resources that appear orphaned but could not be auto-deleted
    /// (unregistered type or missing `type_name` in store file).
    pub warnings: Vec<String>,
    /// Internal: the built schedule.
    schedule: Schedule<Node<StoreNode<Provider>, usize>>,
}

impl<Provider> Plan<Provider> {
    /// Returns true if applying this plan would change anything on the platform.
    pub fn has_changes(&self) -> bool {
        self.actions.iter().any(|a| a.action != Action::Load)
    }
}

impl<Provider> core::fmt::Display for Plan<Provider> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.has_changes() {
            f.write_str("No changes.\n")?;
        }
        for action in &self.actions {
            let orphan_marker = if action.is_orphan { " (orphan)" } else { "" };
            let ty = action.type_name.as_deref().unwrap_or("unknown");
            writeln!(
                f,
                "  {} '{}' [{}]{}",
                action.action, action.id, ty, orphan_marker
            )?;
        }
        for warning in &self.warnings {
            writeln!(f, "  WARNING: {warning}")?;
        }
        Ok(())
    }
}

pub struct Store<T> {
    path: std::path::PathBuf,
    provider: T,
    remotes: Remotes,
    graph: dagga::Dag<StoreNode<T>, usize>,
    deleters: std::collections::HashMap<String, ResourceDeleter<T>>,
}

impl<P: 'static> Store<P> {
    pub fn new(path: impl AsRef<std::path::Path>, provider: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            graph: dagga::Dag::default(),
            remotes: Default::default(),
            provider,
            deleters: Default::default(),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The directory holding this store's resource files.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Ensure a resource type is registered for orphan auto-deletion.
    fn ensure_registered<T>(&mut self)
    where
        T: Resource<Provider = P>,
    {
        let type_name = std::any::type_name::<T>();
        if self.deleters.contains_key(type_name) {
            return;
        }
        self.deleters.insert(
            type_name.to_owned(),
            ResourceDeleter {
                make_run_fn: Box::new(|store_path, resource_id| {
                    Box::new(move |provider: &P| {
                        Box::pin(async move {
                            log::info!("destroy '{resource_id}':");
                            destroy_stored::<T>(provider, &store_path, &resource_id).await
                        }) as Pin<Box<dyn Future<Output = Result<()>> + '_>>
                    })
                }),
            },
        );
    }

    /// Register a resource type for automatic orphan detection and deletion.
    ///
    /// When [`Store::plan`] discovers a store file whose `type_name` matches
    /// this type but no corresponding [`Store::resource`] call was made, it
    /// will schedule the resource for deletion.
    ///
    /// Resource types are registered automatically whenever they are used via
    /// [`Store::resource`]. Call this for types that are **not** declared in
    /// the current run but may still have store files from a previous apply.
    pub fn register<T>(&mut self) -> &mut Self
    where
        T: Resource<Provider = P>,
    {
        self.ensure_registered::<T>();
        self
    }

    /// Forget every declared resource while keeping registered types.
    ///
    /// A plan built afterwards schedules every stored resource for
    /// destruction.
    pub fn clear_resources(&mut self) {
        self.remotes = Remotes::default();
        self.graph = dagga::Dag::default();
    }

    fn read_file<T>(&self, id: &str) -> Result<(T, T::Output), Error>
    where
        T: Resource<Provider = P>,
    {
        read_from_store(&self.path, id)
    }

    fn define_resource<T>(
        &mut self,
        id: &str,
        local_definition: T,
        action: Action,
        stored_definition: Option<T>,
        output: Option<T::Output>,
    ) -> Result<StoreResource<T, T::Output>, Error>
    where
        T: Resource<Provider = P>,
    {
        self.ensure_registered::<T>();
        let (remote_var, rez, ty) = self.remotes.dequeue_var::<T::Output>(id, action)?;
        remote_var.set(output);

        let store_path = self.path.clone();
        let run: StoreNodeRunFn<T::Provider> = Box::new({
            let resource_id = id.to_owned();
            let remote_var = remote_var.clone();
            let local_definition_code = local_definition.clone();
            move |provider: &T::Provider| {
                Box::pin(
                    RunAction {
                        provider,
                        store_path,
                        resource_id,
                        action,
                        local_definition_code,
                        local_definition_store: stored_definition,
                        remote_var,
                    }
                    .run(),
                )
            }
        });

        log::debug!("adding node {action} {id} [{ty}]");
        let node_name = format!("{action} {id}");
        let dag_node = dagga::Node::new(StoreNode {
            name: node_name.clone(),
            resource_id: id.to_owned(),
            action,
            run,
        })
        .with_name(node_name)
        .with_reads({
            // read the resource keys out of "remotes" as dependencies
            let mut reads = vec![];
            for dep in local_definition.dependencies() {
                let var = self
                    .remotes
                    .get(&dep)
                    .context(MissingResourceSnafu { name: dep })?;
                reads.push(var.key);
            }
            reads
        })
        .with_result(rez);
        self.graph.add_node(dag_node);

        Ok(StoreResource {
            name: id.to_owned(),
            local_definition,
            action,
            remote_var,
        })
    }

    /// Read the stored previous definition and determine the action.
    fn determine_action_from_previously_stored<T>(
        &self,
        local_definition: &T,
        id: &str,
    ) -> Result<PreviouslyStored<T>, Error>
    where
        T: Resource<Provider = P>,
    {
        match self.read_file(id) {
            Ok((stored_definition, output)) => {
                // This has already been created and stored, so this is either a simple load,
                // or an update.
                log::debug!("  {output:?}");
                let action = if *local_definition != stored_definition {
                    log::debug!("  local resource has changed, so this remote is now stale");
                    Action::Update
                } else {
                    // Upstream resources that are updated may change the remote
                    // values this resource was built from.
                    let mut may_need_update = false;
                    for dep in local_definition.dependencies() {
                        let var = self.remotes.get(&dep).context(LoadSnafu { name: dep })?;
                        if var.action != Action::Load {
                            may_need_update = true;
                            break;
                        }
                    }
                    if may_need_update {
                        Action::Update
                    } else {
                        Action::Load
                    }
                };

                Ok(PreviouslyStored {
                    action,
                    resource: Some((stored_definition, output)),
                })
            }
            Err(Error::MissingStoreFile { id }) => {
                log::debug!("store file '{id}' does not exist, creating a new resource");
                Ok(PreviouslyStored {
                    action: Action::Create,
                    resource: None,
                })
            }
            Err(e) => {
                log::error!("could not define resource '{id}': {e}");
                Err(e)
            }
        }
    }

    /// Defines a resource.
    ///
    /// Depending on the result of comparing `local_definition` to the one on
    /// file (if it exists), the resource will be:
    /// - created on the platform
    /// - updated on the platform
    /// - loaded from its file
    ///
    /// and then written back to its file.
    pub fn resource<T>(
        &mut self,
        id: impl AsRef<str>,
        local_definition: T,
    ) -> Result<StoreResource<T, T::Output>, Error>
    where
        T: Resource<Provider = P>,
    {
        let id = id.as_ref();
        let PreviouslyStored { action, resource } =
            self.determine_action_from_previously_stored(&local_definition, id)?;
        let (local, remote) = resource
            .map(|(local, remote)| (Some(local), Some(remote)))
            .unwrap_or_default();
        self.define_resource(id, local_definition, action, local, remote)
    }

    /// Reads every store file that is not declared in this run.
    fn scan_orphans(
        &self,
        declared_ids: &std::collections::HashSet<String>,
    ) -> Result<Vec<(String, InertStoreResource)>> {
        let mut orphans = vec![];
        let store_dir = &self.path;
        if !store_dir.exists() {
            return Ok(orphans);
        }
        let entries = std::fs::read_dir(store_dir).context(ScanStoreDirSnafu {
            path: store_dir.clone(),
        })?;
        for entry in entries {
            let entry = entry.context(ScanStoreDirSnafu {
                path: store_dir.clone(),
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let file_stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s.to_owned(),
                None => continue,
            };
            if declared_ids.contains(&file_stem) {
                continue;
            }
            let inert = InertStoreResource::read(&path, &file_stem)?;
            orphans.push((file_stem, inert));
        }
        // Directory order is platform dependent
        orphans.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(orphans)
    }

    /// Scan the store directory and build an execution plan.
    ///
    /// Compares declared resources against store files on disk. Resources
    /// found on disk but not declared are flagged as orphans.
    ///
    /// Orphans whose types are registered are scheduled for deletion after
    /// every resource that depends on them. Unregistered orphans produce
    /// warnings.
    pub fn plan(&mut self) -> Result<Plan<P>> {
        let mut actions = Vec::new();
        let mut warnings = Vec::new();

        let declared_ids = self.remotes.declared_ids();
        for (id, var) in self.remotes.iter() {
            actions.push(PlannedAction {
                id: id.clone(),
                action: var.action,
                type_name: Some(var.ty.to_owned()),
                is_orphan: false,
            });
        }

        // Introduce every deletable orphan before wiring up any edges, so
        // dependencies between orphans resolve regardless of file order.
        let mut deletable = vec![];
        for (id, inert) in self.scan_orphans(&declared_ids)? {
            let type_name = inert.type_name.clone();
            match type_name.as_deref() {
                Some(tn) if self.deleters.contains_key(tn) => {
                    log::info!("orphan detected: '{id}' (type: {tn}), scheduling delete");
                    let (remote_var, rez, _ty) = self
                        .remotes
                        .dequeue_var::<serde_json::Value>(&id, Action::Destroy)?;
                    remote_var.set(Some(inert.remote.clone()));
                    deletable.push((id, inert, rez));
                }
                Some(tn) => {
                    let msg = format!(
                        "Orphaned resource '{id}' (type: {tn}) found in the store \
                        directory but its type is not known to this run. Call \
                        `store.register::<{tn}>()` to enable automatic deletion."
                    );
                    log::warn!("{msg}");
                    warnings.push(msg);
                }
                None => {
                    let msg = format!(
                        "Orphaned resource '{id}' found in the store directory but \
                        its store file has no type_name, remove it by hand."
                    );
                    log::warn!("{msg}");
                    warnings.push(msg);
                }
            }
        }

        for (id, inert, rez) in deletable {
            let type_name = inert.type_name.clone().unwrap_or_default();
            let dep_keys: Vec<usize> = inert
                .dependency_ids()
                .iter()
                .filter_map(|dep| self.remotes.get(dep).map(|v| v.key))
                .collect();

            // The load node introduces the resource into the DAG
            let load_node_name = format!("load {id}");
            let load_node = dagga::Node::new(StoreNode {
                name: load_node_name.clone(),
                resource_id: id.clone(),
                action: Action::Load,
                run: Box::new({
                    let resource_id = id.clone();
                    move |_provider: &P| {
                        Box::pin(async move {
                            log::debug!("loading orphan '{resource_id}' for deletion");
                            Ok(())
                        }) as Pin<Box<dyn Future<Output = Result<()>> + '_>>
                    }
                }),
            })
            .with_name(load_node_name)
            .with_reads(dep_keys.clone())
            .with_result(rez);
            self.graph.add_node(load_node);

            // Reading the dependencies keeps them alive until this resource
            // is gone, which yields reverse dependency order.
            let destroy_node_name = format!("destroy {id}");
            let run_fn = match self.deleters.get(&type_name) {
                Some(deleter) => (deleter.make_run_fn)(self.path.clone(), id.clone()),
                None => continue,
            };
            let destroy_node = dagga::Node::new(StoreNode {
                name: destroy_node_name.clone(),
                resource_id: id.clone(),
                action: Action::Destroy,
                run: run_fn,
            })
            .with_name(destroy_node_name)
            .with_reads(dep_keys)
            .with_move(rez);
            self.graph.add_node(destroy_node);

            actions.push(PlannedAction {
                id,
                action: Action::Destroy,
                type_name: Some(type_name),
                is_orphan: true,
            });
        }

        let graph = std::mem::take(&mut self.graph);
        let schedule = graph
            .build_schedule()
            .map_err(|e| Error::Schedule { msg: e.to_string() })?;

        // Reorder actions to match the schedule's execution order. The
        // position of a resource is the position of its first node, except
        // for destroys which are ordered by their destroy node.
        let mut ordered_actions = Vec::with_capacity(actions.len());
        for batch in &schedule.batches {
            for node in batch {
                let store_node = node.inner();
                if let Some(pos) = actions.iter().position(|a| {
                    a.id == store_node.resource_id
                        && (a.action != Action::Destroy || store_node.action == Action::Destroy)
                }) {
                    ordered_actions.push(actions.swap_remove(pos));
                }
            }
        }
        ordered_actions.extend(actions);

        Ok(Plan {
            actions: ordered_actions,
            warnings,
            schedule,
        })
    }

    /// Execute a plan previously built by [`Store::plan`].
    ///
    /// Stops at the first failing action.
    pub async fn apply(&mut self, plan: Plan<P>) -> Result<()> {
        for (i, batch) in plan.schedule.batches.into_iter().enumerate() {
            for (j, node) in batch.into_iter().enumerate() {
                let store_node = node.into_inner();
                log::debug!("applying node {j} '{}', batch {i}", store_node.name);
                (store_node.run)(&self.provider).await?;
            }
        }
        Ok(())
    }

    /// Execute a plan, carrying on past failing destroys.
    ///
    /// A resource whose destroy fails keeps its store file, so running the
    /// teardown again retries it. Resources it depends on are still
    /// attempted. All failures are reported together at the end.
    pub async fn teardown(&mut self, plan: Plan<P>) -> Result<()> {
        let mut failures = vec![];
        for (i, batch) in plan.schedule.batches.into_iter().enumerate() {
            for (j, node) in batch.into_iter().enumerate() {
                let store_node = node.into_inner();
                log::debug!("tearing down node {j} '{}', batch {i}", store_node.name);
                let resource_id = store_node.resource_id.clone();
                match (store_node.run)(&self.provider).await {
                    Ok(()) => {}
                    Err(e) if store_node.action == Action::Destroy => {
                        log::error!("could not destroy '{resource_id}': {e}");
                        failures.push(format!("{resource_id}: {e}"));
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        snafu::ensure!(failures.is_empty(), TeardownSnafu { failures });
        Ok(())
    }
}
