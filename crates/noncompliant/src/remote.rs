//! Remote values.
//!
//! A remote value is only known after the resource that produces it has been
//! created on the platform, for example the ARN of a role that a function
//! executes as. Declaring a remote in another resource's definition records a
//! dependency between the two.

use std::{
    any::Any,
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use snafu::OptionExt;

use crate::HasDependencies;

use super::{
    Action, Dependencies, DowncastSnafu, Error, RemoteUnresolvedSnafu, Resource, StoreResource,
};

type VarFn<X> = Arc<dyn Fn(&Arc<dyn Any>) -> Result<X, Error>>;

#[derive(Clone)]
enum RemoteInner<X> {
    /// Read back from a store file.
    Stored {
        depends_on: String,
        last_known_value: Option<X>,
    },
    /// Linked to a resource declared in this run.
    Linked {
        depends_on: String,
        map: VarFn<X>,
        // RemoteVar<T::Output>
        var: Arc<dyn Any>,
    },
}

impl<X> RemoteInner<X> {
    fn depends_on(&self) -> &str {
        match self {
            RemoteInner::Stored { depends_on, .. } | RemoteInner::Linked { depends_on, .. } => {
                depends_on
            }
        }
    }
}

/// A value that becomes known once the resource `depends_on` exists.
#[derive(Clone)]
pub struct Remote<X> {
    inner: RemoteInner<X>,
}

impl<X: Clone + core::fmt::Debug + 'static> std::fmt::Debug for Remote<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remote")
            .field("depends_on", &self.inner.depends_on())
            .field("value", &self.get().ok())
            .finish()
    }
}

/// Two remotes are equal when both are resolved to equal values.
///
/// An unresolved remote is never equal to anything, which makes the
/// resources holding it show up as changed.
impl<X: Clone + core::fmt::Debug + PartialEq + 'static> PartialEq for Remote<X> {
    fn eq(&self, other: &Self) -> bool {
        match (self.get(), other.get()) {
            (Ok(here), Ok(there)) => here == there,
            _ => false,
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct RemoteProxy<T> {
    depends_on: String,
    last_known_value: Option<T>,
}

impl<X: serde::Serialize + Clone + core::fmt::Debug + 'static> serde::Serialize for Remote<X> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let proxy = RemoteProxy {
            last_known_value: self.get().ok(),
            depends_on: self.inner.depends_on().to_owned(),
        };
        proxy.serialize(serializer)
    }
}

impl<'de, X: serde::Deserialize<'de>> serde::Deserialize<'de> for Remote<X> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let RemoteProxy {
            depends_on,
            last_known_value,
        } = RemoteProxy::<X>::deserialize(deserializer)?;

        Ok(Remote {
            inner: RemoteInner::Stored {
                depends_on,
                last_known_value,
            },
        })
    }
}

impl<X: Clone + core::fmt::Debug + 'static> Remote<X> {
    pub(crate) fn new<T: Resource>(
        resource: &StoreResource<T, T::Output>,
        map: impl Fn(&T::Output) -> X + 'static,
    ) -> Self {
        log::trace!(
            "linking a remote value of '{}'",
            resource.remote_var.depends_on
        );
        let depends_on = resource.remote_var.depends_on.clone();
        Self {
            inner: RemoteInner::Linked {
                map: Arc::new({
                    let depends_on = depends_on.clone();
                    move |any: &Arc<dyn Any>| {
                        let remote_var = any
                            .downcast_ref::<RemoteVar<T::Output>>()
                            .context(DowncastSnafu)?;
                        let t_output = remote_var.get().context(RemoteUnresolvedSnafu {
                            ty: core::any::type_name::<X>(),
                            depends_on: depends_on.clone(),
                        })?;
                        Ok(map(&t_output))
                    }
                }),
                depends_on,
                var: Arc::new(resource.remote_var.clone()),
            },
        }
    }

    /// Id of the resource this value comes from.
    pub fn depends_on(&self) -> &str {
        self.inner.depends_on()
    }

    /// Resolve the value.
    ///
    /// ## Errors
    /// Errs with [`Error::RemoteUnresolved`] if the resource this value
    /// depends on has not been applied yet.
    pub fn get(&self) -> Result<X, Error> {
        match &self.inner {
            RemoteInner::Stored {
                depends_on,
                last_known_value,
            } => {
                log::trace!("remote var returning last known value: {last_known_value:?}");
                last_known_value.clone().context(RemoteUnresolvedSnafu {
                    ty: core::any::type_name::<X>(),
                    depends_on: depends_on.clone(),
                })
            }
            RemoteInner::Linked { map, var, .. } => map(var),
        }
    }

    pub fn map<Y>(&self, f: impl Fn(X) -> Y + 'static) -> Remote<Y> {
        match &self.inner {
            RemoteInner::Stored {
                depends_on,
                last_known_value,
            } => Remote {
                inner: RemoteInner::Stored {
                    depends_on: depends_on.clone(),
                    last_known_value: last_known_value.clone().map(f),
                },
            },
            RemoteInner::Linked {
                depends_on,
                map,
                var,
            } => Remote {
                inner: RemoteInner::Linked {
                    depends_on: depends_on.clone(),
                    var: var.clone(),
                    map: Arc::new({
                        let map = map.clone();
                        move |any: &Arc<dyn Any>| {
                            let x = map(any)?;
                            Ok(f(x))
                        }
                    }),
                },
            },
        }
    }
}

impl<X> HasDependencies for Remote<X> {
    fn dependencies(&self) -> Dependencies {
        Dependencies {
            inner: vec![self.inner.depends_on().to_owned()],
        }
    }
}

#[derive(Debug)]
pub(crate) struct RemoteVar<T> {
    depends_on: String,
    inner: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for RemoteVar<T> {
    fn clone(&self) -> Self {
        Self {
            depends_on: self.depends_on.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> RemoteVar<T> {
    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        // A poisoned value is still the last one written
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self) -> Option<T> {
        self.lock().clone()
    }

    pub fn set(&self, value: Option<T>) {
        *self.lock() = value;
    }
}

pub(crate) struct Var {
    pub(crate) key: usize,
    pub(crate) ty: &'static str,
    pub(crate) action: Action,
    pub(crate) remote: Box<dyn core::any::Any>,
}

/// Every resource known to a run, keyed by id.
#[derive(Default)]
pub(crate) struct Remotes {
    vars: HashMap<String, Var>,
}

impl Remotes {
    /// Returns a new `RemoteVar<T>`, its DAG resource key and its type name.
    ///
    /// ## Errors
    /// Errs if a var by the given id exists but is of a different type than
    /// the type requested.
    pub fn dequeue_var<T: Any>(
        &mut self,
        id: &str,
        action: Action,
    ) -> Result<(RemoteVar<T>, usize, &'static str), Error> {
        log::trace!(
            "requested remote var '{id}' of type {}",
            core::any::type_name::<T>()
        );
        let next_k = self.vars.len();
        let var = self.vars.entry(id.to_owned()).or_insert_with(|| Var {
            key: next_k,
            ty: std::any::type_name::<T>(),
            action,
            remote: Box::new(RemoteVar::<T> {
                depends_on: id.to_owned(),
                inner: Default::default(),
            }),
        });
        let remote: &RemoteVar<T> = var.remote.downcast_ref().context(DowncastSnafu)?;
        Ok((remote.clone(), var.key, var.ty))
    }

    pub fn get(&self, id: &str) -> Option<&Var> {
        self.vars.get(id)
    }

    pub fn declared_ids(&self) -> std::collections::HashSet<String> {
        self.vars.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Var)> {
        self.vars.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stored_remote_keeps_its_dependency() {
        let s = serde_json::json!({
            "depends_on": "trail-role",
            "last_known_value": "arn:aws:iam::123456789012:role/trail-role"
        });
        let remote: Remote<String> = serde_json::from_value(s.clone()).unwrap();
        assert_eq!("trail-role", remote.depends_on());
        assert_eq!(
            "arn:aws:iam::123456789012:role/trail-role",
            remote.get().unwrap()
        );
        assert_eq!(
            vec!["trail-role".to_owned()],
            remote.dependencies().into_iter().collect::<Vec<_>>()
        );
        assert_eq!(s, serde_json::to_value(&remote).unwrap());
    }

    #[test]
    fn unresolved_remote_is_never_equal() {
        let s = serde_json::json!({ "depends_on": "bucket", "last_known_value": null });
        let remote: Remote<String> = serde_json::from_value(s).unwrap();
        assert!(matches!(remote.get(), Err(Error::RemoteUnresolved { .. })));
        assert_ne!(remote, remote.clone());

        let mapped = remote.map(|name| name.len());
        assert_eq!("bucket", mapped.depends_on());
    }

    #[test]
    fn dequeue_var_rejects_a_second_type() {
        let mut remotes = Remotes::default();
        let (var, key, _) = remotes.dequeue_var::<String>("role", Action::Create).unwrap();
        var.set(Some("arn".into()));
        let (again, again_key, _) = remotes.dequeue_var::<String>("role", Action::Load).unwrap();
        assert_eq!(key, again_key);
        assert_eq!(Some("arn".to_owned()), again.get());
        assert!(remotes.dequeue_var::<u32>("role", Action::Create).is_err());
    }
}
