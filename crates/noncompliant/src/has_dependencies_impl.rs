//! Implementations of HasDependencies for std types.
//!
//! None of these carry remote values themselves, containers merge the
//! dependencies of their items.

use crate::{Dependencies, HasDependencies};

macro_rules! go {
    ($($type: ty),*) => {
        $(impl HasDependencies for $type {})*
    };
}

go!(String, u8, i8, u16, i16, u32, i32, u64, i64, u128, i128, usize, f32, f64, bool, char);

impl HasDependencies for &'static str {}
impl HasDependencies for () {}

impl<T: HasDependencies> HasDependencies for Vec<T> {
    fn dependencies(&self) -> Dependencies {
        self.iter().fold(Dependencies::default(), |acc, item| {
            acc.merge(item.dependencies())
        })
    }
}

impl<T: HasDependencies> HasDependencies for Option<T> {
    fn dependencies(&self) -> Dependencies {
        self.as_ref()
            .map(HasDependencies::dependencies)
            .unwrap_or_default()
    }
}

impl<T: HasDependencies> HasDependencies for Box<T> {
    fn dependencies(&self) -> Dependencies {
        self.as_ref().dependencies()
    }
}

impl<K, V: HasDependencies> HasDependencies for std::collections::HashMap<K, V> {
    fn dependencies(&self) -> Dependencies {
        self.values().fold(Dependencies::default(), |acc, item| {
            acc.merge(item.dependencies())
        })
    }
}

impl<K, V: HasDependencies> HasDependencies for std::collections::BTreeMap<K, V> {
    fn dependencies(&self) -> Dependencies {
        self.values().fold(Dependencies::default(), |acc, item| {
            acc.merge(item.dependencies())
        })
    }
}

impl<V: HasDependencies> HasDependencies for std::collections::BTreeSet<V> {
    fn dependencies(&self) -> Dependencies {
        self.iter().fold(Dependencies::default(), |acc, item| {
            acc.merge(item.dependencies())
        })
    }
}

impl<A: HasDependencies, B: HasDependencies> HasDependencies for (A, B) {
    fn dependencies(&self) -> Dependencies {
        self.0.dependencies().merge(self.1.dependencies())
    }
}
