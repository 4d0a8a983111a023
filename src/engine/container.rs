use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Opaque, application-specific container data attached by a
/// [`RucksackPacker`].
pub type Rucksack = Arc<dyn Any + Send + Sync>;

/// An alive container, that is, a container with a process attached.
#[derive(Clone, Default)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    pub pid: i32,
    pub project: Option<String>,
    pub paused: bool,
    pub rucksack: Option<Rucksack>,
}

impl Container {
    pub fn has_label(&self, key: &str) -> bool {
        self.labels.contains_key(key)
    }

    /// Downcasts the rucksack contents, if any.
    pub fn rucksack<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.rucksack.as_ref().and_then(|r| r.downcast_ref::<T>())
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("labels", &self.labels)
            .field("pid", &self.pid)
            .field("project", &self.project)
            .field("paused", &self.paused)
            .field("rucksack", &self.rucksack.is_some())
            .finish()
    }
}

/// Adds application-specific information to a freshly inspected container,
/// given the engine's own inspection details of type `D`.
pub trait RucksackPacker<D>: Send + Sync {
    fn pack(&self, container: &mut Container, details: &D);
}

impl<D, F> RucksackPacker<D> for F
where
    F: Fn(&mut Container, &D) + Send + Sync,
{
    fn pack(&self, container: &mut Container, details: &D) {
        self(container, details)
    }
}
