use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerEventKind {
    Started,
    Exited,
    Paused,
    Unpaused,
}

impl fmt::Display for ContainerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContainerEventKind::Started => "started",
            ContainerEventKind::Exited => "exited",
            ContainerEventKind::Paused => "paused",
            ContainerEventKind::Unpaused => "unpaused",
        };
        f.write_str(name)
    }
}

/// A lifecycle transition of a single container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub kind: ContainerEventKind,
    pub id: String,
    /// Composer project, when the engine told us. Some engines omit labels
    /// on exit events, so watchers should fall back to what they knew.
    pub project: Option<String>,
}

impl ContainerEvent {
    pub fn new(kind: ContainerEventKind, id: &str, project: Option<&str>) -> Self {
        Self {
            kind,
            id: id.to_string(),
            project: project.map(str::to_string),
        }
    }
}
