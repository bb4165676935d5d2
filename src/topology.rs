//! Storage Topology Model
//!
//! Declares the btrfs subvolumes of the target system, where each one is
//! mounted, and which subvolume has to be mounted before another can be.
//!
//! # Rules
//!
//! - Names are unique and relative to the raw volume's top level
//!   (`@home`, `@snapshots/home`).
//! - Exactly one parentless subvolume may exist, and it is mounted at `/`.
//! - No name is a directory component of another (`@snapshots` vs.
//!   `@snapshots/home`), so creating one never collides with the other.
//! - A child's mount path lies strictly under its parent's mount path, and
//!   the parent is the nearest declared mount above it.
//! - No two subvolumes share a mount path.
//! - The model is write-once: nothing is ever removed or changed.
//!
//! Because a parent must already be declared when its child is, the declared
//! graph is always a forest and `topological_order` cannot fail in practice.

use crate::error::{PlanError, TopologyError};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// One declared subvolume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subvolume {
    /// Path of the subvolume relative to the raw volume top level
    pub name: String,
    /// Absolute mount path in the target system
    pub mount_path: PathBuf,
    /// Subvolume that must be mounted first
    pub parent: Option<String>,
}

impl Subvolume {
    /// Returns true for the subvolume mounted at `/`.
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Mount path relative to `/`, suitable for `Path::join`.
    pub fn relative_mount(&self) -> &Path {
        self.mount_path
            .strip_prefix("/")
            .unwrap_or(self.mount_path.as_path())
    }
}

/// Write-once registry of subvolumes, kept in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    subvolumes: Vec<Subvolume>,
    index: HashMap<String, usize>,
}

/// The reference VM layout: `(name, mount path, parent)` in declaration order.
const REFERENCE_LAYOUT: &[(&str, &str, Option<&str>)] = &[
    ("@", "/", None),
    ("@home", "/home", Some("@")),
    ("@var", "/var", Some("@")),
    ("@snapshots/root", "/.snapshots", Some("@")),
    ("@var_log", "/var/log", Some("@var")),
    ("@var_cache", "/var/cache", Some("@var")),
    ("@var_tmp", "/var/tmp", Some("@var")),
    ("@snapshots/home", "/home/.snapshots", Some("@home")),
];

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in layout used when no layout file is given.
    pub fn reference() -> Self {
        let mut topology = Self::new();
        for (name, mount, parent) in REFERENCE_LAYOUT {
            if let Err(e) = topology.declare(name, mount, *parent) {
                // The table above is static; reaching this is a programming error.
                unreachable!("reference layout is invalid: {}", e);
            }
        }
        topology
    }

    /// Register a subvolume.
    ///
    /// # Errors
    ///
    /// - `DuplicateName` if `name` is already declared
    /// - `UnknownParent` if `parent` was never declared
    /// - `NameConflict` if `name` and a declared name contain one another
    /// - `InvalidParent` if the parent's mount path is not a strict prefix of
    ///   `mount_path`, or another subvolume is mounted between the two
    /// - `MountConflict` if `mount_path` is taken, or would cover a subvolume
    ///   that was declared under a different parent
    /// - `InvalidMountPath` for relative or `..` mount paths, malformed names,
    ///   a parentless subvolume not mounted at `/`, or a second root
    pub fn declare(
        &mut self,
        name: &str,
        mount_path: impl AsRef<Path>,
        parent: Option<&str>,
    ) -> Result<(), TopologyError> {
        let mount_path = mount_path.as_ref();

        if self.index.contains_key(name) {
            return Err(TopologyError::DuplicateName {
                name: name.to_string(),
            });
        }
        validate_name(name)?;
        if let Some(existing) = self
            .subvolumes
            .iter()
            .find(|sv| names_overlap(&sv.name, name))
        {
            return Err(TopologyError::NameConflict {
                name: name.to_string(),
                existing: existing.name.clone(),
            });
        }

        if !mount_path.is_absolute() {
            return Err(TopologyError::invalid_mount(
                name,
                format!("mount path {} is not absolute", mount_path.display()),
            ));
        }
        if mount_path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
        {
            return Err(TopologyError::invalid_mount(
                name,
                format!("mount path {} must be normalized", mount_path.display()),
            ));
        }

        match parent {
            Some(parent_name) => {
                let parent_sv = self.get(parent_name).ok_or_else(|| {
                    TopologyError::UnknownParent {
                        name: name.to_string(),
                        parent: parent_name.to_string(),
                    }
                })?;
                // Path comparison is per component: /home does not contain /homework
                if mount_path == parent_sv.mount_path
                    || !mount_path.starts_with(&parent_sv.mount_path)
                {
                    return Err(TopologyError::InvalidParent {
                        name: name.to_string(),
                        mount_path: mount_path.to_path_buf(),
                        parent: parent_name.to_string(),
                        parent_mount: parent_sv.mount_path.clone(),
                    });
                }
                self.check_mount_nesting(name, mount_path, parent_sv)?;
            }
            None => {
                if mount_path != Path::new("/") {
                    return Err(TopologyError::invalid_mount(
                        name,
                        format!(
                            "only the root subvolume may omit a parent, and it must be \
                             mounted at / (got {})",
                            mount_path.display()
                        ),
                    ));
                }
                if let Some(root) = self.root() {
                    return Err(TopologyError::invalid_mount(
                        name,
                        format!("root subvolume '{}' is already declared", root.name),
                    ));
                }
            }
        }

        debug!(
            "declare subvolume {} at {} (parent: {:?})",
            name,
            mount_path.display(),
            parent
        );
        self.index.insert(name.to_string(), self.subvolumes.len());
        self.subvolumes.push(Subvolume {
            name: name.to_string(),
            mount_path: mount_path.to_path_buf(),
            parent: parent.map(str::to_string),
        });
        Ok(())
    }

    /// Every mount is made after its parent's, so the parent must be the
    /// deepest mount above `mount_path`, and nothing already declared may sit
    /// below `mount_path`.
    fn check_mount_nesting(
        &self,
        name: &str,
        mount_path: &Path,
        parent: &Subvolume,
    ) -> Result<(), TopologyError> {
        for other in &self.subvolumes {
            // Covers an identical mount path as well
            if other.mount_path.starts_with(mount_path) {
                return Err(TopologyError::MountConflict {
                    name: name.to_string(),
                    mount_path: mount_path.to_path_buf(),
                    other: other.name.clone(),
                    other_mount: other.mount_path.clone(),
                });
            }
            if other.name != parent.name
                && mount_path.starts_with(&other.mount_path)
                && other.mount_path.starts_with(&parent.mount_path)
            {
                return Err(TopologyError::InvalidParent {
                    name: name.to_string(),
                    mount_path: mount_path.to_path_buf(),
                    parent: parent.name.clone(),
                    parent_mount: parent.mount_path.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Subvolume> {
        self.index.get(name).map(|&i| &self.subvolumes[i])
    }

    /// The parentless subvolume mounted at `/`, if declared.
    pub fn root(&self) -> Option<&Subvolume> {
        self.subvolumes.iter().find(|sv| sv.is_root())
    }

    /// Direct dependents of `name`, in declaration order.
    pub fn children(&self, name: &str) -> Vec<&Subvolume> {
        self.subvolumes
            .iter()
            .filter(|sv| sv.parent.as_deref() == Some(name))
            .collect()
    }

    /// Subvolumes in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Subvolume> {
        self.subvolumes.iter()
    }

    pub fn len(&self) -> usize {
        self.subvolumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subvolumes.is_empty()
    }

    /// Deterministic linearization: parents before children, siblings in
    /// declaration order.
    ///
    /// Kahn's algorithm over the parent edges with a FIFO queue seeded in
    /// declaration order.
    pub fn topological_order(&self) -> Result<Vec<&Subvolume>, PlanError> {
        let count = self.subvolumes.len();
        let mut in_degree = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (i, sv) in self.subvolumes.iter().enumerate() {
            if let Some(parent) = &sv.parent {
                if let Some(&p) = self.index.get(parent) {
                    in_degree[i] += 1;
                    dependents[p].push(i);
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(count);

        while let Some(i) = queue.pop_front() {
            order.push(&self.subvolumes[i]);
            for &d in &dependents[i] {
                in_degree[d] -= 1;
                if in_degree[d] == 0 {
                    queue.push_back(d);
                }
            }
        }

        if order.len() != count {
            let remaining = (0..count)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.subvolumes[i].name.clone())
                .collect();
            return Err(PlanError::Cycle { remaining });
        }
        Ok(order)
    }
}

/// Names are relative paths without `.`/`..` or empty components.
fn validate_name(name: &str) -> Result<(), TopologyError> {
    if name.is_empty() {
        return Err(TopologyError::invalid_mount(name, "name is empty"));
    }
    if name.starts_with('/') {
        return Err(TopologyError::invalid_mount(
            name,
            "name must be relative to the volume top level",
        ));
    }
    if name
        .split('/')
        .any(|part| part.is_empty() || part == "." || part == "..")
    {
        return Err(TopologyError::invalid_mount(
            name,
            "name contains an empty, '.' or '..' component",
        ));
    }
    Ok(())
}

/// True if one name is the other or a directory component of it.
fn names_overlap(a: &str, b: &str) -> bool {
    Path::new(a).starts_with(b) || Path::new(b).starts_with(a)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names<'a>(order: &[&'a Subvolume]) -> Vec<&'a str> {
        order.iter().map(|sv| sv.name.as_str()).collect()
    }

    #[test]
    fn test_duplicate_name_leaves_topology_unchanged() {
        let mut topo = Topology::new();
        topo.declare("@", "/", None).expect("root");
        topo.declare("@home", "/home", Some("@")).expect("home");

        let err = topo.declare("@home", "/srv", Some("@")).unwrap_err();
        assert!(matches!(err, TopologyError::DuplicateName { .. }));
        assert_eq!(topo.len(), 2);
        assert_eq!(topo.get("@home").map(|sv| sv.mount_path.as_path()), Some(Path::new("/home")));
    }

    #[test]
    fn test_parent_must_strictly_contain_child() {
        let mut topo = Topology::new();
        topo.declare("@", "/", None).expect("root");
        topo.declare("@home", "/home", Some("@")).expect("home");

        for bad in ["/homework", "/home", "/srv/home"] {
            let err = topo.declare("@x", bad, Some("@home")).unwrap_err();
            assert!(
                matches!(err, TopologyError::InvalidParent { .. }),
                "{} should be rejected",
                bad
            );
        }
        assert_eq!(topo.len(), 2);
        topo.declare("@x", "/home/x", Some("@home")).expect("nested");
    }

    #[test]
    fn test_parent_must_be_nearest_enclosing_mount() {
        let mut topo = Topology::new();
        topo.declare("@", "/", None).expect("root");
        topo.declare("@home", "/home", Some("@")).expect("home");

        // /home is mounted over /, so /home/x has to wait for @home
        let err = topo.declare("@x", "/home/x", Some("@")).unwrap_err();
        assert_eq!(
            err,
            TopologyError::InvalidParent {
                name: "@x".to_string(),
                mount_path: PathBuf::from("/home/x"),
                parent: "@".to_string(),
                parent_mount: PathBuf::from("/"),
            }
        );
        assert_eq!(topo.len(), 2);
        topo.declare("@x", "/home/x", Some("@home")).expect("nearest parent");
    }

    #[test]
    fn test_enclosing_mount_declared_late_is_rejected() {
        let mut topo = Topology::new();
        topo.declare("@", "/", None).expect("root");
        topo.declare("@x", "/home/x", Some("@")).expect("x");

        let err = topo.declare("@home", "/home", Some("@")).unwrap_err();
        assert!(matches!(
            err,
            TopologyError::MountConflict { ref other, .. } if other == "@x"
        ));
        assert!(topo.get("@home").is_none());
    }

    #[test]
    fn test_mount_path_taken() {
        let mut topo = Topology::new();
        topo.declare("@", "/", None).expect("root");
        topo.declare("@srv", "/srv", Some("@")).expect("srv");
        assert!(matches!(
            topo.declare("@srv2", "/srv", Some("@")),
            Err(TopologyError::MountConflict { .. })
        ));
    }

    #[test]
    fn test_overlapping_names_rejected() {
        let mut topo = Topology::new();
        topo.declare("@", "/", None).expect("root");
        topo.declare("@snapshots/home", "/home", Some("@")).expect("nested name");

        for (bad, existing) in [
            ("@snapshots", "@snapshots/home"),
            ("@snapshots/home/old", "@snapshots/home"),
            ("@/srv", "@"),
        ] {
            let err = topo.declare(bad, "/snap2", Some("@")).unwrap_err();
            assert_eq!(
                err,
                TopologyError::NameConflict {
                    name: bad.to_string(),
                    existing: existing.to_string(),
                }
            );
        }
        assert_eq!(topo.len(), 2);

        // Shared directory, distinct components
        topo.declare("@snapshots/root", "/.snapshots", Some("@")).expect("sibling name");
        topo.declare("@snap", "/snap2", Some("@")).expect("not a component");
    }

    #[test]
    fn test_unknown_parent() {
        let mut topo = Topology::new();
        topo.declare("@", "/", None).expect("root");
        let err = topo.declare("@var_log", "/var/log", Some("@var")).unwrap_err();
        assert_eq!(
            err,
            TopologyError::UnknownParent {
                name: "@var_log".to_string(),
                parent: "@var".to_string()
            }
        );
    }

    #[test]
    fn test_root_rules() {
        let mut topo = Topology::new();
        assert!(matches!(
            topo.declare("@data", "/data", None),
            Err(TopologyError::InvalidMountPath { .. })
        ));
        topo.declare("@", "/", None).expect("root");
        assert!(matches!(
            topo.declare("@other", "/", None),
            Err(TopologyError::InvalidMountPath { .. })
        ));
        assert!(matches!(
            topo.declare("@rel", "var", Some("@")),
            Err(TopologyError::InvalidMountPath { .. })
        ));
        assert!(matches!(
            topo.declare("../escape", "/escape", Some("@")),
            Err(TopologyError::InvalidMountPath { .. })
        ));
        assert_eq!(topo.len(), 1);
    }

    #[test]
    fn test_children_in_declaration_order() {
        let topo = Topology::reference();
        let kids: Vec<&str> = topo.children("@var").iter().map(|sv| sv.name.as_str()).collect();
        assert_eq!(kids, vec!["@var_log", "@var_cache", "@var_tmp"]);
        assert!(topo.children("@var_log").is_empty());
        assert!(topo.children("missing").is_empty());
    }

    #[test]
    fn test_topological_order_example() {
        let mut topo = Topology::new();
        topo.declare("rootvol", "/", None).expect("root");
        topo.declare("boot", "/boot", Some("rootvol")).expect("boot");
        topo.declare("home", "/home", Some("rootvol")).expect("home");
        topo.declare("snapshots/home", "/home/.snapshots", Some("home"))
            .expect("snapshots");

        let order = topo.topological_order().expect("linearizable");
        assert_eq!(names(&order), vec!["rootvol", "boot", "home", "snapshots/home"]);
    }

    #[test]
    fn test_deep_nesting() {
        let mut topo = Topology::new();
        topo.declare("r", "/", None).expect("r");
        topo.declare("a", "/a", Some("r")).expect("a");
        topo.declare("b", "/a/b", Some("a")).expect("b");
        topo.declare("c", "/a/b/c", Some("b")).expect("c");
        topo.declare("d", "/a/b/c/d", Some("c")).expect("d");

        let order = topo.topological_order().expect("linearizable");
        assert_eq!(names(&order), vec!["r", "a", "b", "c", "d"]);
    }

    #[test]
    fn test_reference_layout() {
        let topo = Topology::reference();
        assert_eq!(topo.len(), 8);
        assert_eq!(topo.root().map(|sv| sv.name.as_str()), Some("@"));
        let order = topo.topological_order().expect("linearizable");
        assert_eq!(
            names(&order),
            vec![
                "@",
                "@home",
                "@var",
                "@snapshots/root",
                "@snapshots/home",
                "@var_log",
                "@var_cache",
                "@var_tmp",
            ]
        );
    }

    #[test]
    fn test_relative_mount() {
        let topo = Topology::reference();
        let sv = topo.get("@snapshots/home").expect("declared");
        assert_eq!(sv.relative_mount(), Path::new("home/.snapshots"));
        assert_eq!(topo.root().expect("root").relative_mount(), Path::new(""));
    }
}
