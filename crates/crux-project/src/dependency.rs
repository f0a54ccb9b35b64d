//! The include/dependent graph over file ids.
//!
//! The graph owns every node in a single table; nodes refer to peers by id,
//! never by reference. Include semantics make the graph acyclic in practice,
//! but nothing here relies on that: traversals carry a visited set.

use std::collections::{BTreeSet, HashMap, VecDeque};

use crux_core::FileId;
use crux_vfs::PathRegistry;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyNode {
    pub includes: BTreeSet<FileId>,
    pub dependents: BTreeSet<FileId>,
}

/// Traversal direction for [`DependencyGraph::dependencies`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyMode {
    /// All files that transitively include the argument.
    DependsOnArg,
    /// All files the argument transitively includes.
    ArgDependsOn,
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<FileId, DependencyNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_or_get(&mut self, file: FileId) -> &mut DependencyNode {
        self.nodes.entry(file).or_default()
    }

    pub fn node(&self, file: FileId) -> Option<&DependencyNode> {
        self.nodes.get(&file)
    }

    pub fn contains(&self, file: FileId) -> bool {
        self.nodes.contains_key(&file)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn files(&self) -> impl Iterator<Item = FileId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FileId, &DependencyNode)> + '_ {
        self.nodes.iter().map(|(&file, node)| (file, node))
    }

    /// Establishes `includer → includee` in both directions. Idempotent.
    pub fn link(&mut self, includer: FileId, includee: FileId) {
        debug_assert!(includer.is_valid() && includee.is_valid());
        self.insert_or_get(includer).includes.insert(includee);
        self.insert_or_get(includee).dependents.insert(includer);
    }

    /// Replaces `includer`'s include set with exactly `includes`, updating
    /// reverse links on both the dropped and the added peers.
    pub fn set_includes(&mut self, includer: FileId, includes: impl IntoIterator<Item = FileId>) {
        let new: BTreeSet<FileId> = includes.into_iter().collect();
        let old = std::mem::take(&mut self.insert_or_get(includer).includes);

        for dropped in old.difference(&new) {
            if let Some(node) = self.nodes.get_mut(dropped) {
                node.dependents.remove(&includer);
            }
        }
        for added in new.iter() {
            self.insert_or_get(*added).dependents.insert(includer);
        }
        self.insert_or_get(includer).includes = new;
    }

    /// Unlinks `file` from every peer and deletes the node. O(deg).
    pub fn remove(&mut self, file: FileId) {
        let Some(node) = self.nodes.remove(&file) else {
            return;
        };
        for peer in node.includes {
            if let Some(peer_node) = self.nodes.get_mut(&peer) {
                peer_node.dependents.remove(&file);
            }
        }
        for peer in node.dependents {
            if let Some(peer_node) = self.nodes.get_mut(&peer) {
                peer_node.includes.remove(&file);
            }
        }
    }

    /// Transitive closure from `file` in the requested direction.
    ///
    /// `file` itself is excluded unless it is reachable through a cycle, in
    /// which case it appears exactly once. An unknown file yields an empty
    /// set.
    pub fn dependencies(&self, file: FileId, mode: DependencyMode) -> BTreeSet<FileId> {
        let mut out = BTreeSet::new();
        let Some(start) = self.nodes.get(&file) else {
            return out;
        };

        let edges = |node: &DependencyNode| -> Vec<FileId> {
            match mode {
                DependencyMode::DependsOnArg => node.dependents.iter().copied().collect(),
                DependencyMode::ArgDependsOn => node.includes.iter().copied().collect(),
            }
        };

        let mut seen: BTreeSet<FileId> = BTreeSet::new();
        let mut queue: VecDeque<FileId> = edges(start).into();
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            out.insert(next);
            if let Some(node) = self.nodes.get(&next) {
                queue.extend(edges(node));
            }
        }
        out
    }

    pub fn depends_on(&self, source: FileId, header: FileId) -> bool {
        self.dependencies(source, DependencyMode::ArgDependsOn)
            .contains(&header)
    }

    /// Human-readable dependency listing for diagnostics.
    ///
    /// With a file, lists both directions for that file; otherwise lists
    /// every node with its direct includes.
    pub fn dump(&self, registry: &PathRegistry, file: Option<FileId>) -> String {
        let path_of = |id: FileId| -> String {
            registry
                .path(id)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| format!("<file {}>", id.to_raw()))
        };

        let mut out = String::new();
        match file {
            Some(file) => {
                out.push_str(&format!("{} is depended on by:\n", path_of(file)));
                for dep in self.dependencies(file, DependencyMode::DependsOnArg) {
                    out.push_str(&format!("  {}\n", path_of(dep)));
                }
                out.push_str(&format!("{} depends on:\n", path_of(file)));
                for dep in self.dependencies(file, DependencyMode::ArgDependsOn) {
                    out.push_str(&format!("  {}\n", path_of(dep)));
                }
            }
            None => {
                let mut files: Vec<FileId> = self.nodes.keys().copied().collect();
                files.sort();
                for file in files {
                    out.push_str(&format!("{}:\n", path_of(file)));
                    if let Some(node) = self.nodes.get(&file) {
                        for include in &node.includes {
                            out.push_str(&format!("  includes {}\n", path_of(*include)));
                        }
                        for dependent in &node.dependents {
                            out.push_str(&format!("  depended on by {}\n", path_of(*dependent)));
                        }
                    }
                }
            }
        }
        out
    }
}
