//! Response paths: an ordered sequence of string-or-integer edges from the
//! response root.
//!
//! Paths are shared heavily: every deferred fragment and execution group
//! nested under a common ancestor shares that ancestor's prefix. We keep the
//! teacher's habit (see `apollo-federation::operation`) of representing
//! shared, immutable trees as `Arc`-linked chains rather than flat, cloned
//! `Vec`s, and only flatten to a `Vec<PathElement>` when producing the wire
//! shape.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// One edge of a response path: a field name or a list index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PathElement {
    Field(String),
    Index(usize),
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Field(name) => write!(f, "{name}"),
            PathElement::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for PathElement {
    fn from(value: &str) -> Self {
        PathElement::Field(value.to_owned())
    }
}

impl From<String> for PathElement {
    fn from(value: String) -> Self {
        PathElement::Field(value)
    }
}

impl From<usize> for PathElement {
    fn from(value: usize) -> Self {
        PathElement::Index(value)
    }
}

#[derive(Debug, PartialEq, Eq)]
struct PathNode {
    parent: Option<Path>,
    edge: PathElement,
}

/// A response path, represented as a parent/edge chain shared through `Arc`
/// so that extending a path never touches the ancestor's representation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Path {
    node: Option<Arc<PathNode>>,
}

impl Path {
    /// The empty, root path.
    pub fn root() -> Self {
        Self { node: None }
    }

    /// Extend this path with one more edge.
    pub fn push(&self, edge: impl Into<PathElement>) -> Self {
        Self {
            node: Some(Arc::new(PathNode {
                parent: Some(self.clone()),
                edge: edge.into(),
            })),
        }
    }

    /// Build a path directly from a flat list of edges, root first.
    pub fn from_elements(elements: impl IntoIterator<Item = PathElement>) -> Self {
        let mut path = Self::root();
        for element in elements {
            path = path.push_element(element);
        }
        path
    }

    fn push_element(&self, edge: PathElement) -> Self {
        Self {
            node: Some(Arc::new(PathNode {
                parent: Some(self.clone()),
                edge,
            })),
        }
    }

    /// Number of edges from the root.
    pub fn len(&self) -> usize {
        let mut len = 0;
        let mut current = self;
        let mut owned;
        loop {
            match &current.node {
                None => return len,
                Some(node) => {
                    len += 1;
                    owned = node.parent.clone().unwrap_or_else(Path::root);
                    current = &owned;
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.node.is_none()
    }

    /// Flatten to a `Vec<PathElement>`, root first.
    pub fn to_vec(&self) -> Vec<PathElement> {
        let mut elements = Vec::with_capacity(self.len());
        self.collect_into(&mut elements);
        elements
    }

    fn collect_into(&self, out: &mut Vec<PathElement>) {
        if let Some(node) = &self.node {
            if let Some(parent) = &node.parent {
                parent.collect_into(out);
            }
            out.push(node.edge.clone());
        }
    }

    /// The suffix of this path after dropping its first `prefix_len` edges,
    /// used to compute `subPath` relative to a released ancestor fragment.
    pub fn suffix_after(&self, prefix_len: usize) -> Vec<PathElement> {
        let full = self.to_vec();
        if prefix_len >= full.len() {
            Vec::new()
        } else {
            full[prefix_len..].to_vec()
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elements = self.to_vec();
        write!(f, "/")?;
        for (i, element) in elements.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{element}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_root_first() {
        let path = Path::root().push("a").push(1usize).push("b");
        assert_eq!(
            path.to_vec(),
            vec![
                PathElement::Field("a".into()),
                PathElement::Index(1),
                PathElement::Field("b".into()),
            ]
        );
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn shares_structure_with_ancestors() {
        let base = Path::root().push("a");
        let left = base.push("left");
        let right = base.push("right");
        assert_eq!(left.suffix_after(1), vec![PathElement::Field("left".into())]);
        assert_eq!(right.suffix_after(1), vec![PathElement::Field("right".into())]);
        assert_eq!(base.len(), 1);
    }

    #[test]
    fn suffix_after_full_length_is_empty() {
        let path = Path::root().push("a").push("b");
        assert!(path.suffix_after(2).is_empty());
        assert!(path.suffix_after(5).is_empty());
    }
}
