/// Hierarchical member identifiers.
///
/// An `Id` is a path of fork sequence numbers. Founders sit at depth 1
/// (`[0]`, `[1]`, ...); every invited member extends its inviter's path with
/// the inviter's own invite counter, so two members can never be issued the
/// same Id without any coordination.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("Root id {0} has no parent")]
    NoParent(Id),

    #[error("Id path is empty")]
    EmptyPath,
}

/// Path from a founder down to a member. Ordered lexicographically by path,
/// which places every parent before its descendants.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<u32>")]
pub struct Id(Vec<u32>);

impl Id {
    /// The single founder of a chat created by one member.
    pub fn creator() -> Self {
        Id(vec![0])
    }

    /// The `index`-th founder of a multi-founder chat. `founder(0) == creator()`.
    pub fn founder(index: u32) -> Self {
        Id(vec![index])
    }

    /// Rebuild an Id from a non-empty path.
    pub fn from_path(path: Vec<u32>) -> Option<Self> {
        if path.is_empty() {
            None
        } else {
            Some(Id(path))
        }
    }

    /// Derive the child Id for invite number `sequence`.
    pub fn fork(&self, sequence: u32) -> Self {
        let mut path = Vec::with_capacity(self.0.len() + 1);
        path.extend_from_slice(&self.0);
        path.push(sequence);
        Id(path)
    }

    pub fn parent(&self) -> Result<Id, IdError> {
        match self.0.split_last() {
            Some((_, rest)) if !rest.is_empty() => Ok(Id(rest.to_vec())),
            _ => Err(IdError::NoParent(self.clone())),
        }
    }

    pub fn is_root(&self) -> bool {
        self.0.len() == 1
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// True if `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &Id) -> bool {
        other.0.len() > self.0.len() && other.0.starts_with(&self.0)
    }

    pub fn path(&self) -> &[u32] {
        &self.0
    }
}

impl TryFrom<Vec<u32>> for Id {
    type Error = IdError;

    fn try_from(path: Vec<u32>) -> Result<Self, IdError> {
        Id::from_path(path).ok_or(IdError::EmptyPath)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for step in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{}", step)?;
            first = false;
        }
        Ok(())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}
