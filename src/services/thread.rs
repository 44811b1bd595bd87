//! Materialized paths for comment threads.
//!
//! Every comment carries a path made of one fixed-width, zero-padded id
//! segment per ancestor (itself included), e.g. `000005.000009.000012`.
//! Ancestors are lexical prefixes of their descendants and siblings sort in
//! id order, so `ORDER BY path` walks a thread depth-first.

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathScheme {
    width: usize,
    separator: char,
}

impl PathScheme {
    pub const DEFAULT_WIDTH: usize = 6;
    pub const SEPARATOR: char = '.';

    pub fn new(width: usize) -> Self {
        Self {
            width: width.clamp(1, 18),
            separator: Self::SEPARATOR,
        }
    }

    /// Largest id that still fits in one segment.
    pub fn max_id(&self) -> i64 {
        10i64.pow(self.width as u32) - 1
    }

    pub fn segment(&self, id: i64) -> Result<String> {
        if id < 0 || id > self.max_id() {
            return Err(AppError::Internal(format!(
                "comment id {} does not fit a {}-digit path segment",
                id, self.width
            )));
        }
        Ok(format!("{:0width$}", id, width = self.width))
    }

    pub fn child_path(&self, parent_path: Option<&str>, id: i64) -> Result<String> {
        let segment = self.segment(id)?;
        Ok(match parent_path {
            Some(parent) => format!("{}{}{}", parent, self.separator, segment),
            None => segment,
        })
    }

    /// Path of the thread root a path belongs to.
    pub fn root<'a>(&self, path: &'a str) -> &'a str {
        path.split_once(self.separator).map_or(path, |(root, _)| root)
    }

    pub fn level(&self, path: &str) -> usize {
        path.split(self.separator).count().saturating_sub(1)
    }
}

impl Default for PathScheme {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WIDTH)
    }
}

/// Literal starts-with test used for subtree propagation.
pub fn in_subtree(root_path: &str, candidate: &str) -> bool {
    candidate.starts_with(root_path)
}
