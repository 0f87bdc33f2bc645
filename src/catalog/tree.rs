use crate::ebay::taxonomy::{CategoryTreeNode, CategoryTreeResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub level: u32,
    pub leaf: bool,
}

/// Flattened taxonomy snapshot. Replaced wholesale, never patched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryTree {
    pub tree_id: String,
    pub version: String,
    pub fetched_at: DateTime<Utc>,
    pub categories: HashMap<String, Category>,
}

impl CategoryTree {
    pub fn empty() -> Self {
        Self {
            tree_id: "0".into(),
            version: String::new(),
            fetched_at: DateTime::<Utc>::default(),
            categories: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    /// Flattens a taxonomy download. The synthetic root node is dropped, so
    /// top-level categories sit at level 1 with no parent.
    pub fn from_taxonomy(response: CategoryTreeResponse, fetched_at: DateTime<Utc>) -> Self {
        let mut categories = HashMap::new();
        let mut stack: Vec<(CategoryTreeNode, Option<String>, u32)> = response
            .root_category_node
            .child_category_tree_nodes
            .into_iter()
            .map(|node| (node, None, 1))
            .collect();
        while let Some((node, parent_id, level)) = stack.pop() {
            let id = node.category.category_id.clone();
            let leaf = node.child_category_tree_nodes.is_empty();
            for child in node.child_category_tree_nodes {
                stack.push((child, Some(id.clone()), level + 1));
            }
            categories.insert(
                id.clone(),
                Category {
                    id,
                    name: node.category.category_name,
                    parent_id,
                    level,
                    leaf,
                },
            );
        }
        Self {
            tree_id: response.category_tree_id,
            version: response.category_tree_version,
            fetched_at,
            categories,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Category> {
        self.categories.get(id)
    }

    /// Root-to-leaf names joined by `" > "`. Stops at a missing parent or a cycle.
    pub fn path(&self, id: &str) -> Option<String> {
        let mut names = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.categories.get(id)?;
        loop {
            if !seen.insert(current.id.as_str()) {
                break;
            }
            names.push(current.name.as_str());
            match current.parent_id.as_deref().and_then(|pid| self.categories.get(pid)) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        names.reverse();
        Some(names.join(" > "))
    }

    /// First segment of the category's path.
    pub fn root_name(&self, id: &str) -> Option<String> {
        self.path(id)
            .and_then(|path| path.split(" > ").next().map(str::to_string))
    }

    /// Case-insensitive substring match over names, shallowest first.
    pub fn search(&self, keyword: &str, leaf_only: bool) -> Vec<&Category> {
        let needle = keyword.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<&Category> = self
            .categories
            .values()
            .filter(|c| !leaf_only || c.leaf)
            .filter(|c| c.name.to_lowercase().contains(&needle))
            .collect();
        hits.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.name.cmp(&b.name)));
        hits
    }

    pub fn leaves(&self, min_level: u32, max_level: u32) -> Vec<&Category> {
        let mut leaves: Vec<&Category> = self
            .categories
            .values()
            .filter(|c| c.leaf && (min_level..=max_level).contains(&c.level))
            .collect();
        leaves.sort_by(|a, b| a.id.cmp(&b.id));
        leaves
    }
}
