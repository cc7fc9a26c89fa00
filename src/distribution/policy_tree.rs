//! Modular policies: sub-goal policies arranged in a tree.
//!
//! Nodes live in an arena and refer to children by index. Flattening walks
//! the tree iteratively in post-order, so every sub-goal policy comes before
//! the policy that depends on it, and rejects trees deeper than the bound.

use rand::Rng;

use crate::constants::MAX_POLICY_TREE_DEPTH;
use crate::covering::generalizer::ValidActions;
use crate::distribution::policy::{fire_first, Policy};
use crate::error::{LearnError, LearnResult};
use crate::logic::predicate::{FactSet, RelationalPredicate};
use crate::logic::query::FactQuery;
use crate::logic::rule::{RuleArena, RuleId};

#[derive(Debug, Clone)]
pub struct PolicyNode {
    pub label: String,
    /// Goal terms the node's rules are evaluated against.
    pub goal_terms: Vec<String>,
    pub policy: Policy,
    children: Vec<usize>,
}

impl PolicyNode {
    pub fn new(label: impl Into<String>, goal_terms: Vec<String>, policy: Policy) -> Self {
        Self {
            label: label.into(),
            goal_terms,
            policy,
            children: Vec::new(),
        }
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }
}

/// One rule of a flattened tree with the goal terms of its node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatRule<'a> {
    pub node: usize,
    pub rule: RuleId,
    pub goal_terms: &'a [String],
}

#[derive(Debug, Clone)]
pub struct PolicyTree {
    nodes: Vec<PolicyNode>,
    max_depth: usize,
}

impl PolicyTree {
    /// Tree with `root` at index 0.
    pub fn new(root: PolicyNode, max_depth: usize) -> Self {
        Self {
            nodes: vec![root],
            max_depth,
        }
    }

    /// Tree bounded by [`MAX_POLICY_TREE_DEPTH`].
    pub fn with_root(root: PolicyNode) -> Self {
        Self::new(root, MAX_POLICY_TREE_DEPTH)
    }

    pub fn root(&self) -> &PolicyNode {
        &self.nodes[0]
    }

    pub fn node(&self, index: usize) -> Option<&PolicyNode> {
        self.nodes.get(index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn depth_of(&self, target: usize) -> Option<usize> {
        let mut stack = vec![(0usize, 0usize)];
        while let Some((index, depth)) = stack.pop() {
            if index == target {
                return Some(depth);
            }
            for &child in &self.nodes[index].children {
                stack.push((child, depth + 1));
            }
        }
        None
    }

    /// Attach `node` under `parent`.
    pub fn add_child(&mut self, parent: usize, node: PolicyNode) -> LearnResult<usize> {
        if parent >= self.nodes.len() {
            return Err(LearnError::PolicyTreeNode(parent));
        }
        let depth = self
            .depth_of(parent)
            .ok_or(LearnError::PolicyTreeNode(parent))?;
        if depth + 1 > self.max_depth {
            return Err(LearnError::PolicyTreeDepth(self.max_depth));
        }
        let index = self.nodes.len();
        self.nodes.push(node);
        self.nodes[parent].children.push(index);
        Ok(index)
    }

    /// Rules of every node, children before parents, siblings in insertion
    /// order.
    pub fn flatten(&self) -> LearnResult<Vec<FlatRule<'_>>> {
        let mut out = Vec::new();
        // (node, depth, children expanded)
        let mut stack: Vec<(usize, usize, bool)> = vec![(0, 0, false)];
        while let Some((index, depth, expanded)) = stack.pop() {
            if depth > self.max_depth {
                return Err(LearnError::PolicyTreeDepth(self.max_depth));
            }
            let node = self
                .nodes
                .get(index)
                .ok_or(LearnError::PolicyTreeNode(index))?;
            if expanded {
                out.extend(node.policy.rules().map(|rule| FlatRule {
                    node: index,
                    rule,
                    goal_terms: &node.goal_terms,
                }));
                continue;
            }
            stack.push((index, depth, true));
            for &child in node.children.iter().rev() {
                stack.push((child, depth + 1, false));
            }
        }
        Ok(out)
    }

    /// First firing rule across the flattened tree.
    pub fn choose_action<R: Rng + ?Sized>(
        &self,
        arena: &RuleArena,
        matcher: &dyn FactQuery,
        facts: &FactSet,
        valid_actions: &ValidActions,
        rng: &mut R,
    ) -> LearnResult<Option<(RuleId, RelationalPredicate)>> {
        let flat = self.flatten()?;
        Ok(fire_first(
            flat.iter().map(|f| (f.rule, f.goal_terms)),
            arena,
            matcher,
            facts,
            valid_actions,
            rng,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::policy::PolicyEntry;
    use crate::logic::query::BacktrackingMatcher;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn policy(ids: &[u32]) -> Policy {
        Policy::from_entries(
            ids.iter()
                .enumerate()
                .map(|(slot, &id)| PolicyEntry {
                    slot,
                    choice: Some(RuleId(id)),
                })
                .collect(),
        )
    }

    #[test]
    fn test_post_order() {
        let mut tree = PolicyTree::with_root(PolicyNode::new("root", vec![], policy(&[0])));
        let left = tree
            .add_child(0, PolicyNode::new("left", vec![], policy(&[1])))
            .unwrap();
        tree.add_child(left, PolicyNode::new("leaf", vec![], policy(&[2])))
            .unwrap();
        tree.add_child(0, PolicyNode::new("right", vec![], policy(&[3])))
            .unwrap();
        let order: Vec<u32> = tree.flatten().unwrap().iter().map(|f| f.rule.0).collect();
        assert_eq!(order, vec![2, 1, 3, 0]);
    }

    #[test]
    fn test_depth_bound() {
        let mut tree = PolicyTree::new(PolicyNode::new("root", vec![], policy(&[])), 1);
        let child = tree
            .add_child(0, PolicyNode::new("c", vec![], policy(&[])))
            .unwrap();
        let err = tree
            .add_child(child, PolicyNode::new("gc", vec![], policy(&[])))
            .unwrap_err();
        assert!(matches!(err, LearnError::PolicyTreeDepth(1)));
        assert!(matches!(
            tree.add_child(9, PolicyNode::new("x", vec![], policy(&[]))),
            Err(LearnError::PolicyTreeNode(9))
        ));
    }

    #[test]
    fn test_sub_goal_rules_use_their_goal_terms() {
        let mut arena = RuleArena::new();
        let (sub, _) = arena.insert("above(?A,?G_0) AND clear(?A) => move_floor(?A)".parse().unwrap());
        let (main, _) = arena.insert("clear(?A) AND clear(?B) => move(?A,?B)".parse().unwrap());
        let mut tree = PolicyTree::new(PolicyNode::new("on", vec!["a".into(), "b".into()], policy(&[main.0])), 2);
        tree.add_child(0, PolicyNode::new("clear", vec!["b".into()], policy(&[sub.0])))
            .unwrap();
        let state: FactSet = ["on(c,b)", "above(c,b)", "clear(c)", "clear(a)"]
            .iter()
            .map(|f| f.parse().unwrap())
            .collect();
        let mut valid = ValidActions::new();
        valid.insert("move_floor".into(), vec!["move_floor(c)".parse().unwrap()]);
        valid.insert("move".into(), vec!["move(a,c)".parse().unwrap()]);
        let mut rng = SmallRng::seed_from_u64(0);
        let (id, action) = tree
            .choose_action(&arena, &BacktrackingMatcher::default(), &state, &valid, &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(id, sub);
        assert_eq!(action.to_string(), "move_floor(c)");
    }
}
