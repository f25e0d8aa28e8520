//! Name+stage DAG resolution for one hook phase (pre or post).
//!
//! Generalizes `shipper::plan::topo_sort`: an indegree-counted Kahn's
//! algorithm whose ready queue is a `BTreeSet` keyed by a stable tie-break
//! index, so two simultaneously-ready nodes always resolve in the same
//! order across runs — here that tie-break is "module load order" (the
//! hook's position in the input slice) rather than package name.
//!
//! `before=ALL`/`after=ALL` (`Dep::All`) do not add graph edges at all —
//! unlike `examples/original_source/src/cellophane/modules/hook.py`'s
//! `BEFORE_ALL`/`AFTER_ALL` sentinel nodes, which can deadlock against an
//! explicit opposite-direction dependency elsewhere in the same phase (see
//! S4: `h1(before=h2)`, `h2(after=h1, before=ALL)` — a literal "h2 before
//! every other hook" edge set would add `h2 -> h1`, conflicting with the
//! explicit `h1 -> h2`). Instead `Dep::All` is a tie-break *priority*: a
//! hook with `before=ALL` sorts first among whichever nodes are
//! simultaneously ready, `after=ALL` sorts last, and explicit `Dep::Name`/
//! `Dep::Stage` edges are unaffected and always take precedence, since they
//! still gate readiness itself.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::types::{Dep, Hook, HookWhen, StageTag, POST_STAGE_ORDER, PRE_STAGE_ORDER};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OrderingError {
    #[error("hook {0:?} depends on unknown hook name {1:?}")]
    UnknownHookName(String, String),
    #[error("pre-hook {0:?} must not depend on OUTPUT_TRANSFERED")]
    PreHookDependsOnOutputTransfered(String),
    #[error("post-hook {0:?} must not depend on {1}")]
    PostHookDependsOnDisallowedStage(String, &'static str),
    #[error("hook dependency cycle detected among: {0:?}")]
    Cycle(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum NodeId {
    Stage(u8),
    Hook(u32),
}

/// Resolves the execution order of every hook in `hooks` matching `phase`,
/// returning hook names in the order they must run. Hooks with a different
/// `when` are ignored (exception hooks are not DAG-ordered; they run in
/// registration order at the dispatcher).
pub fn resolve(hooks: &[Hook], phase: HookWhen) -> Result<Vec<String>, OrderingError> {
    let stage_order: &[StageTag] = match phase {
        HookWhen::Pre => &PRE_STAGE_ORDER,
        HookWhen::Post => &POST_STAGE_ORDER,
        HookWhen::Exception => return Ok(hooks
            .iter()
            .filter(|h| h.when == HookWhen::Exception)
            .map(|h| h.name.clone())
            .collect()),
    };

    let phase_hooks: Vec<&Hook> = hooks.iter().filter(|h| h.when == phase).collect();
    let name_to_index: HashMap<&str, u32> = phase_hooks
        .iter()
        .enumerate()
        .map(|(i, h)| (h.name.as_str(), i as u32))
        .collect();
    let stage_to_index: HashMap<StageTag, u8> = stage_order
        .iter()
        .enumerate()
        .map(|(i, tag)| (*tag, i as u8))
        .collect();

    validate_disallowed_stage_deps(&phase_hooks, phase)?;

    let mut successors: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
    let mut indegree: BTreeMap<NodeId, u32> = BTreeMap::new();

    let mut all_nodes: Vec<NodeId> = Vec::new();
    for i in 0..stage_order.len() as u8 {
        all_nodes.push(NodeId::Stage(i));
    }
    for i in 0..phase_hooks.len() as u32 {
        all_nodes.push(NodeId::Hook(i));
    }
    for node in &all_nodes {
        successors.entry(*node).or_default();
        indegree.entry(*node).or_default();
    }

    let mut add_edge = |from: NodeId, to: NodeId, successors: &mut BTreeMap<NodeId, Vec<NodeId>>, indegree: &mut BTreeMap<NodeId, u32>| {
        successors.entry(from).or_default().push(to);
        *indegree.entry(to).or_default() += 1;
    };

    // Fixed chain: each stage tag must come before the next one in this phase.
    for window in (0..stage_order.len() as u8).collect::<Vec<_>>().windows(2) {
        add_edge(NodeId::Stage(window[0]), NodeId::Stage(window[1]), &mut successors, &mut indegree);
    }

    let resolve_dep = |dep: &Dep, self_idx: u32, hook_name: &str| -> Result<Option<NodeId>, OrderingError> {
        match dep {
            Dep::Name(name) => name_to_index
                .get(name.as_str())
                .map(|i| Some(NodeId::Hook(*i)))
                .ok_or_else(|| OrderingError::UnknownHookName(hook_name.to_string(), name.clone())),
            Dep::Stage(tag) => Ok(stage_to_index.get(tag).map(|i| NodeId::Stage(*i))),
            Dep::All => Ok(None), // no edge; affects ready-queue priority only, see kahn_sort
        }
        .map(|opt| opt.filter(|n| *n != NodeId::Hook(self_idx)))
    };

    for (i, hook) in phase_hooks.iter().enumerate() {
        let self_id = NodeId::Hook(i as u32);

        for dep in &hook.after {
            if let Some(node) = resolve_dep(dep, i as u32, &hook.name)? {
                add_edge(node, self_id, &mut successors, &mut indegree);
            }
        }

        for dep in &hook.before {
            if let Some(node) = resolve_dep(dep, i as u32, &hook.name)? {
                add_edge(self_id, node, &mut successors, &mut indegree);
            }
        }
    }

    // `before=ALL` sorts first among simultaneously-ready nodes, `after=ALL`
    // sorts last; explicit deps already gate readiness above and are
    // untouched by this.
    let hook_priority: Vec<i8> = phase_hooks
        .iter()
        .map(|h| {
            if h.before.iter().any(|d| matches!(d, Dep::All)) {
                -1
            } else if h.after.iter().any(|d| matches!(d, Dep::All)) {
                1
            } else {
                0
            }
        })
        .collect();
    let priority = |node: NodeId| -> i8 {
        match node {
            NodeId::Hook(i) => hook_priority[i as usize],
            NodeId::Stage(_) => 0,
        }
    };

    let sorted = kahn_sort(&all_nodes, &successors, &mut indegree, priority)?;

    Ok(sorted
        .into_iter()
        .filter_map(|n| match n {
            NodeId::Hook(i) => Some(phase_hooks[i as usize].name.clone()),
            NodeId::Stage(_) => None,
        })
        .collect())
}

fn kahn_sort(
    all_nodes: &[NodeId],
    successors: &BTreeMap<NodeId, Vec<NodeId>>,
    indegree: &mut BTreeMap<NodeId, u32>,
    priority: impl Fn(NodeId) -> i8,
) -> Result<Vec<NodeId>, OrderingError> {
    let mut ready: BTreeSet<(i8, NodeId)> = all_nodes
        .iter()
        .copied()
        .filter(|n| indegree.get(n).copied().unwrap_or(0) == 0)
        .map(|n| (priority(n), n))
        .collect();

    let mut order = Vec::with_capacity(all_nodes.len());
    while let Some(&(_, node)) = ready.iter().next() {
        ready.remove(&(priority(node), node));
        order.push(node);
        if let Some(succs) = successors.get(&node) {
            for succ in succs {
                let entry = indegree.entry(*succ).or_default();
                *entry = entry.saturating_sub(1);
                if *entry == 0 {
                    ready.insert((priority(*succ), *succ));
                }
            }
        }
    }

    if order.len() != all_nodes.len() {
        let remaining: Vec<String> = all_nodes
            .iter()
            .filter(|n| !order.contains(n))
            .map(|n| format!("{n:?}"))
            .collect();
        return Err(OrderingError::Cycle(remaining));
    }

    Ok(order)
}

fn validate_disallowed_stage_deps(hooks: &[&Hook], phase: HookWhen) -> Result<(), OrderingError> {
    for hook in hooks {
        for dep in hook.before.iter().chain(hook.after.iter()) {
            let Dep::Stage(tag) = dep else { continue };
            match phase {
                HookWhen::Pre if *tag == StageTag::OutputTransfered => {
                    return Err(OrderingError::PreHookDependsOnOutputTransfered(
                        hook.name.clone(),
                    ));
                }
                HookWhen::Post
                    if matches!(
                        tag,
                        StageTag::SamplesPresent | StageTag::FilesPresent | StageTag::FilesFinalized
                    ) =>
                {
                    return Err(OrderingError::PostHookDependsOnDisallowedStage(
                        hook.name.clone(),
                        tag.as_str(),
                    ));
                }
                _ => {}
            }
        }
    }
    Ok(())
}
