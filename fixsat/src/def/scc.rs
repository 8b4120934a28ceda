//! Strongly connected components of the positive dependency graph.
//!
//! An iterative Tarjan pass over the defined heads. Edges follow positive body literals of
//! disjunctive and conjunctive rules and the positive support literals of aggregate rules. Heads
//! whose component is trivial and free of self loops cannot participate in a positive loop and
//! are excluded from all further definitional bookkeeping.
use fixsat_formula::Var;

use super::DefEngine;

const UNVISITED: u32 = u32::max_value();

struct Tarjan<'a> {
    def: &'a mut DefEngine,
    index: Vec<u32>,
    lowlink: Vec<u32>,
    on_stack: Vec<bool>,
    stack: Vec<u32>,
    next_index: u32,
    next_component: u32,
}

/// Assign component ids to all defined heads and mark the heads that can be part of a positive
/// loop.
pub fn assign_components(def: &mut DefEngine) {
    let var_count = def.rule_of.len();

    let mut tarjan = Tarjan {
        def,
        index: vec![UNVISITED; var_count],
        lowlink: vec![UNVISITED; var_count],
        on_stack: vec![false; var_count],
        stack: vec![],
        next_index: 0,
        next_component: 1,
    };

    for var_index in 0..var_count {
        if tarjan.def.rule_of[var_index].is_some() && tarjan.index[var_index] == UNVISITED {
            tarjan.visit(var_index);
        }
    }

    // Self loops keep a singleton component relevant for unfounded sets.
    let def = tarjan.def;
    for rule in def.rules.iter() {
        let head_index = rule.head.index();
        if !def.in_pos_loop[head_index] {
            let self_loop = positive_deps(def, rule.head)
                .iter()
                .any(|&dep| dep == head_index);
            if self_loop {
                def.in_pos_loop[head_index] = true;
            }
        }
    }
}

/// The defined positive dependencies of a head.
pub fn positive_deps(def: &DefEngine, head: Var) -> Vec<usize> {
    match def.rule(head) {
        Some(rule) => rule
            .body
            .iter()
            .filter(|lit| lit.is_positive() && def.rule_of[lit.index()].is_some())
            .map(|lit| lit.index())
            .collect(),
        None => vec![],
    }
}

enum Step {
    Enter(usize),
    Continue(usize, usize),
}

impl<'a> Tarjan<'a> {
    /// Iterative Tarjan visit starting at a root node.
    fn visit(&mut self, root: usize) {
        let mut work = vec![Step::Enter(root)];

        while let Some(step) = work.pop() {
            let (node, mut dep_pos) = match step {
                Step::Enter(node) => {
                    self.index[node] = self.next_index;
                    self.lowlink[node] = self.next_index;
                    self.next_index += 1;
                    self.stack.push(node as u32);
                    self.on_stack[node] = true;
                    (node, 0)
                }
                Step::Continue(node, dep_pos) => (node, dep_pos),
            };

            let deps = positive_deps(self.def, Var::from_index(node));

            let mut descended = false;
            while dep_pos < deps.len() {
                let dep = deps[dep_pos];
                dep_pos += 1;
                if self.index[dep] == UNVISITED {
                    work.push(Step::Continue(node, dep_pos));
                    work.push(Step::Enter(dep));
                    descended = true;
                    break;
                } else if self.on_stack[dep] {
                    self.lowlink[node] = self.lowlink[node].min(self.index[dep]);
                }
            }

            if descended {
                continue;
            }

            if self.lowlink[node] == self.index[node] {
                // node is the root of a component.
                let mut members = vec![];
                loop {
                    let member = self.stack.pop().unwrap() as usize;
                    self.on_stack[member] = false;
                    members.push(member);
                    if member == node {
                        break;
                    }
                }

                let component = self.next_component;
                self.next_component += 1;
                let in_loop = members.len() > 1;
                for &member in members.iter() {
                    self.def.scc[member] = component;
                    self.def.in_pos_loop[member] = in_loop;
                }
            }

            // Propagate the lowlink to the parent waiting on the work stack.
            if let Some(Step::Continue(parent, _)) = work.last() {
                let parent = *parent;
                self.lowlink[parent] = self.lowlink[parent].min(self.lowlink[node]);
            }
        }
    }
}
