//! # Variable Indexer
//!
//! Fixes the decision-vector layout. The layout is an arena of ranges: a flat
//! list of [`RangeRecord`]s, each mapping a [`Block`] to `(offset, len)`,
//! plus dense lookup tables keyed by `(element, node)` that already resolve
//! implicit state sharing and control blocking. Assembly loops only ever
//! read those tables.
//!
//! ## Layout
//!
//! ```text
//! ┌───────┬──────────────────────────────────────────┬──────────┬─────────────┬────────────┬────────┬──────────┐
//! │ p_opt │ per element: per collocation node         │ blocked  │ explicit    │ entry node │ free   │ free     │
//! │       │   dx x u w   (Gauss: + exit x)            │ u groups │ entry x     │ dx x u w   │ t0, tf │ phase t  │
//! └───────┴──────────────────────────────────────────┴──────────┴─────────────┴────────────┴────────┴──────────┘
//! ```
//!
//! - `u` at collocation nodes is omitted when blocking factors are given; all
//!   nodes of a group share the group block.
//! - Lobatto node 0 of elements after the first has no own `x`: it is the
//!   previous element's exit state, or an explicit entry-state block.
//! - The entry node exists for Radau and Gauss only.

use crate::collocation::{CollocationBasis, Scheme};
use dopt_core::{DoptError, DoptResult};
use serde::Serialize;
use std::ops::Range;

const NONE: usize = usize::MAX;

/// Node-level variable classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VarType {
    Dx,
    X,
    U,
    W,
}

impl VarType {
    pub const ALL: [VarType; 4] = [VarType::Dx, VarType::X, VarType::U, VarType::W];

    fn slot(self) -> usize {
        self as usize
    }
}

/// What a range of the decision vector holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Block {
    Parameters,
    Node {
        element: usize,
        node: usize,
        var: VarType,
    },
    ControlGroup {
        group: usize,
    },
    EntryState {
        element: usize,
    },
    StartTime,
    FinalTime,
    PhaseBoundary {
        boundary: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRecord {
    pub block: Block,
    pub offset: usize,
    pub len: usize,
}

impl RangeRecord {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Decision-vector length broken down by block kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LayoutSummary {
    pub n_xx: usize,
    pub parameters: usize,
    pub node_variables: usize,
    pub control_groups: usize,
    pub entry_states: usize,
    pub time_variables: usize,
}

/// Everything the layout depends on.
#[derive(Debug, Clone)]
pub struct IndexerInput<'a> {
    pub n_x: usize,
    pub n_u: usize,
    pub n_w: usize,
    pub n_p: usize,
    pub n_e: usize,
    pub basis: &'a CollocationBasis,
    pub blocking_factors: Option<&'a [usize]>,
    pub explicit_continuity: bool,
    pub free_start: bool,
    pub free_final: bool,
    pub free_phase_boundaries: bool,
}

/// Immutable decision-vector layout of one transcription.
#[derive(Debug, Clone)]
pub struct VariableIndexMap {
    records: Vec<RangeRecord>,
    n_xx: usize,
    expected: usize,
    scheme: Scheme,
    n_e: usize,
    nodes_per_element: usize,
    exit_node: usize,
    dims: [usize; 4],
    n_p: usize,
    /// Offsets of blocks owned by `(element, node)`, per [`VarType`].
    owned: Vec<[usize; 4]>,
    /// Resolved offsets per `(element, node)`, per [`VarType`].
    resolved: Vec<[usize; 4]>,
    element_group: Vec<usize>,
    blocked: bool,
    start_time: Option<usize>,
    final_time: Option<usize>,
    phase_boundaries: Vec<Option<usize>>,
    explicit_entry: Vec<Option<usize>>,
}

struct LayoutBuilder {
    records: Vec<RangeRecord>,
    next: usize,
}

impl LayoutBuilder {
    fn push(&mut self, block: Block, len: usize) -> usize {
        let offset = self.next;
        if len > 0 {
            self.records.push(RangeRecord { block, offset, len });
        }
        self.next += len;
        offset
    }
}

impl VariableIndexMap {
    pub fn build(input: &IndexerInput<'_>) -> DoptResult<Self> {
        let basis = input.basis;
        let scheme = basis.scheme();
        let n_cp = basis.n_cp();
        let n_e = input.n_e;
        if n_e == 0 {
            return Err(DoptError::config("layout needs at least one element"));
        }
        let dims = [input.n_x, input.n_x, input.n_u, input.n_w];

        let element_group = match input.blocking_factors {
            Some(factors) => {
                let total: usize = factors.iter().sum();
                if total != n_e || factors.iter().any(|&f| f == 0) {
                    return Err(DoptError::config(format!(
                        "blocking factors {factors:?} must be positive and sum to the element count {n_e}"
                    )));
                }
                factors
                    .iter()
                    .enumerate()
                    .flat_map(|(g, &f)| std::iter::repeat(g).take(f))
                    .collect()
            }
            None => Vec::new(),
        };
        let blocked = input.blocking_factors.is_some();
        let n_groups = input.blocking_factors.map_or(0, |f| f.len());

        let nodes_per_element = n_cp + 2;
        let mut owned = vec![[NONE; 4]; n_e * nodes_per_element];
        let mut b = LayoutBuilder {
            records: Vec::new(),
            next: 0,
        };

        b.push(Block::Parameters, input.n_p);

        for element in 0..n_e {
            for node in basis.collocation_nodes() {
                let slot = element * nodes_per_element + node;
                for var in VarType::ALL {
                    let skip = match var {
                        VarType::X => scheme == Scheme::GaussLobatto && node == 0 && element > 0,
                        VarType::U => blocked,
                        _ => false,
                    };
                    if !skip {
                        owned[slot][var.slot()] =
                            b.push(Block::Node { element, node, var }, dims[var.slot()]);
                    }
                }
            }
            if scheme.has_exit_node() {
                let node = basis.exit_node();
                owned[element * nodes_per_element + node][VarType::X.slot()] = b.push(
                    Block::Node {
                        element,
                        node,
                        var: VarType::X,
                    },
                    input.n_x,
                );
            }
        }

        let control_groups: Vec<usize> = (0..n_groups)
            .map(|group| b.push(Block::ControlGroup { group }, input.n_u))
            .collect();

        let mut explicit_entry = vec![None; n_e];
        if input.explicit_continuity {
            for (element, entry) in explicit_entry.iter_mut().enumerate().skip(1) {
                *entry = Some(b.push(Block::EntryState { element }, input.n_x));
            }
        }

        if scheme.has_entry_node() {
            for var in VarType::ALL {
                if var == VarType::U && blocked {
                    continue;
                }
                owned[0][var.slot()] = b.push(
                    Block::Node {
                        element: 0,
                        node: 0,
                        var,
                    },
                    dims[var.slot()],
                );
            }
        }

        let start_time = input.free_start.then(|| b.push(Block::StartTime, 1));
        let final_time = input.free_final.then(|| b.push(Block::FinalTime, 1));

        let mut phase_boundaries = vec![None; n_e + 1];
        if input.free_phase_boundaries {
            for (boundary, slot) in phase_boundaries.iter_mut().enumerate().take(n_e).skip(1) {
                *slot = Some(b.push(Block::PhaseBoundary { boundary }, 1));
            }
        }

        let expected = expected_length(input);
        let mut map = Self {
            records: b.records,
            n_xx: b.next,
            expected,
            scheme,
            n_e,
            nodes_per_element,
            exit_node: basis.exit_node(),
            dims,
            n_p: input.n_p,
            owned,
            resolved: Vec::new(),
            element_group,
            blocked,
            start_time,
            final_time,
            phase_boundaries,
            explicit_entry,
        };
        map.resolve(basis, &control_groups)?;
        map.verify()?;
        Ok(map)
    }

    /// Fill the resolved table, following shared states and blocked controls.
    fn resolve(&mut self, basis: &CollocationBasis, control_groups: &[usize]) -> DoptResult<()> {
        let npe = self.nodes_per_element;
        let exit = basis.exit_node();
        let mut resolved = self.owned.clone();
        for element in 0..self.n_e {
            for node in 0..npe {
                let slot = element * npe + node;
                let is_point = node == 0
                    || basis.collocation_nodes().contains(&node)
                    || node == exit;
                if !is_point {
                    continue;
                }
                if resolved[slot][VarType::X.slot()] == NONE && node == 0 && element > 0 {
                    resolved[slot][VarType::X.slot()] = match self.explicit_entry[element] {
                        Some(offset) => offset,
                        None => resolved[(element - 1) * npe + exit][VarType::X.slot()],
                    };
                }
                let carries_control = basis.collocation_nodes().contains(&node)
                    || (node == 0 && element == 0 && self.scheme.has_entry_node());
                if self.blocked && carries_control {
                    resolved[slot][VarType::U.slot()] = control_groups[self.element_group[element]];
                }
            }
        }
        // Every element needs a reachable entry and exit state.
        for element in 0..self.n_e {
            for node in [0, exit] {
                if resolved[element * npe + node][VarType::X.slot()] == NONE {
                    return Err(DoptError::AssemblyInvariant {
                        expected: self.expected,
                        actual: self.n_xx,
                    });
                }
            }
        }
        self.resolved = resolved;
        Ok(())
    }

    /// Check that the records partition `[0, n_xx)` and match the expected length.
    pub fn verify(&self) -> DoptResult<()> {
        let mut ranges: Vec<Range<usize>> = self.records.iter().map(|r| r.range()).collect();
        ranges.sort_by_key(|r| r.start);
        let mut cursor = 0;
        for r in &ranges {
            if r.start != cursor || r.is_empty() {
                return Err(DoptError::AssemblyInvariant {
                    expected: self.expected,
                    actual: cursor,
                });
            }
            cursor = r.end;
        }
        if cursor != self.n_xx || self.n_xx != self.expected {
            return Err(DoptError::AssemblyInvariant {
                expected: self.expected,
                actual: cursor,
            });
        }
        Ok(())
    }

    pub fn n_xx(&self) -> usize {
        self.n_xx
    }

    pub fn records(&self) -> &[RangeRecord] {
        &self.records
    }

    pub fn summary(&self) -> LayoutSummary {
        let mut summary = LayoutSummary {
            n_xx: self.n_xx,
            ..Default::default()
        };
        for record in &self.records {
            let slot = match record.block {
                Block::Parameters => &mut summary.parameters,
                Block::Node { .. } => &mut summary.node_variables,
                Block::ControlGroup { .. } => &mut summary.control_groups,
                Block::EntryState { .. } => &mut summary.entry_states,
                Block::StartTime | Block::FinalTime | Block::PhaseBoundary { .. } => {
                    &mut summary.time_variables
                }
            };
            *slot += record.len;
        }
        summary
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn n_e(&self) -> usize {
        self.n_e
    }

    pub fn dim(&self, var: VarType) -> usize {
        self.dims[var.slot()]
    }

    pub fn p_range(&self) -> Range<usize> {
        0..self.n_p
    }

    pub fn p_opt(&self, i: usize) -> usize {
        i
    }

    /// Offset of the block owned by `(element, node)`, if any.
    pub fn owned(&self, element: usize, node: usize, var: VarType) -> Option<usize> {
        let offset = self.owned[element * self.nodes_per_element + node][var.slot()];
        (offset != NONE).then_some(offset)
    }

    /// Offset of the values seen at `(element, node)`, following sharing.
    pub fn lookup(&self, element: usize, node: usize, var: VarType) -> Option<usize> {
        let offset = self.resolved[element * self.nodes_per_element + node][var.slot()];
        (offset != NONE).then_some(offset)
    }

    /// Decision-vector index of component `j` of `var` at `(element, node)`.
    pub fn index(&self, element: usize, node: usize, var: VarType, j: usize) -> Option<usize> {
        self.lookup(element, node, var).map(|offset| offset + j)
    }

    pub fn range(&self, element: usize, node: usize, var: VarType) -> Option<Range<usize>> {
        self.lookup(element, node, var)
            .map(|offset| offset..offset + self.dim(var))
    }

    pub fn explicit_entry_state(&self, element: usize) -> Option<usize> {
        self.explicit_entry[element]
    }

    pub fn has_explicit_continuity(&self) -> bool {
        self.explicit_entry.iter().any(Option::is_some)
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Offset of the state seen at the start of `element`.
    pub fn element_entry_state(&self, element: usize) -> Option<usize> {
        self.lookup(element, 0, VarType::X)
    }

    /// Offset of the state at the end of `element`.
    pub fn element_exit_state(&self, element: usize) -> Option<usize> {
        self.lookup(element, self.exit_node, VarType::X)
    }

    pub fn start_time(&self) -> Option<usize> {
        self.start_time
    }

    pub fn final_time(&self) -> Option<usize> {
        self.final_time
    }

    /// Free boundary time variable between element `boundary - 1` and `boundary`.
    pub fn phase_boundary(&self, boundary: usize) -> Option<usize> {
        self.phase_boundaries.get(boundary).copied().flatten()
    }
}

fn expected_length(input: &IndexerInput<'_>) -> usize {
    let basis = input.basis;
    let scheme = basis.scheme();
    let n_cp = basis.n_cp();
    let blocked = input.blocking_factors.is_some();
    let u_per_node = if blocked { 0 } else { input.n_u };
    let per_node = 2 * input.n_x + u_per_node + input.n_w;

    let mut n = input.n_p + input.n_e * n_cp * per_node;
    if scheme == Scheme::GaussLobatto {
        n -= (input.n_e - 1) * input.n_x;
    }
    if scheme.has_exit_node() {
        n += input.n_e * input.n_x;
    }
    if let Some(factors) = input.blocking_factors {
        n += factors.len() * input.n_u;
    }
    if input.explicit_continuity {
        n += (input.n_e - 1) * input.n_x;
    }
    if scheme.has_entry_node() {
        n += per_node;
    }
    n += input.free_start as usize + input.free_final as usize;
    if input.free_phase_boundaries {
        n += input.n_e - 1;
    }
    n
}
