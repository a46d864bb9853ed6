//! CDCL search over the acyclicity theory.
//!
//! A watched-literal SAT core with first-UIP conflict analysis, VSIDS
//! activities, phase saving, and Luby restarts. After every propagation
//! fixpoint the newly true variables are handed to the theory in trail
//! order; a cycle comes back as a conflict clause, and theory-level
//! exactly-one propagation enqueues the sibling negations. All theory
//! edges asserted at a decision level are retracted in reverse order when
//! that level is cancelled.

use std::time::Instant;

use crate::icd::Cycle;
use crate::lit::{Lit, Var};
use crate::theory::AcyclicityTheory;

const VAR_DECAY: f64 = 0.95;
const RESCALE_LIMIT: f64 = 1e100;
const RESTART_BASE: u64 = 100;

/// Cooperative limits, consulted at restart boundaries only.
#[derive(Debug, Default, Clone, Copy)]
pub struct Budget {
    pub conflicts: Option<u64>,
    pub deadline: Option<Instant>,
}

/// Terminal conditions that are not verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverError {
    Timeout,
    Invariant(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveOutcome {
    Sat,
    Unsat,
}

#[derive(Debug)]
struct Clause {
    lits: Vec<Lit>,
}

type ClauseRef = u32;

#[derive(Debug, Clone, Copy)]
struct Watcher {
    clause: ClauseRef,
    blocker: Lit,
}

#[derive(Debug)]
pub struct Solver {
    theory: AcyclicityTheory,
    n_vars: usize,

    clauses: Vec<Clause>,
    watches: Vec<Vec<Watcher>>,

    assigns: Vec<Option<bool>>,
    var_level: Vec<u32>,
    var_reason: Vec<Option<ClauseRef>>,
    trail: Vec<Lit>,
    trail_lim: Vec<usize>,
    qhead: usize,

    /// Variables whose theory edges are currently live, in assertion order.
    atom_trail: Vec<Var>,
    atom_trail_lim: Vec<usize>,
    added: Vec<bool>,

    activity: Vec<f64>,
    var_inc: f64,
    polarity: Vec<bool>,
    /// Static decision weight: how many edges asserting the variable adds.
    bundle_weight: Vec<usize>,
    seen: Vec<bool>,

    pub conflicts: u64,
    pub restarts: u64,
    /// Most recent cycle refuted by the theory; surfaced on final reject.
    pub last_cycle: Option<Cycle>,
}

impl Solver {
    #[must_use]
    pub fn new(theory: AcyclicityTheory) -> Self {
        let n_vars = theory.n_vars();
        let bundle_weight = (0..n_vars)
            .map(|v| theory.bundle(v as Var).len())
            .collect();
        Self {
            theory,
            n_vars,
            clauses: Vec::new(),
            watches: vec![Vec::new(); n_vars * 2],
            assigns: vec![None; n_vars],
            var_level: vec![0; n_vars],
            var_reason: vec![None; n_vars],
            trail: Vec::new(),
            trail_lim: Vec::new(),
            qhead: 0,
            atom_trail: Vec::new(),
            atom_trail_lim: Vec::new(),
            added: vec![false; n_vars],
            activity: vec![0.0; n_vars],
            var_inc: 1.0,
            polarity: vec![false; n_vars],
            bundle_weight,
            seen: vec![false; n_vars],
            conflicts: 0,
            restarts: 0,
            last_cycle: None,
        }
    }

    #[must_use]
    pub const fn theory(&self) -> &AcyclicityTheory {
        &self.theory
    }

    pub fn theory_mut(&mut self) -> &mut AcyclicityTheory {
        &mut self.theory
    }

    fn value(&self, lit: Lit) -> Option<bool> {
        self.assigns[lit.var() as usize].map(|v| v == lit.is_positive())
    }

    fn decision_level(&self) -> u32 {
        self.trail_lim.len() as u32
    }

    /// Add an original clause. Returns false if it is immediately
    /// contradictory at level 0.
    pub fn add_clause(&mut self, lits: Vec<Lit>) -> bool {
        debug_assert_eq!(self.decision_level(), 0);
        match lits.len() {
            0 => false,
            1 => match self.value(lits[0]) {
                Some(false) => false,
                Some(true) => true,
                None => {
                    self.enqueue(lits[0], None);
                    true
                }
            },
            _ => {
                let cref = self.alloc(lits);
                self.attach(cref);
                true
            }
        }
    }

    fn alloc(&mut self, lits: Vec<Lit>) -> ClauseRef {
        let cref = self.clauses.len() as ClauseRef;
        self.clauses.push(Clause { lits });
        cref
    }

    fn attach(&mut self, cref: ClauseRef) {
        let (l0, l1) = {
            let lits = &self.clauses[cref as usize].lits;
            (lits[0], lits[1])
        };
        self.watches[(!l0).index()].push(Watcher {
            clause: cref,
            blocker: l1,
        });
        self.watches[(!l1).index()].push(Watcher {
            clause: cref,
            blocker: l0,
        });
    }

    fn enqueue(&mut self, lit: Lit, reason: Option<ClauseRef>) {
        debug_assert!(self.value(lit).is_none());
        let v = lit.var() as usize;
        self.assigns[v] = Some(lit.is_positive());
        self.var_level[v] = self.decision_level();
        self.var_reason[v] = reason;
        self.trail.push(lit);
    }

    /// Watched-literal propagation to fixpoint, then theory assertion of the
    /// newly true variables in trail order, looping until nothing changes.
    fn propagate(&mut self) -> Result<Option<ClauseRef>, SolverError> {
        loop {
            if let Some(confl) = self.propagate_bool() {
                return Ok(Some(confl));
            }

            let mut theory_conflict: Option<ClauseRef> = None;
            let mut theory_propagated = false;
            let mut idx = 0;
            while idx < self.trail.len() {
                let p = self.trail[idx];
                idx += 1;
                if !p.is_positive() || self.added[p.var() as usize] {
                    continue;
                }
                let v = p.var();
                match self.theory.assert_var(v) {
                    Ok(()) => {
                        self.added[v as usize] = true;
                        self.atom_trail.push(v);
                        // exactly-one propagation: the sibling bundle is out
                        let sibling = AcyclicityTheory::sibling(v);
                        if (sibling as usize) < self.n_vars {
                            match self.value(Lit::positive(sibling)) {
                                None => {
                                    let cref = self
                                        .alloc(vec![Lit::negative(sibling), Lit::negative(v)]);
                                    self.enqueue(Lit::negative(sibling), Some(cref));
                                    theory_propagated = true;
                                }
                                Some(false) => {}
                                Some(true) => {
                                    // the pairwise exclusion clause makes
                                    // this unreachable after propagation
                                    debug_assert!(false, "exclusive pair both true");
                                }
                            }
                        }
                    }
                    Err(cycle) => {
                        let lits: Vec<Lit> =
                            cycle.vars().into_iter().map(Lit::negative).collect();
                        if lits.is_empty() {
                            return Err(SolverError::Invariant(
                                "cycle over known edges after preprocessing",
                            ));
                        }
                        tracing::trace!(len = cycle.vertices.len(), "theory cycle refuted");
                        self.last_cycle = Some(cycle);
                        theory_conflict = Some(self.alloc(lits));
                        break;
                    }
                }
            }

            if theory_conflict.is_some() {
                return Ok(theory_conflict);
            }
            if !theory_propagated {
                return Ok(None);
            }
        }
    }

    fn propagate_bool(&mut self) -> Option<ClauseRef> {
        while self.qhead < self.trail.len() {
            let p = self.trail[self.qhead];
            self.qhead += 1;
            let false_lit = !p;

            let mut ws = std::mem::take(&mut self.watches[p.index()]);
            let mut kept = 0;
            let mut i = 0;
            let mut confl: Option<ClauseRef> = None;

            while i < ws.len() {
                let w = ws[i];
                i += 1;
                if self.value(w.blocker) == Some(true) {
                    ws[kept] = w;
                    kept += 1;
                    continue;
                }

                let cref = w.clause;
                {
                    let lits = &mut self.clauses[cref as usize].lits;
                    if lits[0] == false_lit {
                        lits.swap(0, 1);
                    }
                    debug_assert_eq!(lits[1], false_lit);
                }
                let first = self.clauses[cref as usize].lits[0];
                let w_new = Watcher {
                    clause: cref,
                    blocker: first,
                };
                if first != w.blocker && self.value(first) == Some(true) {
                    ws[kept] = w_new;
                    kept += 1;
                    continue;
                }

                // look for a non-false literal to watch instead
                let len = self.clauses[cref as usize].lits.len();
                let mut moved = false;
                for k in 2..len {
                    let lk = self.clauses[cref as usize].lits[k];
                    if self.value(lk) != Some(false) {
                        self.clauses[cref as usize].lits.swap(1, k);
                        self.watches[(!lk).index()].push(w_new);
                        moved = true;
                        break;
                    }
                }
                if moved {
                    continue;
                }

                // clause is unit or conflicting
                ws[kept] = w_new;
                kept += 1;
                if self.value(first) == Some(false) {
                    confl = Some(cref);
                    self.qhead = self.trail.len();
                    while i < ws.len() {
                        ws[kept] = ws[i];
                        kept += 1;
                        i += 1;
                    }
                } else {
                    self.enqueue(first, Some(cref));
                }
            }

            ws.truncate(kept);
            // new watchers may have landed on this list while it was detached
            let landed = std::mem::take(&mut self.watches[p.index()]);
            ws.extend(landed);
            self.watches[p.index()] = ws;

            if confl.is_some() {
                return confl;
            }
        }
        None
    }

    /// First-UIP conflict analysis. Returns the learnt clause (asserting
    /// literal first) and the backjump level.
    fn analyze(&mut self, mut confl: ClauseRef) -> (Vec<Lit>, u32) {
        let mut learnt: Vec<Lit> = vec![Lit::positive(0)];
        let mut path_count = 0_u32;
        let mut p: Option<Lit> = None;
        let mut index = self.trail.len();
        let current = self.decision_level();

        loop {
            let lits = self.clauses[confl as usize].lits.clone();
            for &q in &lits[usize::from(p.is_some())..] {
                let v = q.var() as usize;
                if !self.seen[v] && self.var_level[v] > 0 {
                    self.seen[v] = true;
                    self.bump(q.var());
                    if self.var_level[v] >= current {
                        path_count += 1;
                    } else {
                        learnt.push(q);
                    }
                }
            }

            loop {
                index -= 1;
                if self.seen[self.trail[index].var() as usize] {
                    break;
                }
            }
            let pivot = self.trail[index];
            self.seen[pivot.var() as usize] = false;
            path_count -= 1;
            p = Some(pivot);
            if path_count == 0 {
                break;
            }
            confl = self.var_reason[pivot.var() as usize]
                .expect("non-UIP literal at conflict level has a reason");
        }

        learnt[0] = !p.expect("conflict analysis resolves at least one literal");
        for &l in &learnt[1..] {
            self.seen[l.var() as usize] = false;
        }

        let backjump = if learnt.len() == 1 {
            0
        } else {
            let mut max_i = 1;
            for i in 2..learnt.len() {
                if self.var_level[learnt[i].var() as usize]
                    > self.var_level[learnt[max_i].var() as usize]
                {
                    max_i = i;
                }
            }
            learnt.swap(1, max_i);
            self.var_level[learnt[1].var() as usize]
        };

        (learnt, backjump)
    }

    fn bump(&mut self, var: Var) {
        let a = &mut self.activity[var as usize];
        *a += self.var_inc;
        if *a > RESCALE_LIMIT {
            for a in &mut self.activity {
                *a *= 1.0 / RESCALE_LIMIT;
            }
            self.var_inc *= 1.0 / RESCALE_LIMIT;
        }
    }

    fn decay(&mut self) {
        self.var_inc /= VAR_DECAY;
    }

    /// Undo the trail down to `level`, retracting theory edges in strict
    /// reverse assertion order.
    fn cancel_until(&mut self, level: u32) -> Result<(), SolverError> {
        if self.decision_level() <= level {
            return Ok(());
        }

        let trail_floor = self.trail_lim[level as usize];
        for c in (trail_floor..self.trail.len()).rev() {
            let lit = self.trail[c];
            let v = lit.var() as usize;
            self.polarity[v] = lit.is_positive();
            self.assigns[v] = None;
            self.var_reason[v] = None;
        }
        self.trail.truncate(trail_floor);
        self.trail_lim.truncate(level as usize);
        self.qhead = trail_floor;

        let atom_floor = self.atom_trail_lim[level as usize];
        for a in (atom_floor..self.atom_trail.len()).rev() {
            let v = self.atom_trail[a];
            self.added[v as usize] = false;
            self.theory
                .retract_var(v)
                .map_err(SolverError::Invariant)?;
        }
        self.atom_trail.truncate(atom_floor);
        self.atom_trail_lim.truncate(level as usize);
        Ok(())
    }

    /// Pick the unassigned variable that inserts the fewest edges, ties
    /// broken by VSIDS activity, and decide it with its saved phase.
    fn decide(&mut self) -> bool {
        let mut best: Option<Var> = None;
        for v in 0..self.n_vars {
            if self.assigns[v].is_some() {
                continue;
            }
            let better = match best {
                None => true,
                Some(b) => {
                    let (bw, bv) = (self.bundle_weight[b as usize], self.activity[b as usize]);
                    let (w, a) = (self.bundle_weight[v], self.activity[v]);
                    w < bw || (w == bw && a > bv)
                }
            };
            if better {
                best = Some(v as Var);
            }
        }
        let Some(v) = best else {
            return false;
        };

        self.trail_lim.push(self.trail.len());
        self.atom_trail_lim.push(self.atom_trail.len());
        self.enqueue(Lit::with_value(v, self.polarity[v as usize]), None);
        true
    }

    fn record_learnt(&mut self, learnt: Vec<Lit>) {
        let asserting = learnt[0];
        if learnt.len() == 1 {
            self.enqueue(asserting, None);
        } else {
            let cref = self.alloc(learnt);
            self.attach(cref);
            self.enqueue(asserting, Some(cref));
        }
    }

    /// Search until SAT/UNSAT or `conflict_limit` conflicts.
    fn search(&mut self, conflict_limit: u64) -> Result<Option<SolveOutcome>, SolverError> {
        let mut local_conflicts = 0_u64;
        loop {
            let confl = self.propagate()?;
            if let Some(confl) = confl {
                self.conflicts += 1;
                local_conflicts += 1;
                if self.decision_level() == 0 {
                    return Ok(Some(SolveOutcome::Unsat));
                }
                let (learnt, backjump) = self.analyze(confl);
                self.cancel_until(backjump)?;
                self.record_learnt(learnt);
                self.decay();
            } else {
                if local_conflicts >= conflict_limit {
                    self.cancel_until(0)?;
                    return Ok(None);
                }
                if !self.decide() {
                    return Ok(Some(SolveOutcome::Sat));
                }
            }
        }
    }

    /// Run CDCL with Luby restarts until a result or a budget boundary.
    pub fn solve(&mut self, budget: Budget) -> Result<SolveOutcome, SolverError> {
        let mut round = 0_u32;
        loop {
            if let Some(limit) = budget.conflicts {
                if self.conflicts >= limit {
                    return Err(SolverError::Timeout);
                }
            }
            if let Some(deadline) = budget.deadline {
                if Instant::now() >= deadline {
                    return Err(SolverError::Timeout);
                }
            }

            let limit = RESTART_BASE * luby(2, round);
            match self.search(limit)? {
                Some(outcome) => {
                    tracing::debug!(
                        conflicts = self.conflicts,
                        restarts = self.restarts,
                        ?outcome,
                        "search finished"
                    );
                    return Ok(outcome);
                }
                None => {
                    self.restarts += 1;
                    round += 1;
                }
            }
        }
    }
}

/// The Luby restart sequence: 1, 1, 2, 1, 1, 2, 4, ...
fn luby(y: u64, mut x: u32) -> u64 {
    let (mut size, mut seq) = (1_u64, 0_u32);
    while size < u64::from(x) + 1 {
        seq += 1;
        size = 2 * size + 1;
    }
    while size - 1 != u64::from(x) {
        size = (size - 1) / 2;
        seq -= 1;
        x = (u64::from(x) % size) as u32;
    }
    y.pow(seq)
}
