//! Register/frame model (C5): per-operation stack frame of variable
//! values plus a parallel array of matched column indices, used to
//! support backtracking via O(V) copy-forward (spec §4.5).

use crate::id::EntityId;
use crate::storage::TableId;

/// One variable's value at a given frame: either a table slice (offset +
/// count into that table's entity list) for a Table-kind variable, or a
/// single entity for an Entity-kind variable. Both halves are kept so a
/// register can hold whichever kind its corresponding instruction wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterSlot {
    pub table: Option<TableId>,
    pub offset: u32,
    pub count: u32,
    pub entity: Option<EntityId>,
}

impl RegisterSlot {
    pub fn table_range(table: TableId, offset: u32, count: u32) -> Self {
        RegisterSlot {
            table: Some(table),
            offset,
            count,
            entity: None,
        }
    }

    pub fn single_entity(entity: EntityId) -> Self {
        RegisterSlot {
            table: None,
            offset: 0,
            count: 0,
            entity: Some(entity),
        }
    }

    pub fn is_bound(&self) -> bool {
        self.table.is_some() || self.entity.is_some()
    }
}

/// The `P x V` register matrix and parallel matched-column array
/// described in spec §3/§4.5: one row per program frame, one column per
/// variable (plus, separately, one matched-column slot per term).
#[derive(Debug, Clone)]
pub struct RegisterMatrix {
    /// `frames[frame][variable] -> RegisterSlot`.
    frames: Vec<Vec<RegisterSlot>>,
    /// `columns[frame][term] -> matched column index (0 = none)`.
    columns: Vec<Vec<i32>>,
    variable_count: usize,
    term_count: usize,
}

impl RegisterMatrix {
    pub fn new(frame_count: usize, variable_count: usize, term_count: usize) -> Self {
        RegisterMatrix {
            frames: vec![vec![RegisterSlot::default(); variable_count]; frame_count.max(1)],
            columns: vec![vec![0; term_count]; frame_count.max(1)],
            variable_count,
            term_count,
        }
    }

    pub fn variable_count(&self) -> usize {
        self.variable_count
    }

    pub fn term_count(&self) -> usize {
        self.term_count
    }

    pub fn get(&self, frame: usize, var: usize) -> RegisterSlot {
        self.frames[frame][var]
    }

    pub fn set(&mut self, frame: usize, var: usize, value: RegisterSlot) {
        self.frames[frame][var] = value;
    }

    pub fn column(&self, frame: usize, term: usize) -> i32 {
        self.columns[frame][term]
    }

    pub fn set_column(&mut self, frame: usize, term: usize, value: i32) {
        self.columns[frame][term] = value;
    }

    /// Copy an entire frame's registers and matched columns forward from
    /// `src` to `dst`. This is the O(V) backtracking snapshot: every
    /// downstream instruction's writes land only in `dst`, so re-entering
    /// `src` to redo an earlier operation never observes them.
    pub fn copy_forward(&mut self, src: usize, dst: usize) {
        let src_frame = self.frames[src].clone();
        self.frames[dst] = src_frame;
        let src_cols = self.columns[src].clone();
        self.columns[dst] = src_cols;
    }
}
