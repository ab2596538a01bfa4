//! Shadow-row markers of a block.
//!
//! Stored as `(row, depth)` pairs sorted by row. Rows are marked in ascending
//! order while a block is filled, so inserts are appends in practice.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShadowRows {
    rows: Vec<(usize, u64)>,
}

impl ShadowRows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn search(&self, row: usize) -> Result<usize, usize> {
        self.rows.binary_search_by_key(&row, |&(r, _)| r)
    }

    /// Mark `row` with `depth`, replacing an existing mark.
    pub fn insert(&mut self, row: usize, depth: u64) {
        match self.rows.last() {
            Some(&(last, _)) if last < row => self.rows.push((row, depth)),
            None => self.rows.push((row, depth)),
            _ => match self.search(row) {
                Ok(pos) => self.rows[pos].1 = depth,
                Err(pos) => self.rows.insert(pos, (row, depth)),
            },
        }
    }

    /// Unmark `row`, returning its former depth.
    pub fn remove(&mut self, row: usize) -> Option<u64> {
        let pos = self.search(row).ok()?;
        Some(self.rows.remove(pos).1)
    }

    pub fn depth(&self, row: usize) -> Option<u64> {
        self.search(row).ok().map(|pos| self.rows[pos].1)
    }

    pub fn contains(&self, row: usize) -> bool {
        self.search(row).is_ok()
    }

    /// First shadow row at or after `row`.
    pub fn next_from(&self, row: usize) -> Option<usize> {
        let pos = match self.search(row) {
            Ok(pos) | Err(pos) => pos,
        };
        self.rows.get(pos).map(|&(r, _)| r)
    }

    /// Drop all marks for rows `>= len`.
    pub fn truncate(&mut self, len: usize) {
        let pos = match self.search(len) {
            Ok(pos) | Err(pos) => pos,
        };
        self.rows.truncate(pos);
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.rows.iter().copied()
    }
}
