//! Row cursor over a single (possibly chained) dependency.
//!
//! Data rows and shadow rows come in segments. `fetch_row` answers `Done`
//! at the end of a data segment; the following shadow rows are then read
//! with `fetch_shadow_row`. After a shadow row, a deeper (irrelevant) shadow
//! row is returned right away, but any new segment, even an empty one, must
//! be confirmed by one more `fetch_row` call.

use blockflow_block::SharedBlock;
use blockflow_core::types::ExecutionState;

use crate::error::Result;
use crate::proxy::DependencyProxy;
use crate::rows::{InputRow, ShadowRow};

pub struct SingleRowFetcher {
    proxy: DependencyProxy,
    current_block: Option<SharedBlock>,
    row_index: usize,
    upstream_state: ExecutionState,
    /// Depth of the shadow row returned last, cleared by data-row access.
    last_shadow_depth: Option<u64>,
}

impl SingleRowFetcher {
    pub fn new(proxy: DependencyProxy) -> Self {
        Self {
            proxy,
            current_block: None,
            row_index: 0,
            upstream_state: ExecutionState::HasMore,
            last_shadow_depth: None,
        }
    }

    pub fn proxy(&self) -> &DependencyProxy {
        &self.proxy
    }

    pub fn proxy_mut(&mut self) -> &mut DependencyProxy {
        &mut self.proxy
    }

    /// State of the last non-waiting answer from upstream.
    pub fn upstream_state(&self) -> ExecutionState {
        self.upstream_state
    }

    fn index_valid(&self) -> bool {
        self.current_block
            .as_ref()
            .map_or(false, |b| self.row_index < b.size())
    }

    /// Position on a row, fetching a new block when the current one is used
    /// up. Returns the state to answer with if no row is available.
    fn ensure_row(&mut self, at_most: usize) -> Result<Option<ExecutionState>> {
        if self.index_valid() {
            return Ok(None);
        }
        if self.upstream_state.is_done() {
            return Ok(Some(ExecutionState::Done));
        }
        let (state, block) = self.proxy.fetch_block(at_most)?;
        if state.is_waiting() {
            return Ok(Some(state));
        }
        self.upstream_state = state;
        self.current_block = block;
        self.row_index = 0;
        if self.index_valid() {
            Ok(None)
        } else {
            Ok(Some(state))
        }
    }

    /// State to report after advancing past a data row.
    fn state_after_data(&self, block: &SharedBlock) -> ExecutionState {
        if self.row_index >= block.size() {
            self.upstream_state
        } else if block.is_shadow_row(self.row_index) {
            ExecutionState::Done
        } else {
            ExecutionState::HasMore
        }
    }

    /// Next data row of the current segment.
    pub fn fetch_row(&mut self, at_most: usize) -> Result<(ExecutionState, Option<InputRow>)> {
        if let Some(state) = self.ensure_row(at_most)? {
            return Ok((state, None));
        }
        let Some(block) = self.current_block.clone() else {
            return Ok((self.upstream_state, None));
        };
        self.last_shadow_depth = None;
        if block.is_shadow_row(self.row_index) {
            return Ok((ExecutionState::Done, None));
        }
        let row = InputRow::new(block.clone(), self.row_index);
        self.row_index += 1;
        Ok((self.state_after_data(&block), Some(row)))
    }

    /// Next shadow row, once the data rows before it have been consumed.
    pub fn fetch_shadow_row(
        &mut self,
        at_most: usize,
    ) -> Result<(ExecutionState, Option<ShadowRow>)> {
        if let Some(state) = self.ensure_row(at_most)? {
            return Ok((state, None));
        }
        let Some(block) = self.current_block.clone() else {
            return Ok((self.upstream_state, None));
        };
        let Some(row) = ShadowRow::new(block.clone(), self.row_index) else {
            return Ok((ExecutionState::HasMore, None));
        };
        if row.is_relevant() && self.last_shadow_depth.is_some() {
            return Ok((ExecutionState::HasMore, None));
        }
        self.row_index += 1;
        self.last_shadow_depth = Some(row.depth());
        let state = if self.row_index >= block.size() {
            self.upstream_state
        } else {
            ExecutionState::HasMore
        };
        Ok((state, Some(row)))
    }

    /// Skip up to `at_most` data rows without materializing them. Never
    /// skips past a shadow row of the current block.
    pub fn skip_rows(&mut self, at_most: usize) -> Result<(ExecutionState, usize)> {
        if let Some(block) = self.current_block.clone().filter(|_| self.index_valid()) {
            let end = block
                .shadow_rows()
                .next_from(self.row_index)
                .unwrap_or(block.size());
            let skipped = at_most.min(end - self.row_index);
            self.row_index += skipped;
            self.last_shadow_depth = None;
            return Ok((self.state_after_data(&block), skipped));
        }
        if self.upstream_state.is_done() {
            return Ok((ExecutionState::Done, 0));
        }
        let (state, skipped) = self.proxy.skip_some(at_most)?;
        if !state.is_waiting() {
            self.upstream_state = state;
            self.last_shadow_depth = None;
        }
        Ok((state, skipped))
    }

    /// Next upstream block for an operator forwarding its input. Its rows are
    /// still replayed through `fetch_row` afterwards.
    pub fn fetch_block_for_passthrough(
        &mut self,
        at_most: usize,
    ) -> Result<(ExecutionState, Option<SharedBlock>)> {
        self.proxy.fetch_block_for_passthrough(at_most)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{block, pool, proxy_over, shadow_block, Script};
    use blockflow_block::Value;
    use blockflow_core::types::BlockPassthrough;
    use ExecutionState::{Done, HasMore, Waiting};

    fn fetcher(answers: Vec<(ExecutionState, Option<SharedBlock>)>) -> SingleRowFetcher {
        let pool = pool();
        let (script, _) = Script::new(answers);
        SingleRowFetcher::new(proxy_over(&pool, vec![script], BlockPassthrough::Disable))
    }

    fn value_of(row: &InputRow) -> i64 {
        row.value(0).as_int().unwrap()
    }

    #[test]
    fn last_row_of_done_block_reports_done() {
        let pool = pool();
        let mut f = fetcher(vec![Script::done(Some(block(&pool, &[1, 2])))]);
        let (state, row) = f.fetch_row(10).unwrap();
        assert_eq!((state, value_of(&row.unwrap())), (HasMore, 1));
        let (state, row) = f.fetch_row(10).unwrap();
        assert_eq!((state, value_of(&row.unwrap())), (Done, 2));
        let (state, row) = f.fetch_row(10).unwrap();
        assert_eq!(state, Done);
        assert!(row.is_none());
    }

    #[test]
    fn waiting_does_not_change_upstream_state() {
        let pool = pool();
        let mut f = fetcher(vec![
            Script::waiting(),
            Script::has_more(block(&pool, &[1])),
            Script::waiting(),
            Script::done(None),
        ]);
        assert_eq!(f.fetch_row(10).unwrap().0, Waiting);
        assert_eq!(f.upstream_state(), HasMore);
        assert_eq!(f.fetch_row(10).unwrap().0, HasMore);
        assert_eq!(f.fetch_row(10).unwrap().0, Waiting);
        let (state, row) = f.fetch_row(10).unwrap();
        assert_eq!(state, Done);
        assert!(row.is_none());
    }

    #[test]
    fn deeper_shadow_row_follows_directly() {
        let pool = pool();
        let mut f = fetcher(vec![Script::done(Some(shadow_block(
            &pool,
            &[None, Some(0), Some(1)],
        )))]);
        let (state, row) = f.fetch_row(10).unwrap();
        assert_eq!(state, Done);
        assert_eq!(row.unwrap().value(0), &Value::Int(0));

        let (state, shadow) = f.fetch_shadow_row(10).unwrap();
        assert_eq!((state, shadow.unwrap().depth()), (HasMore, 0));
        let (state, shadow) = f.fetch_shadow_row(10).unwrap();
        assert_eq!((state, shadow.unwrap().depth()), (Done, 1));
        assert!(f.fetch_shadow_row(10).unwrap().1.is_none());
    }

    #[test]
    fn relevant_shadow_row_needs_a_segment_fetch() {
        let pool = pool();
        let mut f = fetcher(vec![Script::done(Some(shadow_block(
            &pool,
            &[Some(0), Some(0)],
        )))]);
        let (state, shadow) = f.fetch_shadow_row(10).unwrap();
        assert_eq!((state, shadow.unwrap().row_index()), (HasMore, 0));

        let (state, shadow) = f.fetch_shadow_row(10).unwrap();
        assert_eq!(state, HasMore);
        assert!(shadow.is_none());

        let (state, row) = f.fetch_row(10).unwrap();
        assert_eq!(state, Done);
        assert!(row.is_none());

        let (state, shadow) = f.fetch_shadow_row(10).unwrap();
        assert_eq!((state, shadow.unwrap().row_index()), (Done, 1));
    }

    #[test]
    fn skip_stops_at_shadow_row() {
        let pool = pool();
        let mut f = fetcher(vec![Script::done(Some(shadow_block(
            &pool,
            &[None, None, None, Some(0), None],
        )))]);
        let (state, row) = f.fetch_row(10).unwrap();
        assert_eq!((state, row.unwrap().row_index()), (HasMore, 0));
        assert_eq!(f.skip_rows(10).unwrap(), (Done, 2));
        assert_eq!(f.skip_rows(10).unwrap(), (Done, 0));
        assert_eq!(f.fetch_shadow_row(10).unwrap().0, HasMore);
        assert_eq!(f.skip_rows(10).unwrap(), (Done, 1));
    }
}
