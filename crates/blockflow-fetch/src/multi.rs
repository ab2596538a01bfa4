//! Row cursors over several dependencies read side by side (e.g. UNION).
//!
//! Each dependency has its own data-row cursor. All dependencies carry the
//! same shadow rows, so a shadow row is handed out once, after every
//! dependency has consumed the data rows in front of it.

use blockflow_block::SharedBlock;
use blockflow_core::types::ExecutionState;

use crate::error::Result;
use crate::proxy::DependencyProxy;
use crate::rows::{InputRow, ShadowRow};

struct DependencyInfo {
    current_block: Option<SharedBlock>,
    row_index: usize,
    upstream_state: ExecutionState,
}

impl DependencyInfo {
    fn new() -> Self {
        Self {
            current_block: None,
            row_index: 0,
            upstream_state: ExecutionState::HasMore,
        }
    }

    fn index_valid(&self) -> bool {
        self.current_block
            .as_ref()
            .map_or(false, |b| self.row_index < b.size())
    }

    fn at_shadow_row(&self) -> bool {
        self.current_block
            .as_ref()
            .map_or(false, |b| b.is_shadow_row(self.row_index))
    }

    /// Drained and told by upstream that nothing follows.
    fn exhausted(&self) -> bool {
        !self.index_valid() && self.upstream_state.is_done()
    }

    fn state_after_data(&self, block: &SharedBlock) -> ExecutionState {
        if self.row_index >= block.size() {
            self.upstream_state
        } else if block.is_shadow_row(self.row_index) {
            ExecutionState::Done
        } else {
            ExecutionState::HasMore
        }
    }
}

pub struct MultiDependencySingleRowFetcher {
    proxy: DependencyProxy,
    dependency_infos: Vec<DependencyInfo>,
}

impl MultiDependencySingleRowFetcher {
    pub fn new(proxy: DependencyProxy) -> Self {
        Self {
            proxy,
            dependency_infos: Vec::new(),
        }
    }

    pub fn proxy(&self) -> &DependencyProxy {
        &self.proxy
    }

    /// Set up one cursor per dependency. Idempotent.
    pub fn init_dependencies(&mut self) {
        if self.dependency_infos.is_empty() {
            self.dependency_infos = (0..self.proxy.number_dependencies())
                .map(|_| DependencyInfo::new())
                .collect();
        }
    }

    pub fn number_dependencies(&self) -> usize {
        self.proxy.number_dependencies()
    }

    /// Load the next block of `dependency` into its cursor.
    fn refill(&mut self, dependency: usize, at_most: usize) -> Result<ExecutionState> {
        let (state, block) = self.proxy.fetch_block_for_dependency(dependency, at_most)?;
        if state.is_waiting() {
            return Ok(state);
        }
        let info = &mut self.dependency_infos[dependency];
        info.upstream_state = state;
        info.current_block = block;
        info.row_index = 0;
        Ok(state)
    }

    /// Make sure `dependency` is positioned on a row. Returns the state to
    /// answer with if it is not.
    fn ensure_row(&mut self, dependency: usize, at_most: usize) -> Result<Option<ExecutionState>> {
        self.init_dependencies();
        let info = &self.dependency_infos[dependency];
        if info.index_valid() {
            return Ok(None);
        }
        if info.upstream_state.is_done() {
            return Ok(Some(ExecutionState::Done));
        }
        let state = self.refill(dependency, at_most)?;
        if state.is_waiting() || !self.dependency_infos[dependency].index_valid() {
            return Ok(Some(state));
        }
        Ok(None)
    }

    /// Next data row of `dependency` in the current segment.
    pub fn fetch_row_for_dependency(
        &mut self,
        dependency: usize,
        at_most: usize,
    ) -> Result<(ExecutionState, Option<InputRow>)> {
        if let Some(state) = self.ensure_row(dependency, at_most)? {
            return Ok((state, None));
        }
        let info = &mut self.dependency_infos[dependency];
        let Some(block) = info.current_block.clone() else {
            return Ok((info.upstream_state, None));
        };
        if block.is_shadow_row(info.row_index) {
            return Ok((ExecutionState::Done, None));
        }
        let row = InputRow::new(block.clone(), info.row_index);
        info.row_index += 1;
        Ok((info.state_after_data(&block), Some(row)))
    }

    /// Skip up to `at_most` data rows of `dependency`, stopping at the next
    /// shadow row or the end of the current block.
    pub fn skip_rows_for_dependency(
        &mut self,
        dependency: usize,
        at_most: usize,
    ) -> Result<(ExecutionState, usize)> {
        if let Some(state) = self.ensure_row(dependency, at_most)? {
            return Ok((state, 0));
        }
        let info = &mut self.dependency_infos[dependency];
        let Some(block) = info.current_block.clone() else {
            return Ok((info.upstream_state, 0));
        };
        let end = block
            .shadow_rows()
            .next_from(info.row_index)
            .unwrap_or(block.size());
        let skipped = at_most.min(end - info.row_index);
        info.row_index += skipped;
        Ok((info.state_after_data(&block), skipped))
    }

    /// The shadow row all dependencies are positioned on, once every one of
    /// them has consumed its data rows.
    pub fn fetch_shadow_row(
        &mut self,
        at_most: usize,
    ) -> Result<(ExecutionState, Option<ShadowRow>)> {
        self.init_dependencies();
        for dependency in 0..self.dependency_infos.len() {
            let info = &self.dependency_infos[dependency];
            if !info.index_valid() && !info.upstream_state.is_done() {
                let state = self.refill(dependency, at_most)?;
                if state.is_waiting() {
                    return Ok((state, None));
                }
            }
        }

        for info in &self.dependency_infos {
            let pending_data = if info.index_valid() {
                !info.at_shadow_row()
            } else {
                !info.upstream_state.is_done()
            };
            if pending_data {
                return Ok((ExecutionState::HasMore, None));
            }
        }
        if self.dependency_infos.iter().all(DependencyInfo::exhausted) {
            return Ok((ExecutionState::Done, None));
        }

        let mut shadow: Option<ShadowRow> = None;
        for info in &mut self.dependency_infos {
            let Some(block) = info.current_block.as_ref().filter(|_| info.index_valid()) else {
                continue;
            };
            match &shadow {
                None => shadow = ShadowRow::new(block.clone(), info.row_index),
                Some(first) => debug_assert_eq!(
                    block.shadow_row_depth(info.row_index),
                    Some(first.depth()),
                    "dependencies disagree on shadow rows"
                ),
            }
            info.row_index += 1;
        }

        // A returned shadow row is always followed by one more call; only a
        // call without a row answers Done.
        Ok((ExecutionState::HasMore, shadow))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{block, pool, proxy_over, shadow_block, Script};
    use blockflow_block::Value;
    use blockflow_core::types::BlockPassthrough;
    use ExecutionState::{Done, HasMore, Waiting};

    #[test]
    fn dependencies_are_read_independently() {
        let pool = pool();
        let (first, first_calls) = Script::new(vec![Script::done(Some(block(&pool, &[1])))]);
        let (second, _) = Script::new(vec![
            Script::waiting(),
            Script::done(Some(block(&pool, &[2, 3]))),
        ]);
        let mut f = MultiDependencySingleRowFetcher::new(proxy_over(
            &pool,
            vec![first, second],
            BlockPassthrough::Disable,
        ));
        f.init_dependencies();
        assert_eq!(f.number_dependencies(), 2);

        let (state, row) = f.fetch_row_for_dependency(0, 10).unwrap();
        assert_eq!(state, Done);
        assert_eq!(row.unwrap().value(0), &Value::Int(1));
        assert_eq!(f.fetch_row_for_dependency(1, 10).unwrap().0, Waiting);
        let (state, row) = f.fetch_row_for_dependency(1, 10).unwrap();
        assert_eq!(state, HasMore);
        assert_eq!(row.unwrap().value(0), &Value::Int(2));
        assert_eq!(f.skip_rows_for_dependency(1, 10).unwrap(), (Done, 1));

        assert_eq!(f.fetch_row_for_dependency(0, 10).unwrap().0, Done);
        assert_eq!(first_calls.get(), 1);
    }

    #[test]
    fn shadow_row_waits_for_every_dependency() {
        let pool = pool();
        let (first, _) = Script::new(vec![Script::done(Some(shadow_block(
            &pool,
            &[None, Some(0)],
        )))]);
        let (second, _) = Script::new(vec![Script::done(Some(shadow_block(
            &pool,
            &[None, None, Some(0)],
        )))]);
        let mut f = MultiDependencySingleRowFetcher::new(proxy_over(
            &pool,
            vec![first, second],
            BlockPassthrough::Disable,
        ));

        let (state, shadow) = f.fetch_shadow_row(10).unwrap();
        assert_eq!(state, HasMore);
        assert!(shadow.is_none());

        assert_eq!(f.fetch_row_for_dependency(0, 10).unwrap().0, Done);
        assert!(f.fetch_shadow_row(10).unwrap().1.is_none());

        assert_eq!(f.fetch_row_for_dependency(1, 10).unwrap().0, HasMore);
        assert_eq!(f.fetch_row_for_dependency(1, 10).unwrap().0, Done);

        let (state, shadow) = f.fetch_shadow_row(10).unwrap();
        assert_eq!(state, HasMore);
        assert!(shadow.unwrap().is_relevant());

        assert_eq!(f.fetch_row_for_dependency(0, 10).unwrap().0, Done);
        let (state, shadow) = f.fetch_shadow_row(10).unwrap();
        assert_eq!(state, Done);
        assert!(shadow.is_none());
    }

    #[test]
    fn last_shadow_row_is_followed_by_a_done_call() {
        let pool = pool();
        let (only, _) = Script::new(vec![Script::done(Some(shadow_block(
            &pool,
            &[None, Some(0), None, Some(0)],
        )))]);
        let mut f = MultiDependencySingleRowFetcher::new(proxy_over(
            &pool,
            vec![only],
            BlockPassthrough::Disable,
        ));

        assert_eq!(f.fetch_row_for_dependency(0, 10).unwrap().0, Done);
        let (state, shadow) = f.fetch_shadow_row(10).unwrap();
        assert_eq!((state, shadow.unwrap().row_index()), (HasMore, 1));
        assert_eq!(f.fetch_row_for_dependency(0, 10).unwrap().0, Done);
        let (state, shadow) = f.fetch_shadow_row(10).unwrap();
        assert_eq!((state, shadow.unwrap().row_index()), (HasMore, 3));

        let (state, row) = f.fetch_row_for_dependency(0, 10).unwrap();
        assert_eq!(state, Done);
        assert!(row.is_none());
        let (state, shadow) = f.fetch_shadow_row(10).unwrap();
        assert_eq!(state, Done);
        assert!(shadow.is_none());
    }
}
