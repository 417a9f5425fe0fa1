use crate::dvar::{
    DvarError, DvarNode,
    persist::EepromDevice,
    rtos::Rtos,
    transport::Transport,
    types::{DistVarId, SearchContext},
};

impl<T, E, R, const SC: usize, const OC: usize, const RW: usize> DvarNode<T, E, R, SC, OC, RW>
where
    T: Transport,
    E: EepromDevice,
    R: Rtos,
    bitmaps::BitsImpl<RW>: bitmaps::Bits,
{
    /// Positions a search at the smallest registered ID.
    ///
    /// Returns [`DvarError::VariableNotFound`] if nothing is registered.
    pub fn init_search(&self) -> Result<SearchContext, DvarError> {
        self.locked(|s| {
            let first = s
                .registry
                .first_id()
                .ok_or(DvarError::VariableNotFound)?;
            s.snapshot(first)
        })
    }

    /// Positions a search at `id`, which must be registered.
    pub fn seek_local_variable(&self, id: DistVarId) -> Result<SearchContext, DvarError> {
        self.locked(|s| s.snapshot(id))
    }

    /// Advances `ctx` to the next registered ID in ascending order.
    ///
    /// Values are read at the moment of the call. At the end of the
    /// registry this returns [`DvarError::VariableNotFound`] and leaves
    /// `ctx` untouched; the search does not wrap.
    pub fn next_variable(&self, ctx: &mut SearchContext) -> Result<(), DvarError> {
        let next = self.locked(|s| {
            let id = s
                .registry
                .next_id_after(ctx.id)
                .ok_or(DvarError::VariableNotFound)?;
            s.snapshot(id)
        })?;
        *ctx = next;
        Ok(())
    }

    /// Iterates every registered variable in ascending ID order.
    ///
    /// Each step takes the registry lock separately, so values are read
    /// lazily. A storage error is yielded once and ends the iteration.
    pub fn variables(&self) -> Variables<'_, T, E, R, SC, OC, RW> {
        Variables {
            node: self,
            cursor: Cursor::Start,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Cursor {
    Start,
    After(DistVarId),
    Done,
}

/// Iterator returned by [`DvarNode::variables`].
pub struct Variables<'a, T, E, R, const SC: usize, const OC: usize, const RW: usize>
where
    T: Transport,
    E: EepromDevice,
    R: Rtos,
    bitmaps::BitsImpl<RW>: bitmaps::Bits,
{
    node: &'a DvarNode<T, E, R, SC, OC, RW>,
    cursor: Cursor,
}

impl<T, E, R, const SC: usize, const OC: usize, const RW: usize> Iterator
    for Variables<'_, T, E, R, SC, OC, RW>
where
    T: Transport,
    E: EepromDevice,
    R: Rtos,
    bitmaps::BitsImpl<RW>: bitmaps::Bits,
{
    type Item = Result<SearchContext, DvarError>;

    fn next(&mut self) -> Option<Self::Item> {
        let step = match self.cursor {
            Cursor::Done => return None,
            Cursor::Start => self.node.init_search(),
            Cursor::After(id) => self.node.locked(|s| match s.registry.next_id_after(id) {
                Some(next) => s.snapshot(next),
                None => Err(DvarError::VariableNotFound),
            }),
        };

        match step {
            Ok(ctx) => {
                self.cursor = Cursor::After(ctx.id);
                Some(Ok(ctx))
            }
            Err(DvarError::VariableNotFound) => {
                self.cursor = Cursor::Done;
                None
            }
            Err(err) => {
                self.cursor = Cursor::Done;
                Some(Err(err))
            }
        }
    }
}
