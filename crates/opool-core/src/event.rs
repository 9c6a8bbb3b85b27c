use serde::Serialize;

/// Payload of the one-shot "pool opened" event, published after the open
/// collection pass completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PoolOpened {
    /// Keys left in the record store, root pointer included.
    pub record_count: usize,
}
