use thiserror::Error;

use crate::{SyncEvent, SyncStage};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("illegal sync transition: {event:?} from {from:?}")]
    IllegalTransition { from: SyncStage, event: SyncEvent },

    #[error("sync failed: {0}")]
    SyncFailed(String),
}
