pub mod get;
pub mod init;
pub mod ls;
pub mod mkdir;
pub mod mv;
pub mod put;
pub mod refresh;
pub mod rm;
pub mod stat;
pub mod version;

pub use get::Get;
pub use init::Init;
pub use ls::Ls;
pub use mkdir::Mkdir;
pub use mv::Mv;
pub use put::Put;
pub use refresh::Refresh;
pub use rm::Rm;
pub use stat::Stat;
pub use version::Version;

use common::fs::FsError;

use crate::state::StateError;

/// Failure of an operation on the stored tree
#[derive(Debug, thiserror::Error)]
pub enum FsOpError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Fs(#[from] FsError),
}
