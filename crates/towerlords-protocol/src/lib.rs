pub mod event;
pub mod ids;
pub mod replay;
pub mod snapshot;
pub mod types;
pub mod wire;

pub use crate::event::*;
pub use crate::ids::*;
pub use crate::replay::*;
pub use crate::snapshot::*;
pub use crate::types::*;
pub use crate::wire::*;
