pub mod dispatcher;
pub mod frame;
pub mod pool;

pub use dispatcher::{CaptureDispatcher, ContractViolation, DispatchError, Stream};
pub use frame::{ElementType, FrameMode, Resolution};
pub use pool::{FrameArena, SlotRole, VideoBuffer};
