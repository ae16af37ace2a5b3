// Frame execution on top of the backend and the render graph

pub mod passes;
pub mod renderer;

pub use passes::clear_program;
pub use renderer::{
    execute_batches, plan_submission, BatchExecutor, BatchSubmission, FrameState, Renderer,
};
