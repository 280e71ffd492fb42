//! 编排层：轮次状态、过程事件、主循环

pub mod events;
pub mod loop_;
pub mod turn;

pub use events::TurnEvent;
pub use loop_::{run_turn, TurnOutcome, TurnSession};
pub use turn::Turn;
