pub mod engine;
pub mod reconciler;
pub mod rules;

pub use engine::*;
pub use reconciler::*;
pub use rules::*;
