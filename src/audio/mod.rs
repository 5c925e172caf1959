pub mod cache;
pub mod chain;
pub mod key;
pub mod queue;
pub mod remote;
pub mod renderer;
pub mod tier;
pub mod wav;
