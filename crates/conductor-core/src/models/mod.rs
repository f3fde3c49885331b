pub mod agent;
pub mod approval;
pub mod checkpoint;
pub mod coordination;
pub mod insight;
pub mod workflow;

pub use agent::*;
pub use approval::*;
pub use checkpoint::*;
pub use coordination::*;
pub use insight::*;
pub use workflow::*;
