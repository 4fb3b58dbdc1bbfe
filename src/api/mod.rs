pub mod source;
pub mod windflow;
