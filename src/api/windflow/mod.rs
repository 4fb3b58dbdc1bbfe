pub mod envelope;
pub mod ws;
