pub mod participant;
pub mod progress;
pub mod session;
pub mod test;
