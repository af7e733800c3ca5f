pub mod invoke;
pub mod threads;
