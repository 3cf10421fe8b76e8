pub mod bootstrap;
pub mod lifecycle;
