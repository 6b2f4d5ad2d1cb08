pub mod runs;
pub mod system;
