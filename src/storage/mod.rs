pub mod share;
pub mod song;
