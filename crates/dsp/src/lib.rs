pub mod dc;
pub mod tone;
