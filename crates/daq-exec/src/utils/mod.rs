pub mod pgroup;
pub mod user;
