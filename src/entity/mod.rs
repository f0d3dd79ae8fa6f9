pub mod event;
pub mod registration;
pub mod student_profile;
pub mod user;
