pub mod closet;
pub mod job;
pub mod tryout;
