pub mod company;
pub mod evidence;
pub mod task;
