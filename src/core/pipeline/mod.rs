pub mod accepting;
pub mod judging;
pub mod publishing;
