pub mod head;
pub mod run;
