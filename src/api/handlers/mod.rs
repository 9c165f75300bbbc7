pub mod repeat;
