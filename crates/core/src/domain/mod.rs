pub mod booking;
pub mod business;
pub mod catalog;
pub mod conversation;
pub mod customer;
pub mod order;
pub mod task_log;
