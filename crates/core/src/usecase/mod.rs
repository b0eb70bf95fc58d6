pub mod job_queue;
pub mod preempt;
pub mod scheduler;
mod worker;
