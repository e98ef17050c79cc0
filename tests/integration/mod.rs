
mod group_notify;
mod scheduler_dag;
mod semaphore_fairness;
