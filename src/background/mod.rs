mod cleaner;
pub mod supervisor;

pub use cleaner::start_expiration_cleaner;
pub use supervisor::TaskSupervisor;
