pub mod catalog;
pub mod enrollment_service;
pub mod navigation_service;
pub mod notification_service;
pub mod progress_service;
pub mod scheduler_service;
pub mod session_service;
