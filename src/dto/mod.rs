pub mod participant_dto;
pub mod progress_dto;
pub mod session_dto;
