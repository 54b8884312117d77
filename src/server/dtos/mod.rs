pub mod error_dto;
pub mod health_dto;
pub mod stream_dto;

pub use error_dto::ErrorResponse;
pub use stream_dto::MediaQuery;
