pub mod errors;
pub mod jam_types;
pub mod jamendo;
pub mod jobs;
pub mod jwt;
pub mod lastfm;
pub mod live;
pub mod password;
pub mod providers;
pub mod query;
pub mod s3;
pub mod tastedive;
pub mod trending;
pub mod validator;
pub mod week;
