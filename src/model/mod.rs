pub mod comment;
pub mod record;
