pub mod session_key;
pub mod session_record;
pub mod session_status;

pub use session_key::SessionKey;
pub use session_record::SessionRecord;
pub use session_status::SessionStatus;
