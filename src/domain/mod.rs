pub mod message;
pub mod promo;
pub mod thread;

pub use message::{OutboundMessage, ParseMode, PhotoMessage, TextMessage};
pub use promo::PromoRecord;
pub use thread::{ThreadPage, ThreadStatus};
