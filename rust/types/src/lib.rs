mod changefeed;
mod timestamp;

pub use changefeed::*;
pub use timestamp::*;
