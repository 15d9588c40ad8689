pub mod merger;
pub mod ring;

pub use merger::merge;
pub use ring::RingBuffer;
