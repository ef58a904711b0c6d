pub mod admission;

pub use admission::media_stream_admission;
