pub mod audio;
pub mod storage;
pub mod stt;
