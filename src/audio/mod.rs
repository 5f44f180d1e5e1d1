pub mod decode;
#[cfg(feature = "device")]
pub mod device;
pub mod playback;
pub mod processing;

pub use decode::{decode, decode_audio_data, decode_clip, encode};
#[cfg(feature = "device")]
pub use device::CpalOutput;
pub use playback::{ActiveOutput, AudioOutput, FinishOnce, OnFinished, PlaybackEnd};
