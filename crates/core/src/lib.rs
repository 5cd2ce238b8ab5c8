//! Collaborator capabilities for the live molecular-viewer session.
//!
//! The session client only carries audio and function calls; this crate is
//! where they turn into something: PCM16 capture and playback files, and the
//! structure-viewer tools the model can call.

pub mod audio;
pub mod viewer;

pub use audio::{AudioError, AudioFrame, AudioSource, WavFileSource, WavRecorder};
pub use viewer::{Representation, StructureViewer, ViewerCommand, ViewerError};
