//! The tagged record delivered to Event Manager callbacks.
//!
//! One arm per wire variant rather than a single struct with optional fields: a
//! callback that only cares about basic events never has to reason about a
//! `file_name: Option<String>` it will never see populated.

use crate::codec;

/// A decoded system event, already resolved to the event ID whose subscription
/// is the one the callback was registered under.
#[derive(Debug, Clone)]
pub enum SimEvent {
    /// Event ID plus a 32-bit payload whose meaning depends on the event itself.
    Basic { data: u32 },
    /// A basic event whose payload names the affected simulation object.
    ObjectLifecycle { data: u32, object_id: u32 },
    /// A basic event accompanied by a file system path (e.g. a flight plan load).
    Filename { data: u32, file_name: String },
    /// A basic event whose payload is a frame-rate measurement.
    Frame { frame_rate: u32 },
}

impl SimEvent {
    pub(crate) fn from_basic(ev: codec::BasicEvent) -> Self {
        Self::Basic { data: ev.data }
    }

    pub(crate) fn from_object(ev: codec::ObjectEvent) -> Self {
        Self::ObjectLifecycle {
            data: ev.data,
            object_id: ev.object_id,
        }
    }

    pub(crate) fn from_filename(ev: codec::FilenameEvent) -> Self {
        Self::Filename {
            data: ev.data,
            file_name: ev.file_name,
        }
    }

    pub(crate) fn from_frame(ev: codec::FrameEvent) -> Self {
        Self::Frame {
            frame_rate: ev.frame_rate,
        }
    }
}
