//! Transport to the conversion backend.
//!
//! [`Backend`] is the seam between the session logic and the network: the
//! production implementation is [`HttpBackend`], tests substitute a scripted one.

pub mod backend;
pub mod http;
pub mod wire;

pub use backend::Backend;
pub use http::HttpBackend;
pub use wire::{
    ApiKeyResponse, ConvertRequest, ConvertResponse, ExportPayload, HardwareIdResponse,
    ManifestResponse, StatusResponse, UploadForm, UploadResponse,
};
