//! Finished artifacts and the delivery capability

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;

use crate::location::sanitize_filename;
use crate::message::{DownloadMessage, DOWNLOAD_CSV, DOWNLOAD_IMAGE, DOWNLOAD_PDF};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Image,
    Pdf,
    Csv,
}

impl ArtifactKind {
    pub fn mime(self) -> &'static str {
        match self {
            Self::Image => "image/png",
            Self::Pdf => "application/pdf",
            Self::Csv => "text/csv;charset=utf-8",
        }
    }

    pub fn message_type(self) -> &'static str {
        match self {
            Self::Image => DOWNLOAD_IMAGE,
            Self::Pdf => DOWNLOAD_PDF,
            Self::Csv => DOWNLOAD_CSV,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactData {
    /// Already encoded, as produced by the raster primitive
    DataUri(String),
    Bytes(Vec<u8>),
}

/// A finished file ready to hand to the delivery capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub filename: String,
    pub data: ArtifactData,
    /// Ask the user where to save
    pub prompt: bool,
}

impl Artifact {
    pub fn from_bytes(kind: ArtifactKind, filename: &str, bytes: Vec<u8>) -> Self {
        Self {
            kind,
            filename: sanitize_filename(filename),
            data: ArtifactData::Bytes(bytes),
            prompt: true,
        }
    }

    pub fn from_data_uri(kind: ArtifactKind, filename: &str, data_uri: String) -> Self {
        Self {
            kind,
            filename: sanitize_filename(filename),
            data: ArtifactData::DataUri(data_uri),
            prompt: true,
        }
    }

    pub fn to_data_uri(&self) -> String {
        match &self.data {
            ArtifactData::DataUri(uri) => uri.clone(),
            ArtifactData::Bytes(bytes) => {
                format!("data:{};base64,{}", self.kind.mime(), BASE64_STANDARD.encode(bytes))
            }
        }
    }

    /// Raw bytes, decoding a base64 data URI if needed.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match &self.data {
            ArtifactData::Bytes(bytes) => Some(bytes.clone()),
            ArtifactData::DataUri(uri) => decode_data_uri(uri),
        }
    }

    pub fn to_message(&self) -> DownloadMessage {
        DownloadMessage {
            kind: self.kind.message_type().to_string(),
            data_url: self.to_data_uri(),
            filename: self.filename.clone(),
        }
    }
}

/// Decode the payload of a `data:<mime>;base64,<data>` URI.
pub fn decode_data_uri(uri: &str) -> Option<Vec<u8>> {
    let (header, data) = uri.strip_prefix("data:")?.split_once(',')?;
    if header.ends_with(";base64") {
        BASE64_STANDARD.decode(data.trim()).ok()
    } else {
        Some(data.as_bytes().to_vec())
    }
}

/// Local file delivery. Fire-and-forget: implementations log their failures.
pub trait Delivery {
    fn deliver(&mut self, artifact: Artifact);
}

/// Keeps delivered artifacts in memory.
#[derive(Debug, Default)]
pub struct MemoryDelivery {
    pub delivered: Vec<Artifact>,
}

impl Delivery for MemoryDelivery {
    fn deliver(&mut self, artifact: Artifact) {
        self.delivered.push(artifact);
    }
}

impl<T: Delivery + ?Sized> Delivery for std::rc::Rc<std::cell::RefCell<T>> {
    fn deliver(&mut self, artifact: Artifact) {
        self.borrow_mut().deliver(artifact);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_data_uri() {
        let artifact = Artifact::from_bytes(ArtifactKind::Csv, "log.csv", b"a,b".to_vec());
        assert_eq!(artifact.to_data_uri(), "data:text/csv;charset=utf-8;base64,YSxi");
        assert_eq!(artifact.to_bytes().unwrap(), b"a,b");
    }

    #[test]
    fn test_message_form() {
        let artifact = Artifact::from_data_uri(ArtifactKind::Image, "chzzk_a/b.png", "data:image/png;base64,AA==".into());
        let message = artifact.to_message();
        assert_eq!(message.kind, "DOWNLOAD_IMAGE");
        assert_eq!(message.filename, "chzzk_a_b.png");
        assert_eq!(message.data_url, "data:image/png;base64,AA==");
    }

    #[test]
    fn test_decode_data_uri() {
        assert_eq!(decode_data_uri("data:image/png;base64,AAE=").unwrap(), vec![0, 1]);
        assert_eq!(decode_data_uri("data:,hi").unwrap(), b"hi");
        assert!(decode_data_uri("http://x").is_none());
        assert!(decode_data_uri("data:image/png;base64,@@@").is_none());
    }
}
