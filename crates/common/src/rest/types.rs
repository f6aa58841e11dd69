use serde::{Deserialize, Serialize};

use super::error::RestError;
use crate::node::Node;

/// A channel message, trimmed to the fields we read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub filename: String,
    pub size: u64,
    pub url: String,
}

impl Message {
    /// Message ids are numeric snowflakes sent as strings
    pub fn mid(&self) -> Result<u64, RestError> {
        self.id
            .parse()
            .map_err(|_| RestError::MalformedResponse(format!("invalid message id '{}'", self.id)))
    }

    pub fn attachment(&self) -> Result<&Attachment, RestError> {
        self.attachments.first().ok_or_else(|| {
            RestError::MalformedResponse(format!("message {} has no attachments", self.id))
        })
    }

    /// Decode the message's first attachment into a node at position 0
    pub fn into_node(self) -> Result<Node, RestError> {
        let mid = self.mid()?;
        let attachment = self.attachment()?;
        Ok(Node::from_signed(&attachment.url, mid, attachment.size, 0)?)
    }
}

/* Two-phase upload bodies */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct UploadTargetRequest {
    pub files: Vec<UploadFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct UploadFile {
    pub filename: String,
    pub file_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct UploadTargetResponse {
    pub attachments: Vec<UploadTarget>,
}

/// Where to PUT the bytes of a two-phase upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    pub upload_url: String,
    pub upload_filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FinalizeRequest {
    pub attachments: Vec<FinalizeAttachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FinalizeAttachment {
    pub id: String,
    pub filename: String,
    pub uploaded_filename: String,
}
