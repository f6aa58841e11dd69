use ::http::header::{AUTHORIZATION, CONTENT_TYPE};
use ::http::{Method, StatusCode};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::types::{
    FinalizeAttachment, FinalizeRequest, Message, UploadFile, UploadTarget, UploadTargetRequest,
    UploadTargetResponse,
};
use super::{bucket_key, expect_status, read_json, HttpRequest, Rest, RestError};
use crate::node::Node;

pub const MULTIPART_BOUNDARY: &str = "ATTACHE_BOUNDARY";

/// How chunks are handed to the platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadProtocol {
    /// A single multipart POST to the messages endpoint
    #[default]
    Multipart,
    /// Request an upload URL, PUT the bytes there, then post a
    ///  message referencing the uploaded file
    TwoPhase,
}

/// Progress of a two-phase upload. Any failure drops the
///  state, a retry starts again from `Pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    Pending,
    UrlObtained(UploadTarget),
    BytesUploaded { uploaded_filename: String },
    Finalized(Message),
}

/// Build a multipart body holding `data` as its single file part.
///  Returns the content type and the body.
pub fn multipart_body(data: &[u8]) -> (String, Bytes) {
    let name = Uuid::new_v4();
    let head = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"{n}\"; filename=\"{n}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
        b = MULTIPART_BOUNDARY,
        n = name
    );
    let tail = format!("\r\n--{}--\r\n", MULTIPART_BOUNDARY);

    let mut body = BytesMut::with_capacity(head.len() + data.len() + tail.len());
    body.extend_from_slice(head.as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(tail.as_bytes());

    (
        format!("multipart/form-data; boundary={}", MULTIPART_BOUNDARY),
        body.freeze(),
    )
}

/// The platform must echo back exactly what we sent
fn checked_node(message: Message, uploaded: u64) -> Result<Node, RestError> {
    let node = message.into_node()?;
    if node.size != uploaded {
        return Err(RestError::MalformedResponse(format!(
            "platform reports {} bytes for message {}, uploaded {}",
            node.size, node.mid, uploaded
        )));
    }
    Ok(node)
}

impl Rest {
    pub(super) async fn upload_multipart(&self, data: Bytes) -> Result<Node, RestError> {
        let credential = self.rotator.next_credential();
        let channel = self.rotator.next_channel();
        let (content_type, body) = multipart_body(&data);

        let url = self.endpoint(&format!("/channels/{}/messages", channel))?;
        let request = HttpRequest::new(Method::POST, url)
            .header(AUTHORIZATION, &credential.authorization)?
            .header(CONTENT_TYPE, &content_type)?
            .body(body);

        let bucket = bucket_key(&credential, &channel, "messages");
        let response = self.send(Some(&bucket), request).await?;
        let response = expect_status("create attachment", StatusCode::OK, response).await?;
        checked_node(read_json(response).await?, data.len() as u64)
    }

    pub(super) async fn upload_two_phase(&self, data: Bytes) -> Result<Node, RestError> {
        let filename = Uuid::new_v4().to_string();
        let size = data.len() as u64;

        let mut state = UploadState::Pending;
        loop {
            state = match state {
                UploadState::Pending => {
                    UploadState::UrlObtained(self.request_upload_target(&filename, size).await?)
                }
                UploadState::UrlObtained(target) => {
                    self.put_upload(&target.upload_url, data.clone()).await?;
                    UploadState::BytesUploaded {
                        uploaded_filename: target.upload_filename,
                    }
                }
                UploadState::BytesUploaded { uploaded_filename } => UploadState::Finalized(
                    self.finalize_upload(&filename, &uploaded_filename).await?,
                ),
                UploadState::Finalized(message) => return checked_node(message, size),
            };
            tracing::trace!("two-phase upload {}: {:?}", filename, state_name(&state));
        }
    }

    async fn request_upload_target(
        &self,
        filename: &str,
        size: u64,
    ) -> Result<UploadTarget, RestError> {
        let credential = self.rotator.next_credential();
        let channel = self.rotator.next_channel();

        let body = serde_json::to_vec(&UploadTargetRequest {
            files: vec![UploadFile {
                filename: filename.to_string(),
                file_size: size,
            }],
        })?;
        let url = self.endpoint(&format!("/channels/{}/attachments", channel))?;
        let request = HttpRequest::new(Method::POST, url)
            .header(AUTHORIZATION, &credential.authorization)?
            .header(CONTENT_TYPE, "application/json")?
            .body(body);

        let bucket = bucket_key(&credential, &channel, "attachments");
        let response = self.send(Some(&bucket), request).await?;
        let response = expect_status("request upload url", StatusCode::OK, response).await?;
        let targets: UploadTargetResponse = read_json(response).await?;
        targets.attachments.into_iter().next().ok_or_else(|| {
            RestError::MalformedResponse("upload url response has no attachments".to_string())
        })
    }

    /// The upload URL is pre-signed, it must not see our credential
    async fn put_upload(&self, upload_url: &str, data: Bytes) -> Result<(), RestError> {
        let url = Url::parse(upload_url)?;
        let request = HttpRequest::new(Method::PUT, url)
            .header(CONTENT_TYPE, "application/octet-stream")?
            .body(data);

        let response = self.send(None, request).await?;
        expect_status("upload bytes", StatusCode::OK, response).await?;
        Ok(())
    }

    async fn finalize_upload(
        &self,
        filename: &str,
        uploaded_filename: &str,
    ) -> Result<Message, RestError> {
        let credential = self.rotator.next_credential();
        let channel = self.rotator.next_channel();

        let body = serde_json::to_vec(&FinalizeRequest {
            attachments: vec![FinalizeAttachment {
                id: "0".to_string(),
                filename: filename.to_string(),
                uploaded_filename: uploaded_filename.to_string(),
            }],
        })?;
        let url = self.endpoint(&format!("/channels/{}/messages", channel))?;
        let request = HttpRequest::new(Method::POST, url)
            .header(AUTHORIZATION, &credential.authorization)?
            .header(CONTENT_TYPE, "application/json")?
            .body(body);

        let bucket = bucket_key(&credential, &channel, "messages");
        let response = self.send(Some(&bucket), request).await?;
        let response = expect_status("finalize upload", StatusCode::OK, response).await?;
        read_json(response).await
    }
}

fn state_name(state: &UploadState) -> &'static str {
    match state {
        UploadState::Pending => "pending",
        UploadState::UrlObtained(_) => "url obtained",
        UploadState::BytesUploaded { .. } => "bytes uploaded",
        UploadState::Finalized(_) => "finalized",
    }
}
