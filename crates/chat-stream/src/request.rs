use serde::{Deserialize, Serialize};

use crate::errors::ClientError;

/// Reference to a previously uploaded attachment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// JSON body of an outbound chat request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_id: None,
            model: None,
            attachments: Vec::new(),
            contact_id: None,
        }
    }

    pub fn conversation(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn attachment(mut self, attachment: AttachmentRef) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ClientError> {
        if self.message.trim().is_empty() && self.attachments.is_empty() {
            return Err(ClientError::Validation(
                "message must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// How the stream is opened.
#[derive(Clone, Debug, PartialEq)]
pub enum Channel {
    /// Body-less `GET` push channel.
    Listen,
    /// `POST` whose response body is the event stream.
    Send(ChatRequest),
}

impl Channel {
    pub fn has_body(&self) -> bool {
        matches!(self, Self::Send(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_are_omitted_from_body() {
        let body = serde_json::to_value(ChatRequest::new("hi")).expect("serialize");
        assert_eq!(body, serde_json::json!({"message":"hi"}));
    }

    #[test]
    fn full_request_body_shape() {
        let request = ChatRequest::new("hi")
            .conversation("c-1")
            .model("small")
            .attachment(AttachmentRef {
                id: "f-9".into(),
                name: Some("notes.txt".into()),
                mime_type: None,
            });
        let body = serde_json::to_value(&request).expect("serialize");
        assert_eq!(body["conversation_id"], "c-1");
        assert_eq!(body["model"], "small");
        assert_eq!(body["attachments"][0]["id"], "f-9");
        assert!(body["attachments"][0].get("mime_type").is_none());
    }

    #[test]
    fn blank_message_without_attachments_is_rejected() {
        assert!(ChatRequest::new("  ").validate().is_err());
        let with_file = ChatRequest::new("").attachment(AttachmentRef {
            id: "f".into(),
            name: None,
            mime_type: None,
        });
        assert!(with_file.validate().is_ok());
    }
}
