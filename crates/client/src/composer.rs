//! Message composer for one conversation.
//!
//! Input is cleared the moment a send starts. The sent message only enters
//! the store once the server has assigned its id, through the same merge the
//! socket uses, so the echo and the push collapse into one entry.

use std::sync::{Arc, Mutex, MutexGuard};

use corpchat_shared::{Attachment, Message, SendMessageRequest};

use crate::api_client::ChatApi;
use crate::error::ChatError;
use crate::stores::ChatStore;
use crate::uploader::{AttachmentUploader, FailedUpload, LocalFile, UploadOutcome};

#[derive(Debug, Default, Clone)]
struct ComposerState {
    text: String,
    attachments: Vec<Attachment>,
    failed_uploads: Vec<FailedUpload>,
    sending: bool,
    uploading: bool,
    last_error: Option<ChatError>,
}

impl ComposerState {
    fn is_busy(&self) -> bool {
        self.sending || self.uploading
    }

    fn has_content(&self) -> bool {
        !self.text.trim().is_empty() || !self.attachments.is_empty()
    }
}

/// Composer bound to a single conversation. Clones share state.
#[derive(Clone)]
pub struct Composer {
    chat_id: String,
    api: Arc<dyn ChatApi>,
    store: Arc<ChatStore>,
    uploader: AttachmentUploader,
    state: Arc<Mutex<ComposerState>>,
}

impl Composer {
    pub fn new(
        chat_id: impl Into<String>,
        api: Arc<dyn ChatApi>,
        store: Arc<ChatStore>,
        uploader: AttachmentUploader,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            api,
            store,
            uploader,
            state: Arc::new(Mutex::new(ComposerState::default())),
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    fn lock(&self) -> MutexGuard<'_, ComposerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_text(&self, text: impl Into<String>) {
        self.lock().text = text.into();
    }

    pub fn text(&self) -> String {
        self.lock().text.clone()
    }

    pub fn attachments(&self) -> Vec<Attachment> {
        self.lock().attachments.clone()
    }

    /// Files from the last `attach` that did not make it.
    pub fn failed_uploads(&self) -> Vec<FailedUpload> {
        self.lock().failed_uploads.clone()
    }

    /// True while a send or an upload is in flight.
    pub fn is_busy(&self) -> bool {
        self.lock().is_busy()
    }

    pub fn last_error(&self) -> Option<ChatError> {
        self.lock().last_error.clone()
    }

    pub fn dismiss_error(&self) {
        self.lock().last_error = None;
    }

    pub fn can_send(&self) -> bool {
        let state = self.lock();
        !state.is_busy() && state.has_content()
    }

    /// Upload `files` and add the successful ones to the selection.
    ///
    /// Failed files are dropped from the selection and reported through
    /// [`failed_uploads`](Self::failed_uploads). Send stays disabled until
    /// every upload has settled.
    pub async fn attach(&self, files: Vec<LocalFile>) -> UploadOutcome {
        {
            let mut state = self.lock();
            if state.is_busy() || files.is_empty() {
                return UploadOutcome::default();
            }
            state.uploading = true;
            state.failed_uploads.clear();
        }

        let outcome = self.uploader.upload_all(files).await;

        let mut state = self.lock();
        state.attachments.extend(outcome.uploaded.iter().cloned());
        state.failed_uploads = outcome.failed.clone();
        state.uploading = false;
        outcome
    }

    /// Remove an uploaded attachment from the selection.
    pub fn discard_attachment(&self, index: usize) -> Option<Attachment> {
        let mut state = self.lock();
        (index < state.attachments.len()).then(|| state.attachments.remove(index))
    }

    /// Send the current input.
    ///
    /// Returns `Ok(None)` without doing anything when there is nothing to
    /// send or another send/upload is in flight. On failure the captured
    /// input is restored and the error is also kept in
    /// [`last_error`](Self::last_error).
    pub async fn send(&self) -> Result<Option<Message>, ChatError> {
        let (text, attachments) = {
            let mut state = self.lock();
            if state.is_busy() || !state.has_content() {
                return Ok(None);
            }
            state.sending = true;
            state.last_error = None;
            (
                std::mem::take(&mut state.text),
                std::mem::take(&mut state.attachments),
            )
        };

        let body = SendMessageRequest {
            content: text.trim().to_string(),
            attachments: attachments.clone(),
        };
        let result = self.api.send_message(&self.chat_id, &body).await;

        match result {
            Ok(message) => {
                self.store.apply_incoming(&self.chat_id, message.clone());
                self.lock().sending = false;
                Ok(Some(message))
            }
            Err(e) => {
                crate::log_warn!("send to {} failed: {}", self.chat_id, e);
                let error = ChatError::Send(e.user_message());
                let mut state = self.lock();
                // Restored attachments go back in front of any picked since.
                let newer = std::mem::replace(&mut state.attachments, attachments);
                state.attachments.extend(newer);
                if state.text.trim().is_empty() {
                    state.text = text;
                }
                state.last_error = Some(error.clone());
                state.sending = false;
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{conversation, http_error, FakeApi};
    use corpchat_shared::ProblemDetails;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn composer(api: Arc<FakeApi>) -> (Composer, Arc<ChatStore>) {
        let store = Arc::new(ChatStore::new(api.clone(), "emp"));
        store.upsert_conversation(conversation("c1", "emp", "boss"));
        let uploader = AttachmentUploader::new(api.clone(), 1024);
        (Composer::new("c1", api, store.clone(), uploader), store)
    }

    async fn wait_for_call(api: &FakeApi, prefix: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while api.call_count(prefix) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("call never made");
    }

    #[tokio::test]
    async fn clears_input_before_the_network_call_resolves() {
        let api = Arc::new(FakeApi::new("emp"));
        let gate = Arc::new(Notify::new());
        *api.send_gate.lock().unwrap() = Some(gate.clone());
        let (composer, store) = composer(api.clone());
        composer.set_text("hello boss");

        let sending = tokio::spawn({
            let composer = composer.clone();
            async move { composer.send().await }
        });
        wait_for_call(&api, "send_message").await;

        assert_eq!(composer.text(), "");
        assert!(composer.is_busy());
        assert!(store.messages("c1").is_empty());

        // A second send while the first is in flight does nothing.
        composer.set_text("again");
        assert_eq!(composer.send().await.unwrap(), None);
        assert_eq!(api.call_count("send_message"), 1);

        gate.notify_one();
        let sent = sending.await.unwrap().unwrap().unwrap();
        assert_eq!(sent.content, "hello boss");
        assert_eq!(store.messages("c1"), vec![sent.clone()]);

        // The socket echo of the same message is not duplicated.
        assert!(!store.apply_incoming("c1", sent));
        assert_eq!(store.messages("c1").len(), 1);
        assert!(!composer.is_busy());
    }

    #[tokio::test]
    async fn failure_restores_text_and_attachments() {
        let api = Arc::new(FakeApi::new("emp"));
        let gate = Arc::new(Notify::new());
        *api.send_gate.lock().unwrap() = Some(gate.clone());
        *api.send_error.lock().unwrap() =
            Some(http_error(500, ProblemDetails::internal_error("db down")));
        let (composer, store) = composer(api.clone());

        composer.attach(vec![LocalFile::new("a.png", vec![1])]).await;
        composer.set_text("first draft");
        let sending = tokio::spawn({
            let composer = composer.clone();
            async move { composer.send().await }
        });
        wait_for_call(&api, "send_message").await;

        // The user starts typing again and picks another file meanwhile.
        composer.set_text("second draft");
        {
            let mut state = composer.lock();
            state.attachments.push(corpchat_shared::Attachment {
                name: "b.pdf".into(),
                url: "/uploads/b.pdf".into(),
                kind: corpchat_shared::AttachmentKind::File,
                size: None,
            });
        }
        gate.notify_one();

        let err = sending.await.unwrap().unwrap_err();
        assert_eq!(err, ChatError::Send("db down".into()));
        assert_eq!(composer.last_error(), Some(err));
        assert_eq!(composer.text(), "second draft");
        let names: Vec<_> = composer.attachments().into_iter().map(|a| a.name).collect();
        assert_eq!(names, ["a.png", "b.pdf"]);
        assert!(store.messages("c1").is_empty());
        assert!(!composer.is_busy());
    }

    #[tokio::test]
    async fn failure_restores_text_into_empty_input() {
        let api = Arc::new(FakeApi::new("emp"));
        *api.send_error.lock().unwrap() = Some(corpchat_shared::ApiError::Network("offline".into()));
        let (composer, _) = composer(api);
        composer.set_text("hi");

        assert!(composer.send().await.is_err());
        assert_eq!(composer.text(), "hi");
        assert!(composer.can_send());
    }

    #[tokio::test]
    async fn nothing_to_send_is_a_no_op() {
        let api = Arc::new(FakeApi::new("emp"));
        let (composer, _) = composer(api.clone());
        composer.set_text("   ");

        assert!(!composer.can_send());
        assert_eq!(composer.send().await.unwrap(), None);
        assert_eq!(api.call_count("send_message"), 0);
    }

    #[tokio::test]
    async fn attachment_only_message_is_sent() {
        let api = Arc::new(FakeApi::new("emp"));
        api.failing_uploads.lock().unwrap().insert("bad.txt".into());
        let (composer, _) = composer(api.clone());

        let outcome = composer
            .attach(vec![
                LocalFile::new("good.png", vec![1]),
                LocalFile::new("bad.txt", vec![2]),
            ])
            .await;
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(composer.failed_uploads()[0].file.name, "bad.txt");
        assert_eq!(composer.attachments().len(), 1);

        let sent = composer.send().await.unwrap().unwrap();
        assert_eq!(sent.content, "");
        assert_eq!(sent.attachments[0].name, "good.png");
        assert!(composer.attachments().is_empty());
    }

    #[test]
    fn discard_removes_by_index() {
        let api = Arc::new(FakeApi::new("emp"));
        let (composer, _) = composer(api);
        assert_eq!(composer.discard_attachment(0), None);
    }
}
