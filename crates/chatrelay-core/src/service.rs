//! Start-generation and resume flows.

use chatrelay_traits::{ChatStore, Committer, NewChat, UserType};
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{BackendMessage, GenerationBackend, GenerationRequest};
use crate::context::StreamContext;
use crate::entitlements::{QUOTA_EXCEEDED, QUOTA_WINDOW_HOURS, entitlements_for};
use crate::error::{GatewayError, Result};
use crate::protocol::Chunk;
use crate::registry::{
    AttachPoint, FrameStream, StreamPublisher, StreamRegistration, StreamRegistry,
};
use crate::request::PostRequestBody;
use crate::resume::replay_chunk;
use crate::stream::{CommitTarget, GenerationSource, GenerationStream, StreamSink};

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: String,
    pub user_type: UserType,
}

/// A started generation and the body to return to its caller.
pub struct StartedGeneration {
    pub stream_id: Uuid,
    pub body: FrameStream,
}

pub enum ResumeOutcome {
    /// Resumable streams are off for this process.
    Disabled,
    /// Attached to the live stream.
    Live(FrameStream),
    /// The stream already finished; replay of the recent message.
    Replay(Chunk),
    /// Nothing to resume.
    Empty,
}

pub struct ChatService {
    store: Arc<dyn ChatStore>,
    backend: Arc<dyn GenerationBackend>,
    committer: Arc<dyn Committer>,
    context: Arc<StreamContext>,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn ChatStore>,
        backend: Arc<dyn GenerationBackend>,
        committer: Arc<dyn Committer>,
        context: Arc<StreamContext>,
    ) -> Self {
        Self {
            store,
            backend,
            committer,
            context,
        }
    }

    pub fn context(&self) -> &Arc<StreamContext> {
        &self.context
    }

    /// Every check runs before the backend is called; afterwards failures
    /// are delivered in-band.
    pub async fn start_generation(
        &self,
        body: PostRequestBody,
        user: Option<&SessionUser>,
    ) -> Result<StartedGeneration> {
        let user = user.ok_or_else(GatewayError::unauthorized)?;
        let chat_id = body.id;

        let limit = entitlements_for(user.user_type).max_messages_per_day;
        let sent = self.store.message_count(&user.id, QUOTA_WINDOW_HOURS).await?;
        if sent > limit {
            info!(user_id = %user.id, sent, limit, "Daily message quota exceeded");
            return Err(GatewayError::QuotaExceeded(QUOTA_EXCEEDED.to_string()));
        }

        match self.store.get_chat(chat_id).await? {
            Some(chat) if chat.user_id != user.id => return Err(GatewayError::forbidden()),
            Some(_) => {}
            None => {
                let title = self.backend.generate_title(&body.message.text()).await;
                self.store
                    .save_chat(NewChat {
                        id: chat_id,
                        user_id: user.id.clone(),
                        title,
                        visibility: body.selected_visibility_type,
                    })
                    .await?;
                debug!(chat_id = %chat_id, "Created chat");
            }
        }

        let previous = self.store.get_messages(chat_id).await?;
        let user_message = body.message.to_stored(chat_id);
        self.store
            .save_messages(&user.id, std::slice::from_ref(&user_message))
            .await?;

        let mut messages: Vec<BackendMessage> = previous.iter().map(BackendMessage::from).collect();
        messages.push(BackendMessage::from(&user_message));

        let stream_id = Uuid::new_v4();
        let settings = self.context.settings();
        let generation = GenerationStream::new(
            stream_id,
            GenerationSource {
                backend: self.backend.clone(),
                request: GenerationRequest {
                    chat_id,
                    messages,
                    user_id: user.id.clone(),
                    user_type: user.user_type,
                },
                active: self.context.active().track(stream_id),
            },
            settings.tee_buffer,
        );

        // Register before recording the id so a resume that finds the id
        // also finds the stream.
        let registered = match self.context.registry().await {
            Some(registry) => register(registry, stream_id, chat_id).await,
            None => None,
        };
        self.store.create_stream_id(chat_id, stream_id).await?;

        let body = match registered {
            Some((publisher, reader)) => {
                generation.merge_into(StreamSink::Registry(publisher));
                reader
            }
            None => {
                let (tx, rx) = mpsc::channel(settings.tee_buffer.max(1));
                generation.merge_into(StreamSink::Direct(tx));
                ReceiverStream::new(rx).boxed()
            }
        };

        generation.consume(CommitTarget {
            committer: self.committer.clone(),
            chat_id,
            user_id: user.id.clone(),
        });
        info!(chat_id = %chat_id, stream_id = %stream_id, "Generation started");

        Ok(StartedGeneration { stream_id, body })
    }

    pub async fn resume(
        &self,
        chat_id: Option<&str>,
        user: Option<&SessionUser>,
    ) -> Result<ResumeOutcome> {
        let requested_at = Utc::now();
        let Some(registry) = self.context.registry().await else {
            return Ok(ResumeOutcome::Disabled);
        };

        let chat_id = chat_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| GatewayError::bad_request("id is required"))?;
        let user = user.ok_or_else(GatewayError::unauthorized)?;

        let chat_id = Uuid::parse_str(chat_id).map_err(|_| GatewayError::not_found("Not found"))?;
        let chat = match self.store.get_chat(chat_id).await {
            Ok(Some(chat)) => chat,
            Ok(None) => return Err(GatewayError::not_found("Not found")),
            Err(err) => {
                warn!(chat_id = %chat_id, error = %err, "Chat lookup failed during resume");
                return Err(GatewayError::not_found("Not found"));
            }
        };
        if !chat.readable_by(&user.id) {
            return Err(GatewayError::forbidden());
        }

        let stream_ids = self.store.get_latest_stream_ids(chat_id).await?;
        let Some(stream_id) = stream_ids.last().copied() else {
            return Err(GatewayError::not_found("No streams found"));
        };

        match registry.attach(stream_id, AttachPoint::Tail).await {
            Ok(Some(reader)) => {
                debug!(chat_id = %chat_id, stream_id = %stream_id, "Resuming live stream");
                return Ok(ResumeOutcome::Live(reader));
            }
            Ok(None) => {}
            Err(err) => {
                warn!(stream_id = %stream_id, error = %err, "Registry attach failed, falling back");
            }
        }

        let Some(message) = self.store.get_latest_assistant_message(chat_id).await? else {
            return Ok(ResumeOutcome::Empty);
        };
        let window = self.context.settings().resume_window;
        match replay_chunk(&message, requested_at, window) {
            Ok(Some(chunk)) => {
                debug!(chat_id = %chat_id, message_id = %message.id, "Replaying finished message");
                Ok(ResumeOutcome::Replay(chunk))
            }
            Ok(None) => Ok(ResumeOutcome::Empty),
            Err(err) => Err(GatewayError::Internal(err.to_string())),
        }
    }
}

/// Register the stream and attach the originating reader from the start.
///
/// Registry failures fall back to direct streaming.
async fn register(
    registry: Arc<dyn StreamRegistry>,
    stream_id: Uuid,
    chat_id: Uuid,
) -> Option<(StreamPublisher, FrameStream)> {
    let registration = StreamRegistration::new(stream_id, chat_id);
    if let Err(err) = registry.register(&registration).await {
        warn!(stream_id = %stream_id, error = %err, "Stream registration failed, streaming directly");
        return None;
    }
    let publisher = StreamPublisher::new(registry.clone(), stream_id);

    match registry.attach(stream_id, AttachPoint::Start).await {
        Ok(Some(reader)) => Some((publisher, reader)),
        Ok(None) => {
            warn!(stream_id = %stream_id, "Registered stream not attachable, streaming directly");
            None
        }
        Err(err) => {
            warn!(stream_id = %stream_id, error = %err, "Registry attach failed, streaming directly");
            None
        }
    }
}
