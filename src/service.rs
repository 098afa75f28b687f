//! Server-side chat operations: room lookup/creation, message send and
//! retrieval. Every operation validates its input before touching the store.

use tracing::{debug, info};

use crate::assistant::{extract_prompt, is_ai_request, Assistant};
use crate::error::{Result, TextifyError};
use crate::models::{
    CheckRoomResponse, Message, Room, SendMessageRequest, SendMessageResponse, AI_USER_NAME,
};
use crate::providers::ModelBackend;
use crate::store::{ChatStore, NewMessage};

pub struct ChatService<B> {
    store: ChatStore,
    assistant: Assistant<B>,
}

fn required<'a>(value: &'a str, message: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(TextifyError::Validation(message.to_string()))
    } else {
        Ok(trimmed)
    }
}

impl<B: ModelBackend> ChatService<B> {
    pub fn new(store: ChatStore, assistant: Assistant<B>) -> Self {
        Self { store, assistant }
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    pub fn check_room(&self, code: &str) -> Result<CheckRoomResponse> {
        let code = required(code, "Room code is required")?;
        let room = self.store.find_room_by_code(code)?;
        Ok(CheckRoomResponse {
            exists: room.is_some(),
            room_id: room.map(|r| r.id),
        })
    }

    pub fn create_room(&self, code: &str) -> Result<Room> {
        let code = required(code, "Room code is required")?;
        if self.store.find_room_by_code(code)?.is_some() {
            return Err(TextifyError::Conflict(
                "Room with this code already exists".to_string(),
            ));
        }
        let room = self.store.create_room(code)?;
        info!(room_id = %room.id, code = %room.code, "room created");
        Ok(room)
    }

    pub fn get_messages(&self, room_id: &str) -> Result<Vec<Message>> {
        let room_id = required(room_id, "Room ID is required")?;
        self.store.list_messages(room_id)
    }

    /// Store the user's message and, for `@ai` requests, the assistant's reply.
    ///
    /// Assistant failures never fail the request: the AI message then holds
    /// an apology instead of an answer.
    pub async fn send_message(&self, req: &SendMessageRequest) -> Result<SendMessageResponse> {
        if req.content.trim().is_empty() || req.user_name.trim().is_empty() || req.room_id.trim().is_empty() {
            return Err(TextifyError::Validation(
                "Content, userName, and roomId are required".to_string(),
            ));
        }
        if !self.store.room_exists(&req.room_id)? {
            return Err(TextifyError::NotFound("Room not found".to_string()));
        }
        let reply_to_id = req.reply_to_id.as_deref().filter(|id| !id.is_empty());
        if let Some(target) = reply_to_id {
            if self.store.reply_target(&req.room_id, target)?.is_none() {
                return Err(TextifyError::Validation("Reply target not found".to_string()));
            }
        }

        let user_message = self.store.insert_message(NewMessage {
            content: &req.content,
            user_name: &req.user_name,
            room_id: &req.room_id,
            is_ai: false,
            reply_to_id,
        })?;
        debug!(message_id = %user_message.id, room_id = %req.room_id, "message stored");

        if !is_ai_request(&req.content) {
            return Ok(SendMessageResponse {
                user_message,
                ai_message: None,
            });
        }

        info!(room_id = %req.room_id, "assistant request detected");
        let reply = self.assistant.reply_for(extract_prompt(&req.content)).await;
        let ai_message = self.store.insert_message(NewMessage {
            content: &reply,
            user_name: AI_USER_NAME,
            room_id: &req.room_id,
            is_ai: true,
            reply_to_id: None,
        })?;

        Ok(SendMessageResponse {
            user_message,
            ai_message: Some(ai_message),
        })
    }
}
