use super::{AppState, Outcome, RelayResponse};
use crate::extractor::{file_name_from_url, Media, MediaKind, Service};
use crate::telegram::{
    parse_command, CallbackQuery, Command, InlineKeyboardMarkup, Message, PhotoSize,
    Update, User, CALLBACK_FORCE, CALLBACK_LIKE,
};
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

const WELCOME: &str = "Send me links to posts and I will relay their media.";

/// `POST /api/{bot_token}/message`
pub async fn handle_update(
    State(state): State<AppState>,
    Path(token): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<RelayResponse>, StatusCode> {
    if state.bot_token.is_empty() || token != state.bot_token {
        return Err(StatusCode::NOT_FOUND);
    }

    let body = body.map_err(|e| {
        tracing::warn!(error = %e, "failed to read update body");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let update: Update = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "invalid update body");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let response = match (update.callback_query, update.message) {
        (Some(callback), _) => handle_callback(&state, callback).await,
        (None, Some(message)) => handle_message(&state, message).await,
        (None, None) => RelayResponse::empty(Outcome::Ignored),
    };

    Ok(Json(response))
}

async fn handle_callback(state: &AppState, callback: CallbackQuery) -> RelayResponse {
    let query_id = callback.id.clone();

    let response = match (callback.data.as_deref(), callback.message) {
        (Some(CALLBACK_LIKE), Some(message)) => {
            record_like(state, &message, &callback.from).await;
            RelayResponse::empty(Outcome::Like)
        }
        (Some(CALLBACK_FORCE), Some(message)) => {
            if is_authorized(state, Some(&callback.from)).await {
                relay_message(state, &message, true).await
            } else {
                RelayResponse::empty(Outcome::Unauthorized)
            }
        }
        (data, _) => {
            tracing::debug!(?data, "ignoring callback");
            RelayResponse::empty(Outcome::Ignored)
        }
    };

    state.detach_telegram("answerCallbackQuery", move |client| async move {
        client.answer_callback_query(&query_id, None).await
    });

    response
}

async fn record_like(state: &AppState, message: &Message, user: &User) {
    let (chat_id, message_id, user_id) = (message.chat.id, message.message_id, user.id);

    match state
        .with_store(move |store| store.save_like(chat_id, message_id, user_id))
        .await
    {
        Ok((count, true)) => {
            tracing::info!(chat_id, message_id, user_id, count, "like recorded");
            state.detach_telegram("editMessageReplyMarkup", move |client| async move {
                client
                    .edit_reply_markup(chat_id, message_id, &InlineKeyboardMarkup::like(count))
                    .await
            });
        }
        Ok((count, false)) => {
            tracing::debug!(chat_id, message_id, user_id, count, "repeated like");
        }
        Err(e) => {
            tracing::error!(chat_id, message_id, user_id, error = %e, "saving like failed");
        }
    }
}

async fn handle_message(state: &AppState, message: Message) -> RelayResponse {
    if let Some(command) = message.text.as_deref().and_then(parse_command) {
        return handle_command(state, &message, command).await;
    }

    if !is_authorized(state, message.from.as_ref()).await {
        tracing::info!(user = ?message.from.as_ref().map(|u| u.id), "unauthorized message");
        return RelayResponse::empty(Outcome::Unauthorized);
    }

    relay_message(state, &message, false).await
}

async fn handle_command(state: &AppState, message: &Message, command: Command) -> RelayResponse {
    let Some(user) = message.from.as_ref() else {
        return RelayResponse::empty(Outcome::Ignored);
    };
    let user_id = user.id;

    let reply = match command {
        Command::Start => match state.auth_secret {
            Some(_) => format!("{} Use /auth <secret> to get access.", WELCOME),
            None => WELCOME.to_string(),
        },
        Command::Auth(secret) => match &state.auth_secret {
            None => "No authorization needed.".to_string(),
            Some(expected) if !secret.is_empty() && secret == *expected => {
                match state.with_store(move |store| store.grant(user_id)).await {
                    Ok(()) => {
                        tracing::info!(user_id, "access granted");
                        "Access granted.".to_string()
                    }
                    Err(e) => {
                        tracing::error!(user_id, error = %e, "granting access failed");
                        "Could not grant access, try again later.".to_string()
                    }
                }
            }
            Some(_) => {
                tracing::warn!(user_id, "wrong auth secret");
                "Wrong secret.".to_string()
            }
        },
        Command::Revoke => match state.with_store(move |store| store.revoke(user_id)).await {
            Ok(()) => {
                tracing::info!(user_id, "access revoked");
                "Access revoked.".to_string()
            }
            Err(e) => {
                tracing::error!(user_id, error = %e, "revoking access failed");
                "Could not revoke access, try again later.".to_string()
            }
        },
        Command::Unknown(name) => {
            tracing::debug!(%name, "unknown command");
            return RelayResponse::empty(Outcome::Ignored);
        }
    };

    let (chat_id, message_id) = (message.chat.id, message.message_id);
    state.detach_telegram("sendMessage", move |client| async move {
        client.send_message(chat_id, &reply, Some(message_id)).await
    });

    RelayResponse::empty(Outcome::Command)
}

/// True when the auth gate is off, or the user holds a grant. A store
/// failure counts as no grant.
async fn is_authorized(state: &AppState, user: Option<&User>) -> bool {
    if state.auth_secret.is_none() {
        return true;
    }
    let Some(user_id) = user.map(|u| u.id) else {
        return false;
    };

    match state.with_store(move |store| store.is_authorized(user_id)).await {
        Ok(authorized) => authorized,
        Err(e) => {
            tracing::error!(user_id, error = %e, "auth lookup failed");
            false
        }
    }
}

async fn relay_message(state: &AppState, message: &Message, force: bool) -> RelayResponse {
    let urls = message.urls();

    let mut attached = Vec::new();
    if let Some(photo) = message.largest_photo() {
        // A caption that only links known posts means the photo is a preview of them
        if !state.registry.recognizes_all(&message.caption_urls()) {
            if let Some(media) = photo_media(state, photo).await {
                attached.push(media);
            }
        }
    }

    if urls.is_empty() && attached.is_empty() {
        return RelayResponse::empty(Outcome::Ignored);
    }

    let relayed = state.relay(&urls, force, attached).await;

    let (chat_id, message_id) = (message.chat.id, message.message_id);
    for duplicate in &relayed.duplicates {
        let url = duplicate.normalized.clone();
        state.detach_telegram("sendDuplicateNotice", move |client| async move {
            client.send_duplicate_notice(chat_id, message_id, &url).await
        });
    }

    let outcome = if !relayed.duplicates.is_empty() {
        Outcome::Duplicate
    } else if relayed.recognized == 0 && relayed.media.is_empty() {
        Outcome::Ignored
    } else {
        Outcome::Success
    };

    RelayResponse::new(relayed.media, outcome)
}

/// The photo itself, resolved through `getFile`. Its source is left empty so
/// no caption carrying the bot token's file URL is ever posted.
async fn photo_media(state: &AppState, photo: &PhotoSize) -> Option<Media> {
    let client = state.telegram.as_ref()?;

    let file = match client.get_file(&photo.file_id).await {
        Ok(file) => file,
        Err(e) => {
            tracing::error!(file_id = %photo.file_id, error = %e, "getFile failed");
            return None;
        }
    };
    let Some(path) = file.file_path else {
        tracing::warn!(file_id = %photo.file_id, "getFile returned no path");
        return None;
    };

    Some(
        Media::new(
            Service::Telegram,
            MediaKind::Photo,
            file_name_from_url(&path),
            client.file_url(&path),
            "",
        )
        .with_external_file_id(&photo.file_id),
    )
}
